//! Banshee node binary.

#![forbid(unsafe_code)]

use banshee_node::{Node, NodeConfig, NodeError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "node exited with an error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> banshee_node::Result<()> {
    let config = load_config()?;
    let node = Node::new(config)?;

    let shutdown = node.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown.send(());
        }
    });

    node.run().await
}

fn load_config() -> banshee_node::Result<NodeConfig> {
    match std::env::args().nth(1) {
        Some(path) => NodeConfig::from_file(path),
        None => Err(NodeError::Config {
            reason: "usage: banshee-node <config.json>".to_string(),
        }),
    }
}
