//! Error types for the banshee-services crate.

use thiserror::Error;

/// Errors from background services and their supervisor.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A service exited while the node was not shutting down. The
    /// supervisor stops the world in response: a node quietly missing
    /// one of its sweeps is worse than a restart.
    #[error("service {service:?} stopped unexpectedly")]
    Stopped {
        /// The service that exited.
        service: String,
    },

    /// A service's own work failed in a way it cannot retry.
    #[error("service {service:?} failed: {reason}")]
    Failed {
        /// The service that failed.
        service: String,
        /// The underlying failure.
        reason: String,
    },

    /// One or more notifiers failed to deliver in a single pass.
    #[error("notification delivery failed for {} notifier(s): {}", failures.len(), failures.join("; "))]
    Notify {
        /// One message per failed notifier.
        failures: Vec<String>,
    },
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
