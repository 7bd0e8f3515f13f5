//! The buffered write path in front of the store.
//!
//! The replicated log delivers alerts one at a time, so writing each
//! straight through to the store would pay the store's write cost per
//! alert. [`BufferedStore`] wraps any [`Store`] and absorbs writes
//! into in-memory buffers, flushing when a buffer fills or on a fixed
//! interval, whichever comes first.

use std::sync::Arc;
use std::time::Duration;

use banshee_model::{Alert, Silence};
use banshee_store::error::Result;
use banshee_store::filter::{AlertFilter, SilenceFilter};
use banshee_store::{Store, StoreError};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// A [`Store`] decorator that buffers writes.
///
/// Alerts and silences buffer independently, each behind its own
/// lock. A write that would overfill a buffer fills it to the limit,
/// flushes, and repeats until the input is absorbed; the background
/// [`run`](BufferedStore::run) loop flushes on a timer so a quiet
/// buffer never goes stale, and performs a mandatory final flush on
/// shutdown.
///
/// Queries pass straight through to the wrapped store and do not see
/// unflushed writes.
pub struct BufferedStore {
    inner: Arc<dyn Store>,
    max_len: usize,
    flush_interval: Duration,
    alerts: Mutex<Vec<Alert>>,
    silences: Mutex<Vec<Silence>>,
}

impl BufferedStore {
    /// Wraps a store. `max_len` is the per-buffer length limit
    /// (clamped to at least 1); `flush_interval` is the background
    /// flush cadence.
    #[must_use]
    pub fn new(inner: Arc<dyn Store>, max_len: usize, flush_interval: Duration) -> Self {
        Self {
            inner,
            max_len: max_len.max(1),
            flush_interval,
            alerts: Mutex::new(Vec::new()),
            silences: Mutex::new(Vec::new()),
        }
    }

    /// Flushes both buffers to the wrapped store.
    ///
    /// Failures for one entity kind do not stop the other from
    /// flushing; all failures aggregate into one
    /// [`StoreError::Flush`]. A buffer whose flush fails keeps its
    /// contents for the next attempt.
    pub fn flush(&self) -> Result<()> {
        let mut errors = Vec::new();

        {
            let mut alerts = self.alerts.lock();
            if let Err(err) = flush_batch(&mut alerts, |batch| self.inner.store_alerts(batch)) {
                errors.push(err);
            }
        }

        {
            let mut silences = self.silences.lock();
            if let Err(err) = flush_batch(&mut silences, |batch| self.inner.store_silences(batch))
            {
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Flush { errors })
        }
    }

    /// Drives the periodic flush until the shutdown signal fires,
    /// then performs the final flush.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.flush_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.flush() {
                        warn!(%error, "periodic buffer flush failed; will retry");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("buffer shutting down; final flush");
                    return self.flush();
                }
            }
        }
    }

    fn buffered_write<T: Clone>(
        &self,
        buf: &Mutex<Vec<T>>,
        mut incoming: Vec<T>,
        flush: impl Fn(Vec<T>) -> Result<()>,
    ) -> Result<()> {
        let mut guard = buf.lock();
        let mut errors = Vec::new();

        loop {
            let room = self.max_len.saturating_sub(guard.len());
            if incoming.len() <= room {
                guard.append(&mut incoming);
                break;
            }

            guard.extend(incoming.drain(..room));
            if let Err(err) = flush_batch(&mut guard, &flush) {
                // The store is rejecting writes; hold everything in
                // the buffer (temporarily over the limit) rather than
                // spin or drop, and let the ticker retry.
                errors.push(err);
                guard.append(&mut incoming);
                break;
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Flush { errors })
        }
    }
}

/// Flushes one buffer through `flush`, clearing it only on success so
/// a failed flush leaves the data in place for retry.
fn flush_batch<T: Clone>(buf: &mut Vec<T>, flush: impl Fn(Vec<T>) -> Result<()>) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    flush(buf.clone())?;
    buf.clear();
    Ok(())
}

impl Store for BufferedStore {
    fn store_alerts(&self, alerts: Vec<Alert>) -> Result<()> {
        self.buffered_write(&self.alerts, alerts, |batch| self.inner.store_alerts(batch))
    }

    fn store_silences(&self, silences: Vec<Silence>) -> Result<()> {
        self.buffered_write(&self.silences, silences, |batch| {
            self.inner.store_silences(batch)
        })
    }

    fn query_alerts(&self, filter: &dyn AlertFilter) -> Vec<Alert> {
        self.inner.query_alerts(filter)
    }

    fn query_silences(&self, filter: &dyn SilenceFilter) -> Vec<Silence> {
        self.inner.query_silences(filter)
    }
}
