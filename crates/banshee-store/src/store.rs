//! The storage contract shared by all alert stores.

use banshee_model::{Alert, Silence};

use crate::error::Result;
use crate::filter::{AlertFilter, SilenceFilter};

/// Durable-enough storage for alerts and silences.
///
/// Implementations are shared across threads behind an `Arc`; all
/// methods take `&self`. Writes are batch-oriented because the
/// replicated log delivers batches, and a batch must land as one
/// call so decorators (the write buffer) can account for it.
pub trait Store: Send + Sync {
    /// Stores a batch of alerts. An alert whose labels match an
    /// existing one replaces it.
    fn store_alerts(&self, alerts: Vec<Alert>) -> Result<()>;

    /// Stores a batch of silences, keyed by ID.
    fn store_silences(&self, silences: Vec<Silence>) -> Result<()>;

    /// Returns every alert passing the filter.
    fn query_alerts(&self, filter: &dyn AlertFilter) -> Vec<Alert>;

    /// Returns every silence passing the filter.
    fn query_silences(&self, filter: &dyn SilenceFilter) -> Vec<Silence>;
}
