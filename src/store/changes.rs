//! Change notification bus.
//!
//! Every committed write scope that touched rows publishes the union of
//! the date ranges it affected. Segment observers subscribe and refetch
//! when a published range intersects their own window.

use tokio::sync::broadcast;
use tracing::trace;

use crate::models::DateInterval;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<DateInterval>,
}

impl ChangeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DateInterval> {
        self.tx.subscribe()
    }

    /// Fire-and-forget: a send with no live subscribers is not an error.
    pub fn publish(&self, range: DateInterval) {
        trace!(start = %range.start, end = %range.end, "publishing change range");
        let _ = self.tx.send(range);
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}
