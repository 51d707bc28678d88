// stats.rs

use std::time::Duration;

/// Consumer-side counters for a double-buffered reader.
///
/// Only the consumer updates these, so plain fields are enough.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Completed buffer swaps
    pub swaps: u64,
    /// Bytes handed to the caller
    pub bytes_read: u64,
    /// Time the consumer spent blocked waiting for a fill to complete
    pub stalled: Duration,
}

impl ReaderStats {
    pub(crate) fn record_swap(&mut self, waited: Duration) {
        self.swaps += 1;
        self.stalled += waited;
    }

    pub(crate) fn record_read(&mut self, bytes: usize) {
        self.bytes_read += bytes as u64;
    }
}
