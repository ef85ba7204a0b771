/// Multiplier applied to the payload length when estimating memory usage.
///
/// The estimate only feeds eviction thresholds, so a cheap approximation of
/// the in-memory footprint is sufficient; true byte accuracy is not required.
const RECORD_SIZE_FACTOR: i64 = 2;

/// One serialized telemetry record held in the cache.
///
/// The payload is opaque to the cache: it is measured and concatenated, never
/// parsed. `marked_for_sending` is transient state of the send/ack/rollback
/// cycle and never leaves the owning entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconCacheRecord {
    pub timestamp: i64,
    pub payload: String,
    marked_for_sending: bool,
}

impl BeaconCacheRecord {
    pub fn new(timestamp: i64, payload: String) -> Self {
        Self {
            timestamp,
            payload,
            marked_for_sending: false,
        }
    }

    pub fn size_in_bytes(&self) -> i64 {
        self.payload.len() as i64 * RECORD_SIZE_FACTOR
    }

    pub fn is_marked_for_sending(&self) -> bool {
        self.marked_for_sending
    }

    pub fn mark_for_sending(&mut self) {
        self.marked_for_sending = true;
    }

    pub fn unset_sending(&mut self) {
        self.marked_for_sending = false;
    }
}
