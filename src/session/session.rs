use crate::cache::{BeaconCache, BeaconKey};
use crate::transport::{CollectorClient, ResponseAttributes};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, warn};

/// Version of the beacon wire protocol spoken with the collector.
const PROTOCOL_VERSION: u32 = 3;
/// Delimiter between records inside one beacon chunk.
const BEACON_DELIMITER: char = '&';

/// One logical session (or one split instance of it).
///
/// Owns the beacon identity: the cache key, the client IP reported to the
/// collector, and the precomputed chunk prefix. Recording calls append
/// opaque serialized records to the cache; the sender drains them through
/// the prepare/chunk/ack cycle. At most one sender iteration at a time calls
/// `send` for a given session.
pub struct Session {
    key: BeaconKey,
    cache: Arc<BeaconCache>,
    client_ip: String,
    beacon_prefix: String,
    start_time: i64,
    finished: AtomicBool,
    open_child_count: AtomicU32,
}

impl Session {
    pub fn new(
        cache: Arc<BeaconCache>,
        key: BeaconKey,
        application_id: &str,
        client_ip: &str,
        start_time: i64,
    ) -> Self {
        let beacon_prefix = format!(
            "vv={}&va={}&ap={}&sn={}&ss={}&ip={}",
            PROTOCOL_VERSION,
            env!("CARGO_PKG_VERSION"),
            application_id,
            key.session_id,
            key.session_sequence_number,
            client_ip,
        );
        Self {
            key,
            cache,
            client_ip: client_ip.to_string(),
            beacon_prefix,
            start_time,
            finished: AtomicBool::new(false),
            open_child_count: AtomicU32::new(0),
        }
    }

    pub fn key(&self) -> BeaconKey {
        self.key
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    /// Appends a serialized event record. Dropped once the session ended.
    pub fn record_event(&self, timestamp: i64, payload: String) {
        if self.is_finished() {
            debug!(key = %self.key, "event recorded on finished session, dropped");
            return;
        }
        self.cache.add_event_data(self.key, timestamp, payload);
    }

    /// Appends a serialized action record. Dropped once the session ended.
    pub fn record_action(&self, timestamp: i64, payload: String) {
        if self.is_finished() {
            debug!(key = %self.key, "action recorded on finished session, dropped");
            return;
        }
        self.cache.add_action_data(self.key, timestamp, payload);
    }

    /// Tracks a child object (action, web-request tracer) being opened by
    /// the recording facade.
    pub fn child_started(&self) {
        self.open_child_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn child_closed(&self) {
        let previous = self.open_child_count.fetch_sub(1, Ordering::Relaxed);
        if previous == 0 {
            warn!(key = %self.key, "child_closed without matching child_started");
            self.open_child_count.store(0, Ordering::Relaxed);
        }
    }

    /// The normal close path: succeeds only while no children are open.
    pub fn try_end(&self) -> bool {
        if self.open_child_count.load(Ordering::Relaxed) > 0 {
            return false;
        }
        self.end();
        true
    }

    /// Ends the session unconditionally. Buffered data stays in the cache
    /// and is drained by the sender on its next iteration.
    pub fn end(&self) {
        if !self.finished.swap(true, Ordering::Relaxed) {
            debug!(key = %self.key, "session ended");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    /// Drains the session's buffered data to the collector.
    ///
    /// Takes a fresh in-flight snapshot (unless one is pending from a failed
    /// cycle) and ships it chunk by chunk. Every delivered chunk is
    /// acknowledged by dropping its records; on the first failed delivery
    /// the whole remaining snapshot is rolled back and `None` is returned.
    /// Otherwise the most recent collector response is returned, if any.
    pub async fn send<C: CollectorClient>(
        &self,
        client: &C,
        max_beacon_size: usize,
    ) -> Option<ResponseAttributes> {
        self.cache.prepare_data_for_sending(self.key);

        let mut last_response = None;
        loop {
            let chunk = self.cache.get_next_chunk(
                self.key,
                &self.beacon_prefix,
                max_beacon_size,
                BEACON_DELIMITER,
            );
            if chunk.is_empty() {
                break;
            }
            match client.send_beacon(self.key, &self.client_ip, &chunk).await {
                Some(response) => {
                    self.cache.remove_chunked_data(self.key);
                    last_response = Some(response);
                }
                None => {
                    warn!(key = %self.key, "beacon delivery failed, rolling chunked data back");
                    self.cache.reset_chunked_data(self.key);
                    return None;
                }
            }
        }
        last_response
    }

    /// True when nothing is buffered for this session, active or in flight.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty(self.key)
    }

    /// Drops the session's cache entry and everything it holds.
    pub fn clear_captured_data(&self) {
        self.cache.delete_entry(self.key);
    }
}
