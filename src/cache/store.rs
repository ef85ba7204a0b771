use super::entry::BeaconCacheEntry;
use super::key::BeaconKey;
use super::record::BeaconCacheRecord;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Notify;
use tracing::debug;

/// Concurrent store of per-session beacon buffers.
///
/// The key map is read-mostly (exclusive access only to insert or delete a
/// key); each entry carries its own lock, so different sessions never contend
/// with each other. The running byte total covers ACTIVE records only and is
/// kept consistent with every mutation; in-flight data is excluded because it
/// is treated as good as sent the moment a send cycle snapshots it.
pub struct BeaconCache {
    entries: RwLock<HashMap<BeaconKey, Arc<Mutex<BeaconCacheEntry>>>>,
    total_size: AtomicI64,
    record_added: Notify,
}

impl Default for BeaconCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BeaconCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            total_size: AtomicI64::new(0),
            record_added: Notify::new(),
        }
    }

    fn entry_for(&self, key: BeaconKey) -> Arc<Mutex<BeaconCacheEntry>> {
        if let Some(entry) = self.entries.read().get(&key) {
            return entry.clone();
        }
        self.entries
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(BeaconCacheEntry::new())))
            .clone()
    }

    fn existing_entry(&self, key: BeaconKey) -> Option<Arc<Mutex<BeaconCacheEntry>>> {
        self.entries.read().get(&key).cloned()
    }

    /// Appends a serialized event record, creating the entry on first use.
    pub fn add_event_data(&self, key: BeaconKey, timestamp: i64, payload: String) {
        let entry = self.entry_for(key);
        let added = entry.lock().add_event(BeaconCacheRecord::new(timestamp, payload));
        self.total_size.fetch_add(added, Ordering::Relaxed);
        self.on_data_changed();
    }

    /// Appends a serialized action record, creating the entry on first use.
    pub fn add_action_data(&self, key: BeaconKey, timestamp: i64, payload: String) {
        let entry = self.entry_for(key);
        let added = entry.lock().add_action(BeaconCacheRecord::new(timestamp, payload));
        self.total_size.fetch_add(added, Ordering::Relaxed);
        self.on_data_changed();
    }

    /// Removes an entry and its active bytes from the accounting.
    ///
    /// Deletion is always explicit; entries never expire on their own.
    pub fn delete_entry(&self, key: BeaconKey) {
        let removed = self.entries.write().remove(&key);
        if let Some(entry) = removed {
            let bytes = entry.lock().size_in_bytes();
            if bytes != 0 {
                self.total_size.fetch_sub(bytes, Ordering::Relaxed);
            }
            debug!(key = %key, bytes, "deleted cache entry");
            self.on_data_changed();
        }
    }

    /// Snapshots the entry's active data for a new send cycle.
    ///
    /// No-op if a snapshot is already in flight.
    pub fn prepare_data_for_sending(&self, key: BeaconKey) {
        if let Some(entry) = self.existing_entry(key) {
            let moved = entry.lock().copy_data_for_sending();
            if moved != 0 {
                self.total_size.fetch_sub(moved, Ordering::Relaxed);
                self.on_data_changed();
            }
        }
    }

    /// Next wire chunk of the in-flight snapshot, or an empty string when
    /// nothing remains to send.
    pub fn get_next_chunk(
        &self,
        key: BeaconKey,
        prefix: &str,
        max_size: usize,
        delimiter: char,
    ) -> String {
        match self.existing_entry(key) {
            Some(entry) => entry.lock().get_chunk(prefix, max_size, delimiter),
            None => String::new(),
        }
    }

    /// Acknowledges the last chunk: drops the marked prefix of the in-flight
    /// lists.
    pub fn remove_chunked_data(&self, key: BeaconKey) {
        if let Some(entry) = self.existing_entry(key) {
            entry.lock().remove_data_marked_for_sending();
        }
    }

    /// Rolls the current send cycle back after a failed delivery, restoring
    /// the in-flight records to the front of the active lists.
    pub fn reset_chunked_data(&self, key: BeaconKey) {
        if let Some(entry) = self.existing_entry(key) {
            let restored = entry.lock().reset_data_marked_for_sending();
            if restored != 0 {
                self.total_size.fetch_add(restored, Ordering::Relaxed);
            }
            self.on_data_changed();
        }
    }

    /// Evicts active records recorded before `min_timestamp`; returns how
    /// many were removed.
    pub fn evict_records_by_age(&self, key: BeaconKey, min_timestamp: i64) -> usize {
        let Some(entry) = self.existing_entry(key) else {
            return 0;
        };
        let (removed, bytes) = entry.lock().remove_records_older_than(min_timestamp);
        if bytes != 0 {
            self.total_size.fetch_sub(bytes, Ordering::Relaxed);
            self.on_data_changed();
        }
        removed
    }

    /// Evicts up to `count` oldest active records; returns how many were
    /// removed.
    pub fn evict_records_by_count(&self, key: BeaconKey, count: usize) -> usize {
        let Some(entry) = self.existing_entry(key) else {
            return 0;
        };
        let (removed, bytes) = entry.lock().remove_oldest_records(count);
        if bytes != 0 {
            self.total_size.fetch_sub(bytes, Ordering::Relaxed);
            self.on_data_changed();
        }
        removed
    }

    /// True when the entry holds no data at all, active or in-flight.
    pub fn is_empty(&self, key: BeaconKey) -> bool {
        match self.existing_entry(key) {
            Some(entry) => entry.lock().is_empty(),
            None => true,
        }
    }

    pub fn keys(&self) -> Vec<BeaconKey> {
        self.entries.read().keys().copied().collect()
    }

    /// Running total of active bytes across all entries, read lock-free.
    pub fn num_bytes_in_cache(&self) -> i64 {
        self.total_size.load(Ordering::Relaxed)
    }

    /// Blocks until some mutation changed the byte accounting.
    ///
    /// Multiple mutations between wake-ups coalesce into a single permit;
    /// that is correct because observers re-read the live total instead of
    /// counting signals.
    pub async fn wait_for_data_changed(&self) {
        self.record_added.notified().await;
    }

    fn on_data_changed(&self) {
        self.record_added.notify_one();
    }
}
