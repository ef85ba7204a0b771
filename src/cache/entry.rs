use super::record::BeaconCacheRecord;
use std::collections::VecDeque;

/// Snapshot of the data a send cycle is currently shipping.
///
/// Both lists are taken together when the cycle starts and cleared together
/// when it ends; holding them in one struct behind an `Option` makes the
/// one-without-the-other state unrepresentable.
#[derive(Debug, Default)]
struct InFlightData {
    events: VecDeque<BeaconCacheRecord>,
    actions: VecDeque<BeaconCacheRecord>,
}

impl InFlightData {
    fn is_empty(&self) -> bool {
        self.events.is_empty() && self.actions.is_empty()
    }

    fn size_in_bytes(&self) -> i64 {
        self.events
            .iter()
            .chain(self.actions.iter())
            .map(BeaconCacheRecord::size_in_bytes)
            .sum()
    }
}

/// Per-key cache state: the active lists producers append to, plus the
/// optional in-flight snapshot the sender is draining.
///
/// Producers and the sender never contend on the same lists; any
/// read-modify-write sequence happens under the store's per-entry lock.
#[derive(Debug, Default)]
pub struct BeaconCacheEntry {
    events: VecDeque<BeaconCacheRecord>,
    actions: VecDeque<BeaconCacheRecord>,
    in_flight: Option<InFlightData>,
    total_bytes: i64,
}

impl BeaconCacheEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event record to the active list and returns its size.
    pub fn add_event(&mut self, record: BeaconCacheRecord) -> i64 {
        let size = record.size_in_bytes();
        self.events.push_back(record);
        self.total_bytes += size;
        size
    }

    /// Appends an action record to the active list and returns its size.
    pub fn add_action(&mut self, record: BeaconCacheRecord) -> i64 {
        let size = record.size_in_bytes();
        self.actions.push_back(record);
        self.total_bytes += size;
        size
    }

    /// Size of the active (not in-flight) records.
    pub fn size_in_bytes(&self) -> i64 {
        self.total_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.actions.is_empty()
            && self.in_flight.as_ref().is_none_or(InFlightData::is_empty)
    }

    pub fn has_data_to_send(&self) -> bool {
        self.in_flight.as_ref().is_some_and(|f| !f.is_empty())
    }

    pub fn needs_data_copied_before_sending(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Moves the active lists into a fresh in-flight snapshot.
    ///
    /// Returns the number of bytes that left active accounting, so the store
    /// can subtract them from its running total (in-flight data is treated as
    /// good as sent). No-op returning 0 when a snapshot already exists.
    pub fn copy_data_for_sending(&mut self) -> i64 {
        if self.in_flight.is_some() {
            return 0;
        }
        let moved = self.total_bytes;
        self.in_flight = Some(InFlightData {
            events: std::mem::take(&mut self.events),
            actions: std::mem::take(&mut self.actions),
        });
        self.total_bytes = 0;
        moved
    }

    /// Builds the next wire chunk from the in-flight snapshot.
    ///
    /// The chunk is `prefix` followed by `<delimiter><payload>` pairs, events
    /// before actions. The length check runs before each record is appended,
    /// so the finished chunk may exceed `max_size` by at most one record.
    /// Included records are marked as sent. Returns an empty string once
    /// nothing unmarked remains (or no snapshot was taken).
    pub fn get_chunk(&mut self, prefix: &str, max_size: usize, delimiter: char) -> String {
        let Some(in_flight) = self.in_flight.as_mut() else {
            return String::new();
        };
        if in_flight
            .events
            .iter()
            .chain(in_flight.actions.iter())
            .all(BeaconCacheRecord::is_marked_for_sending)
        {
            return String::new();
        }

        let mut chunk = String::with_capacity(max_size);
        chunk.push_str(prefix);
        for record in in_flight
            .events
            .iter_mut()
            .chain(in_flight.actions.iter_mut())
        {
            if record.is_marked_for_sending() {
                continue;
            }
            if chunk.len() > max_size {
                break;
            }
            chunk.push(delimiter);
            chunk.push_str(&record.payload);
            record.mark_for_sending();
        }
        chunk
    }

    /// Drops the contiguous marked prefix of each in-flight list.
    ///
    /// Marks are always contiguous from the front because chunks consume
    /// records in order. Calling this without an in-flight snapshot means the
    /// send-cycle invariant was violated upstream.
    pub fn remove_data_marked_for_sending(&mut self) {
        let in_flight = self
            .in_flight
            .as_mut()
            .expect("remove_data_marked_for_sending requires an in-flight snapshot");
        while in_flight
            .events
            .front()
            .is_some_and(BeaconCacheRecord::is_marked_for_sending)
        {
            in_flight.events.pop_front();
        }
        while in_flight
            .actions
            .front()
            .is_some_and(BeaconCacheRecord::is_marked_for_sending)
        {
            in_flight.actions.pop_front();
        }
        if in_flight.is_empty() {
            self.in_flight = None;
        }
    }

    /// Rolls a failed send cycle back.
    ///
    /// All marks are cleared and the in-flight records are merged back in
    /// front of the active lists, preserving original order. Returns the
    /// number of bytes restored to active accounting.
    pub fn reset_data_marked_for_sending(&mut self) -> i64 {
        let Some(mut in_flight) = self.in_flight.take() else {
            return 0;
        };
        for record in in_flight.events.iter_mut().chain(in_flight.actions.iter_mut()) {
            record.unset_sending();
        }
        let restored = in_flight.size_in_bytes();

        in_flight.events.append(&mut self.events);
        self.events = in_flight.events;
        in_flight.actions.append(&mut self.actions);
        self.actions = in_flight.actions;

        self.total_bytes += restored;
        restored
    }

    /// Removes active records older than `min_timestamp`.
    ///
    /// In-flight records are never touched. Returns the count and size of the
    /// removed records.
    pub fn remove_records_older_than(&mut self, min_timestamp: i64) -> (usize, i64) {
        let mut removed = 0;
        let mut removed_bytes = 0;
        for list in [&mut self.events, &mut self.actions] {
            list.retain(|record| {
                if record.timestamp < min_timestamp {
                    removed += 1;
                    removed_bytes += record.size_in_bytes();
                    false
                } else {
                    true
                }
            });
        }
        self.total_bytes -= removed_bytes;
        (removed, removed_bytes)
    }

    /// Removes up to `count` oldest active records, comparing the heads of
    /// the event and action lists by timestamp.
    pub fn remove_oldest_records(&mut self, count: usize) -> (usize, i64) {
        let mut removed = 0;
        let mut removed_bytes = 0;
        while removed < count {
            let event_ts = self.events.front().map(|record| record.timestamp);
            let action_ts = self.actions.front().map(|record| record.timestamp);
            let oldest = match (event_ts, action_ts) {
                (Some(event), Some(action)) => {
                    if event <= action {
                        self.events.pop_front()
                    } else {
                        self.actions.pop_front()
                    }
                }
                (Some(_), None) => self.events.pop_front(),
                (None, Some(_)) => self.actions.pop_front(),
                (None, None) => break,
            };
            if let Some(record) = oldest {
                removed += 1;
                removed_bytes += record.size_in_bytes();
            }
        }
        self.total_bytes -= removed_bytes;
        (removed, removed_bytes)
    }

    #[cfg(test)]
    pub(crate) fn active_records(&self) -> Vec<&BeaconCacheRecord> {
        self.events.iter().chain(self.actions.iter()).collect()
    }
}
