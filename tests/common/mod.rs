#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use vantage_agent::cache::BeaconKey;
use vantage_agent::transport::{CollectorClient, ResponseAttributes, TimeSyncResponse};

/// Scripted collector double.
///
/// Each request kind pops its scripted queue first and falls back to the
/// configured default once the script is exhausted. Requests and beacon
/// payloads are recorded for assertions.
#[derive(Default)]
pub struct StubCollectorClient {
    status_script: Mutex<VecDeque<Option<ResponseAttributes>>>,
    default_status: Option<ResponseAttributes>,
    beacon_script: Mutex<VecDeque<Option<ResponseAttributes>>>,
    default_beacon: Option<ResponseAttributes>,
    time_sync_script: Mutex<VecDeque<Option<TimeSyncResponse>>>,
    default_time_sync: Option<TimeSyncResponse>,
    pub status_requests: AtomicUsize,
    pub beacon_requests: AtomicUsize,
    pub time_sync_requests: AtomicUsize,
    pub beacon_payloads: Mutex<Vec<String>>,
}

impl StubCollectorClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status_script(
        self,
        responses: impl IntoIterator<Item = Option<ResponseAttributes>>,
    ) -> Self {
        *self.status_script.lock() = responses.into_iter().collect();
        self
    }

    pub fn with_default_status(mut self, response: ResponseAttributes) -> Self {
        self.default_status = Some(response);
        self
    }

    pub fn with_default_beacon(mut self, response: ResponseAttributes) -> Self {
        self.default_beacon = Some(response);
        self
    }

    pub fn with_time_sync_script(
        self,
        responses: impl IntoIterator<Item = Option<TimeSyncResponse>>,
    ) -> Self {
        *self.time_sync_script.lock() = responses.into_iter().collect();
        self
    }

    pub fn with_default_time_sync(mut self, response: TimeSyncResponse) -> Self {
        self.default_time_sync = Some(response);
        self
    }

    pub fn status_request_count(&self) -> usize {
        self.status_requests.load(Ordering::Relaxed)
    }

    pub fn beacon_request_count(&self) -> usize {
        self.beacon_requests.load(Ordering::Relaxed)
    }

    pub fn time_sync_request_count(&self) -> usize {
        self.time_sync_requests.load(Ordering::Relaxed)
    }

    pub fn recorded_beacon_payloads(&self) -> Vec<String> {
        self.beacon_payloads.lock().clone()
    }
}

impl CollectorClient for StubCollectorClient {
    async fn send_status_request(&self) -> Option<ResponseAttributes> {
        self.status_requests.fetch_add(1, Ordering::Relaxed);
        match self.status_script.lock().pop_front() {
            Some(scripted) => scripted,
            None => self.default_status.clone(),
        }
    }

    async fn send_beacon(
        &self,
        _key: BeaconKey,
        _client_ip: &str,
        payload: &str,
    ) -> Option<ResponseAttributes> {
        self.beacon_requests.fetch_add(1, Ordering::Relaxed);
        self.beacon_payloads.lock().push(payload.to_string());
        match self.beacon_script.lock().pop_front() {
            Some(scripted) => scripted,
            None => self.default_beacon.clone(),
        }
    }

    async fn send_time_sync_request(&self) -> Option<TimeSyncResponse> {
        self.time_sync_requests.fetch_add(1, Ordering::Relaxed);
        match self.time_sync_script.lock().pop_front() {
            Some(scripted) => scripted,
            None => self.default_time_sync.clone(),
        }
    }
}

/// Attributes that keep capturing on.
pub fn capture_on_attributes() -> ResponseAttributes {
    ResponseAttributes {
        capture: Some(true),
        multiplicity: Some(1),
        ..Default::default()
    }
}

/// Attributes that turn capturing off.
pub fn capture_off_attributes() -> ResponseAttributes {
    ResponseAttributes {
        capture: Some(false),
        ..Default::default()
    }
}

/// A time-sync answer a sync-incapable collector would give.
pub fn unsupported_time_sync() -> TimeSyncResponse {
    TimeSyncResponse {
        receive_timestamp: 0,
        send_timestamp: 0,
    }
}
