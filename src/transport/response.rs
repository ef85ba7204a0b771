use serde::{Deserialize, Serialize};
use std::time::Duration;

// Protocol defaults applied when the server never sent the attribute.
const DEFAULT_MAX_BEACON_SIZE_BYTES: usize = 30 * 1024;
const DEFAULT_SEND_INTERVAL_MS: u64 = 120_000;
const DEFAULT_SESSION_TIMEOUT_MS: u64 = 600_000;
const DEFAULT_MAX_SESSION_DURATION_MS: u64 = 360 * 60_000;
const DEFAULT_MAX_EVENTS_PER_SESSION: i32 = 200;
const DEFAULT_MULTIPLICITY: i32 = 1;
const DEFAULT_SERVER_ID: i32 = 1;
const DEFAULT_TRAFFIC_CONTROL_PERCENTAGE: i32 = 100;

/// Server-directed settings decoded from a status or beacon response.
///
/// Every attribute is optional: `Some` means the attribute was present in the
/// response, `None` means the server said nothing about it. Merging therefore
/// overwrites only what the newer response actually carried, which lets
/// partial responses update settings incrementally without clobbering what
/// was learned before. Accessors fall back to the protocol defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResponseAttributes {
    pub capture: Option<bool>,
    pub capture_crashes: Option<bool>,
    pub capture_errors: Option<bool>,
    pub max_beacon_size_bytes: Option<usize>,
    pub send_interval_ms: Option<u64>,
    pub session_timeout_ms: Option<u64>,
    pub max_session_duration_ms: Option<u64>,
    pub max_events_per_session: Option<i32>,
    pub multiplicity: Option<i32>,
    pub server_id: Option<i32>,
    pub traffic_control_percentage: Option<i32>,
    pub application_id: Option<String>,
    pub status: Option<String>,
    pub timestamp_ms: Option<i64>,
}

impl ResponseAttributes {
    /// Overlays `newer` on top of `self`: attributes the newer response
    /// carried win, everything else is preserved from the base set.
    pub fn merge(&self, newer: &ResponseAttributes) -> ResponseAttributes {
        ResponseAttributes {
            capture: newer.capture.or(self.capture),
            capture_crashes: newer.capture_crashes.or(self.capture_crashes),
            capture_errors: newer.capture_errors.or(self.capture_errors),
            max_beacon_size_bytes: newer.max_beacon_size_bytes.or(self.max_beacon_size_bytes),
            send_interval_ms: newer.send_interval_ms.or(self.send_interval_ms),
            session_timeout_ms: newer.session_timeout_ms.or(self.session_timeout_ms),
            max_session_duration_ms: newer
                .max_session_duration_ms
                .or(self.max_session_duration_ms),
            max_events_per_session: newer.max_events_per_session.or(self.max_events_per_session),
            multiplicity: newer.multiplicity.or(self.multiplicity),
            server_id: newer.server_id.or(self.server_id),
            traffic_control_percentage: newer
                .traffic_control_percentage
                .or(self.traffic_control_percentage),
            application_id: newer
                .application_id
                .clone()
                .or_else(|| self.application_id.clone()),
            status: newer.status.clone().or_else(|| self.status.clone()),
            timestamp_ms: newer.timestamp_ms.or(self.timestamp_ms),
        }
    }

    pub fn is_capture(&self) -> bool {
        self.capture.unwrap_or(true)
    }

    pub fn is_capture_crashes(&self) -> bool {
        self.capture_crashes.unwrap_or(true)
    }

    pub fn is_capture_errors(&self) -> bool {
        self.capture_errors.unwrap_or(true)
    }

    pub fn max_beacon_size(&self) -> usize {
        self.max_beacon_size_bytes
            .unwrap_or(DEFAULT_MAX_BEACON_SIZE_BYTES)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms.unwrap_or(DEFAULT_SEND_INTERVAL_MS))
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms.unwrap_or(DEFAULT_SESSION_TIMEOUT_MS))
    }

    pub fn max_session_duration(&self) -> Duration {
        Duration::from_millis(
            self.max_session_duration_ms
                .unwrap_or(DEFAULT_MAX_SESSION_DURATION_MS),
        )
    }

    pub fn max_events_per_session(&self) -> i32 {
        self.max_events_per_session
            .unwrap_or(DEFAULT_MAX_EVENTS_PER_SESSION)
    }

    pub fn multiplicity(&self) -> i32 {
        self.multiplicity.unwrap_or(DEFAULT_MULTIPLICITY)
    }

    pub fn server_id(&self) -> i32 {
        self.server_id.unwrap_or(DEFAULT_SERVER_ID)
    }

    pub fn traffic_control_percentage(&self) -> i32 {
        self.traffic_control_percentage
            .unwrap_or(DEFAULT_TRAFFIC_CONTROL_PERCENTAGE)
    }
}

/// Typed response of one time-sync probe: when the request hit the server and
/// when the response left it, both in collector epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSyncResponse {
    pub receive_timestamp: i64,
    pub send_timestamp: i64,
}

impl TimeSyncResponse {
    /// A collector that does not support time sync answers with zeroed
    /// timestamps.
    pub fn is_valid(&self) -> bool {
        self.receive_timestamp > 0 && self.send_timestamp > 0
    }
}
