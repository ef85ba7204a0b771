pub mod http;
pub mod response;

pub use http::{HttpCollectorClient, TransportConfig};
pub use response::{ResponseAttributes, TimeSyncResponse};

use crate::cache::BeaconKey;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid collector URL: {0}")]
    InvalidUrl(String),
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

/// The narrow seam between the sending pipeline and the wire.
///
/// Three request kinds, each resolving to a typed response or `None` when the
/// transport failed or the response could not be understood. Failures never
/// cross this boundary as errors; the state machine treats `None` as a
/// transient condition and degrades on its own terms.
#[cfg_attr(test, automock)]
pub trait CollectorClient: Send + Sync {
    /// Asks the collector for the current server-directed settings.
    fn send_status_request(
        &self,
    ) -> impl std::future::Future<Output = Option<ResponseAttributes>> + Send;

    /// Uploads one beacon chunk for the given session.
    fn send_beacon(
        &self,
        key: BeaconKey,
        client_ip: &str,
        payload: &str,
    ) -> impl std::future::Future<Output = Option<ResponseAttributes>> + Send;

    /// Performs one clock-probe round trip.
    fn send_time_sync_request(
        &self,
    ) -> impl std::future::Future<Output = Option<TimeSyncResponse>> + Send;
}
