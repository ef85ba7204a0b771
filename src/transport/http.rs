use super::{CollectorClient, ResponseAttributes, TimeSyncResponse, TransportError};
use crate::cache::BeaconKey;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderValue};
use reqwest::{Client, ClientBuilder};
use std::io::Write;
use std::time::{Duration, Instant};
use url::Url;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub collector_url: String,
    pub application_id: String,
    pub server_id: i32,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub user_agent: String,
    /// Beacon payloads larger than this are gzip-compressed before upload.
    pub compression_threshold: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            collector_url: "http://localhost:6350/collect".to_string(),
            application_id: String::new(),
            server_id: 1,
            timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            user_agent: concat!("vantage-agent/", env!("CARGO_PKG_VERSION")).to_string(),
            compression_threshold: 1024,
        }
    }
}

/// reqwest-backed collector client.
///
/// Implements the three request kinds of the wire protocol: `type=m` status
/// checks and beacon uploads, `type=mts` time-sync probes. Any transport or
/// decode failure maps to "no response"; nothing propagates as an error.
#[derive(Debug, Clone)]
pub struct HttpCollectorClient {
    client: Client,
    config: TransportConfig,
    collector_url: Url,
}

impl HttpCollectorClient {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let collector_url: Url = config
            .collector_url
            .parse()
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {e}", config.collector_url)))?;

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            config,
            collector_url,
        })
    }

    fn request_url(&self, request_type: &str) -> Url {
        let mut url = self.collector_url.clone();
        url.query_pairs_mut()
            .append_pair("type", request_type)
            .append_pair("srvid", &self.config.server_id.to_string())
            .append_pair("app", &self.config.application_id);
        url
    }

    fn compress(&self, payload: &str) -> Result<Vec<u8>, TransportError> {
        use flate2::{Compression, write::GzEncoder};

        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(payload.as_bytes())?;
        Ok(encoder.finish()?)
    }
}

impl CollectorClient for HttpCollectorClient {
    async fn send_status_request(&self) -> Option<ResponseAttributes> {
        let start = Instant::now();
        let result = self.client.get(self.request_url("m")).send().await;

        let response = match result {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "status request rejected");
                return None;
            }
            Err(e) => {
                warn!("status request failed: {e}");
                return None;
            }
        };

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!("status response body could not be read: {e}");
                return None;
            }
        };
        match serde_json::from_slice::<ResponseAttributes>(&body) {
            Ok(attributes) => {
                debug!(latency = ?start.elapsed(), "status request succeeded");
                Some(attributes)
            }
            Err(e) => {
                warn!("status response could not be decoded: {e}");
                None
            }
        }
    }

    async fn send_beacon(
        &self,
        key: BeaconKey,
        client_ip: &str,
        payload: &str,
    ) -> Option<ResponseAttributes> {
        let start = Instant::now();
        let compress = payload.len() > self.config.compression_threshold;

        let mut request = self
            .client
            .post(self.request_url("m"))
            .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        if !client_ip.is_empty() {
            request = request.header("x-client-ip", client_ip);
        }

        request = if compress {
            let body = match self.compress(payload) {
                Ok(body) => body,
                Err(e) => {
                    warn!(key = %key, "beacon compression failed: {e}");
                    return None;
                }
            };
            request
                .header(CONTENT_ENCODING, HeaderValue::from_static("gzip"))
                .body(body)
        } else {
            request.body(payload.to_string())
        };

        let response = match request.send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(key = %key, status = %response.status(), "beacon upload rejected");
                return None;
            }
            Err(e) => {
                warn!(key = %key, "beacon upload failed: {e}");
                return None;
            }
        };

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(key = %key, "beacon response body could not be read: {e}");
                return None;
            }
        };
        match serde_json::from_slice::<ResponseAttributes>(&body) {
            Ok(attributes) => {
                debug!(
                    key = %key,
                    bytes = payload.len(),
                    compressed = compress,
                    latency = ?start.elapsed(),
                    "beacon uploaded"
                );
                Some(attributes)
            }
            Err(e) => {
                warn!(key = %key, "beacon response could not be decoded: {e}");
                None
            }
        }
    }

    async fn send_time_sync_request(&self) -> Option<TimeSyncResponse> {
        let result = self.client.get(self.request_url("mts")).send().await;

        let response = match result {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "time sync request rejected");
                return None;
            }
            Err(e) => {
                warn!("time sync request failed: {e}");
                return None;
            }
        };

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!("time sync response body could not be read: {e}");
                return None;
            }
        };
        match serde_json::from_slice::<TimeSyncResponse>(&body) {
            Ok(sync) => Some(sync),
            Err(e) => {
                warn!("time sync response could not be decoded: {e}");
                None
            }
        }
    }
}
