mod common;

use common::{
    StubCollectorClient, capture_off_attributes, capture_on_attributes, unsupported_time_sync,
};
use std::sync::Arc;
use std::time::Duration;
use vantage_agent::cache::BeaconCache;
use vantage_agent::sender::{SenderConfig, SenderWorker, SendingContext};
use vantage_agent::session::SessionProxy;
use vantage_agent::transport::TimeSyncResponse;

fn fast_sender_config() -> SenderConfig {
    SenderConfig {
        default_sleep: Duration::from_millis(10),
        status_check_interval: Duration::from_millis(100),
        time_sync_interval: Duration::from_secs(3600),
        initial_retry_delay: Duration::from_millis(1),
        max_status_request_retries: 2,
        time_sync_probe_count: 3,
        max_time_sync_retries: 1,
    }
}

type StubContext = Arc<SendingContext<StubCollectorClient>>;

fn context_with(client: StubCollectorClient) -> (StubContext, Arc<StubCollectorClient>) {
    let client = Arc::new(client);
    let context = Arc::new(SendingContext::new(client.clone(), fast_sender_config()));
    (context, client)
}

async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn init_exhausts_retries_then_signals_failure_and_terminates() {
    // No scripted responses and no default: every status request fails.
    let (context, client) = context_with(StubCollectorClient::new());
    let worker = SenderWorker::new(context.clone());
    assert!(worker.start());

    let init = context.init_latch().wait_timeout(Duration::from_secs(5)).await;
    assert_eq!(init, Some(false));

    assert!(wait_until(Duration::from_secs(5), || !worker.is_alive()).await);
    // One initial attempt plus the two configured retries, not one more.
    assert_eq!(client.status_request_count(), 3);
    // Terminal re-asserts the shutdown flag.
    assert!(context.is_shutdown_requested());
}

#[tokio::test]
async fn capture_on_delivers_open_session_beacons() {
    let client = StubCollectorClient::new()
        .with_default_status(capture_on_attributes())
        .with_default_beacon(capture_on_attributes())
        .with_default_time_sync(unsupported_time_sync());
    let (context, client) = context_with(client);

    let cache = Arc::new(BeaconCache::new());
    let proxy = SessionProxy::new(context.clone(), cache.clone(), "app-1", "10.0.0.1", 42);
    proxy.record_event("et=1&na=click".to_string());
    proxy.record_action("ca=root".to_string());

    let worker = SenderWorker::new(context.clone());
    assert!(worker.start());

    let init = context.init_latch().wait_timeout(Duration::from_secs(5)).await;
    assert_eq!(init, Some(true));

    assert!(wait_until(Duration::from_secs(5), || client.beacon_request_count() > 0).await);

    let payloads = client.recorded_beacon_payloads();
    let beacon = &payloads[0];
    assert!(beacon.starts_with("vv=3&va="));
    assert!(beacon.contains("&ap=app-1&sn=42&ss=0&ip=10.0.0.1"));
    // Events come before actions in the chunk.
    assert!(beacon.ends_with("&et=1&na=click&ca=root"));

    // The delivered records were acknowledged and dropped.
    assert!(wait_until(Duration::from_secs(5), || {
        proxy.current_session().is_empty()
    })
    .await);

    assert!(worker.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn finished_sessions_are_sent_before_open_ones() {
    let client = StubCollectorClient::new()
        .with_default_status(capture_on_attributes())
        .with_default_beacon(capture_on_attributes())
        .with_default_time_sync(unsupported_time_sync());
    let (context, client) = context_with(client);

    let cache = Arc::new(BeaconCache::new());
    let finished = SessionProxy::new(context.clone(), cache.clone(), "app-1", "10.0.0.1", 1);
    finished.record_event("finished-data".to_string());
    let open = SessionProxy::new(context.clone(), cache.clone(), "app-1", "10.0.0.1", 2);
    open.record_event("open-data".to_string());
    finished.end();

    let worker = SenderWorker::new(context.clone());
    assert!(worker.start());

    assert!(wait_until(Duration::from_secs(5), || client.beacon_request_count() >= 2).await);
    let payloads = client.recorded_beacon_payloads();
    assert!(payloads[0].contains("&sn=1&"));
    assert!(payloads[1].contains("&sn=2&"));

    assert!(worker.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn time_sync_failure_with_support_falls_back_to_capture_off() {
    // Status requests succeed with capture on, but every probe times out.
    let client = StubCollectorClient::new().with_default_status(capture_on_attributes());
    let (context, client) = context_with(client);

    let cache = Arc::new(BeaconCache::new());
    let proxy = SessionProxy::new(context.clone(), cache.clone(), "app-1", "10.0.0.1", 5);
    proxy.record_event("pending".to_string());

    let worker = SenderWorker::new(context.clone());
    assert!(worker.start());

    let init = context.init_latch().wait_timeout(Duration::from_secs(5)).await;
    assert_eq!(init, Some(true));

    // A probe and its one retry, at least once through the fallback cycle.
    assert!(wait_until(Duration::from_secs(5), || {
        client.time_sync_request_count() >= 2
    })
    .await);

    // Capture never turns on while the clock anchor is missing.
    assert_eq!(client.beacon_request_count(), 0);

    // The final flush still delivers the buffered session, best effort.
    assert!(worker.shutdown(Duration::from_secs(5)).await);
    assert_eq!(client.beacon_request_count(), 1);
    assert!(client.recorded_beacon_payloads()[0].contains("&pending"));
}

#[tokio::test]
async fn successful_probes_anchor_the_cluster_clock() {
    let probe = TimeSyncResponse {
        receive_timestamp: 1_700_000_000_000,
        send_timestamp: 1_700_000_000_001,
    };
    let client = StubCollectorClient::new()
        .with_default_status(capture_on_attributes())
        .with_default_beacon(capture_on_attributes())
        .with_default_time_sync(probe);
    let (context, client) = context_with(client);

    let worker = SenderWorker::new(context.clone());
    assert!(worker.start());

    assert!(wait_until(Duration::from_secs(5), || {
        context.last_time_sync_time() > 0
    })
    .await);
    // Exactly the configured number of probes, no retries needed.
    assert_eq!(client.time_sync_request_count(), 3);
    assert!(context.is_time_sync_supported());

    assert!(worker.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn unsupported_probe_response_latches_and_proceeds_by_capture() {
    let client = StubCollectorClient::new()
        .with_default_status(capture_on_attributes())
        .with_default_beacon(capture_on_attributes())
        .with_time_sync_script([Some(unsupported_time_sync())]);
    let (context, client) = context_with(client);

    let worker = SenderWorker::new(context.clone());
    assert!(worker.start());

    assert!(wait_until(Duration::from_secs(5), || {
        !context.is_time_sync_supported()
    })
    .await);
    // The single invalid answer settles it; no re-probing afterwards.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.time_sync_request_count(), 1);

    assert!(worker.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn capture_off_response_drops_all_queued_sessions() {
    let (context, _client) = context_with(StubCollectorClient::new());

    let cache = Arc::new(BeaconCache::new());
    let first = SessionProxy::new(context.clone(), cache.clone(), "app-1", "10.0.0.1", 1);
    first.record_event("one".to_string());
    let second = SessionProxy::new(context.clone(), cache.clone(), "app-1", "10.0.0.1", 2);
    second.record_event("two".to_string());
    second.end();

    assert_eq!(context.open_session_count(), 1);
    assert_eq!(context.finished_session_count(), 1);
    assert!(cache.num_bytes_in_cache() > 0);

    context.handle_status_response(&capture_off_attributes());

    assert_eq!(context.open_session_count(), 0);
    assert_eq!(context.finished_session_count(), 0);
    assert_eq!(cache.num_bytes_in_cache(), 0);
}

#[tokio::test]
async fn init_latch_releases_all_waiters_and_late_arrivals() {
    let (context, _client) = context_with(StubCollectorClient::new());

    let early_a = {
        let context = context.clone();
        tokio::spawn(async move { context.init_latch().wait().await })
    };
    let early_b = {
        let context = context.clone();
        tokio::spawn(async move { context.init_latch().wait().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    context.init_completed(true);
    // Only the first completion counts.
    context.init_completed(false);

    assert!(early_a.await.unwrap());
    assert!(early_b.await.unwrap());
    assert!(context.init_latch().wait().await);
}
