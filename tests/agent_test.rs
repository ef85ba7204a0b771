mod common;

use common::{StubCollectorClient, capture_on_attributes, unsupported_time_sync};
use std::time::Duration;
use vantage_agent::app::AgentConfig;
use vantage_agent::Agent;

fn fast_agent_config() -> AgentConfig {
    let mut config = AgentConfig {
        application_id: "app-1".to_string(),
        ..Default::default()
    };
    config.sender.default_sleep = Duration::from_millis(10);
    config.sender.initial_retry_delay = Duration::from_millis(1);
    config.watchdog.default_sleep = Duration::from_millis(50);
    config.watchdog.close_grace_period = Duration::from_millis(50);
    config.shutdown_timeout = Duration::from_secs(5);
    config
}

fn stub_client() -> StubCollectorClient {
    StubCollectorClient::new()
        .with_default_status(capture_on_attributes())
        .with_default_beacon(capture_on_attributes())
        .with_default_time_sync(unsupported_time_sync())
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
async fn records_flow_from_session_to_collector() {
    let agent = Agent::with_client(fast_agent_config(), stub_client());
    agent.start().unwrap();
    assert_eq!(
        agent.wait_for_init(Duration::from_secs(5)).await,
        Some(true)
    );

    let proxy = agent.create_session("10.0.0.1");
    proxy.record_event("et=10&na=load".to_string());

    // Delivered and acknowledged: the cache entry drains to empty.
    assert!(wait_until(Duration::from_secs(5), || {
        proxy.current_session().is_empty()
    })
    .await);

    agent.close_session(&proxy);
    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn starting_twice_is_rejected() {
    let agent = Agent::with_client(fast_agent_config(), stub_client());
    agent.start().unwrap();
    assert!(agent.start().is_err());
    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn close_session_defers_to_the_watchdog_when_children_are_open() {
    let agent = Agent::with_client(fast_agent_config(), stub_client());
    agent.start().unwrap();
    assert_eq!(
        agent.wait_for_init(Duration::from_secs(5)).await,
        Some(true)
    );

    let proxy = agent.create_session("10.0.0.1");
    let session = proxy.current_session();
    session.child_started();

    agent.close_session(&proxy);
    // The normal close fails while the child is open; the watchdog ends it
    // once the grace period expires.
    assert!(!session.is_finished());
    assert!(wait_until(Duration::from_secs(5), || session.is_finished()).await);

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn wait_for_init_times_out_while_the_collector_is_down() {
    // Collector never answers: init keeps backing off far longer than the
    // wait below.
    let mut config = fast_agent_config();
    config.sender.initial_retry_delay = Duration::from_secs(60);
    let agent = Agent::with_client(config, StubCollectorClient::new());
    agent.start().unwrap();

    assert_eq!(agent.wait_for_init(Duration::from_millis(50)).await, None);
    agent.shutdown().await.unwrap();
}
