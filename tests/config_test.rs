use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use vantage_agent::app::{AgentConfig, ConfigError};

#[test]
fn full_toml_file_round_trips() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
collector_url = "https://collector.example.com/collect"
application_id = "app-1"
server_id = 3
shutdown_timeout = 5000

[cache]
max_record_age_ms = 60000
cache_size_lower_bound = 1000
cache_size_upper_bound = 2000

[sender]
default_sleep = 500
max_status_request_retries = 2

[watchdog]
default_sleep = 1000
close_grace_period = 2000
"#
    )
    .unwrap();

    let config = AgentConfig::from_file(file.path()).unwrap();
    assert_eq!(config.collector_url, "https://collector.example.com/collect");
    assert_eq!(config.application_id, "app-1");
    assert_eq!(config.server_id, 3);
    assert_eq!(config.shutdown_timeout, Duration::from_millis(5000));
    assert_eq!(config.cache.max_record_age_ms, 60_000);
    assert_eq!(config.cache.cache_size_lower_bound, 1_000);
    assert_eq!(config.sender.default_sleep, Duration::from_millis(500));
    assert_eq!(config.sender.max_status_request_retries, 2);
    assert_eq!(config.watchdog.close_grace_period, Duration::from_millis(2000));
}

#[test]
fn omitted_sections_fall_back_to_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
collector_url = "https://collector.example.com/collect"
application_id = "app-1"
"#
    )
    .unwrap();

    let config = AgentConfig::from_file(file.path()).unwrap();
    assert_eq!(config.cache.cache_size_upper_bound, 100 * 1024 * 1024);
    assert_eq!(config.sender.time_sync_probe_count, 5);
    assert_eq!(config.watchdog.default_sleep, Duration::from_secs(5));
}

#[test]
fn invalid_files_are_rejected_with_typed_errors() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "this is not toml at all [").unwrap();
    assert!(matches!(
        AgentConfig::from_file(file.path()),
        Err(ConfigError::ParseError(_))
    ));

    assert!(matches!(
        AgentConfig::from_file("/nonexistent/vantage.toml"),
        Err(ConfigError::FileError(_))
    ));
}

#[test]
fn validation_runs_on_loaded_files() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
collector_url = "https://collector.example.com/collect"
application_id = "app-1"

[cache]
cache_size_lower_bound = 2000
cache_size_upper_bound = 1000
"#
    )
    .unwrap();

    assert!(matches!(
        AgentConfig::from_file(file.path()),
        Err(ConfigError::InvalidConfig(_))
    ));
}
