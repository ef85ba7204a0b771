use thiserror::Error;

/// Top-level error type for the agent runtime.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::app::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Agent already running")]
    AlreadyRunning,

    #[error("Agent not running")]
    NotRunning,

    #[error("Shutdown timeout")]
    ShutdownTimeout,
}
