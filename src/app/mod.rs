pub mod agent;
pub mod config;
pub mod logging;

pub use agent::Agent;
pub use config::{AgentConfig, ConfigError};
pub use logging::init_logging;
