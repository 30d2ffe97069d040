//! Server configuration
//!
//! The binary fills a [`ServerConfig`] from command-line flags; tests and
//! embedders build one directly.

use crate::{DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;

pub use crate::timer::WheelConfig;

/// Everything the server needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Cap on concurrent clients. `None` means unlimited.
    pub max_connections: Option<usize>,
    /// How long shutdown waits for sessions before aborting them
    pub shutdown_timeout: Duration,
    /// Granularity and size of the expiry timing wheel
    pub wheel: WheelConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_connections: None,
            shutdown_timeout: Duration::from_secs(5),
            wheel: WheelConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
