//! Network configuration derived from the application config.

use std::time::Duration;

use crate::config::AppConfig;

/// Settings the network module needs to bind and serve.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Grace period for draining in-flight requests at shutdown.
    pub shutdown_timeout: Duration,
    /// Static bearer key; empty disables authentication.
    pub api_key: String,
}

impl NetworkConfig {
    /// Extracts the network slice of the application config.
    #[must_use]
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            request_timeout: config.server.request_timeout(),
            shutdown_timeout: config.server.shutdown_timeout(),
            api_key: config.auth.api_key.clone(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            request_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            api_key: String::new(),
        }
    }
}
