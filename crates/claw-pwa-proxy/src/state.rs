//! Shared proxy state.

use std::time::Duration;

use claw_pwa_core::config::{Config, ServerConfig};

/// Origin presented to the gateway on every upstream dial.
pub const UPSTREAM_ORIGIN: &str = "http://localhost";

/// Everything a request handler needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ProxyState {
    pub gateway_url: String,
    /// Injected into every `connect` request. `None` leaves requests untouched.
    pub token: Option<String>,
    pub client_id: String,
    pub server: ServerConfig,
    pub dial_timeout: Duration,
}

impl ProxyState {
    pub fn from_config(config: &Config) -> Self {
        Self {
            gateway_url: config.gateway_url(),
            token: config.gateway_token(),
            client_id: config.client().id,
            server: config.server(),
            dial_timeout: Duration::from_secs(10),
        }
    }
}
