//! What the plugin needs from the gateway that hosts it.

use async_trait::async_trait;
use serde::Serialize;

use crate::channel::{ChannelCapabilities, ChannelMeta};
use crate::plugin::PluginConfig;

/// The host's event bus. Outbound channel messages are published here.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn emit(&self, topic: &str, payload: serde_json::Value) -> anyhow::Result<()>;
}

/// Registration surface exposed by the gateway to plugins.
pub trait HostApi: Send + Sync {
    /// WebSocket URL of the gateway, if the host advertises one.
    fn ws_url(&self) -> Option<String> {
        None
    }

    fn register_channel(&self, registration: ChannelRegistration) -> anyhow::Result<()>;
}

/// Everything the host learns about the channel at registration time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRegistration {
    pub id: String,
    /// Transport the host should accept clients over (always `websocket`).
    #[serde(rename = "type")]
    pub transport: String,
    pub meta: ChannelMeta,
    pub capabilities: ChannelCapabilities,
    pub config: PluginConfig,
    /// Gateway the channel's clients talk to.
    pub gateway_url: String,
}
