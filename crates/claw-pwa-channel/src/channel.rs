//! The PWA channel descriptor: metadata, capabilities, account lookup and
//! outbound delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::host::EventEmitter;

pub const CHANNEL_ID: &str = "pwa";

const DEFAULT_ACCOUNT: &str = "default";

/// Channel metadata for the host's UI and lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMeta {
    pub id: String,
    pub label: String,
    pub selection_label: String,
    pub docs_path: String,
    pub aliases: Vec<String>,
    pub order: u32,
}

/// What the channel supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCapabilities {
    pub chat_types: Vec<String>,
    pub polls: bool,
    pub threads: bool,
    pub media: bool,
    pub reactions: bool,
    pub edit: bool,
    pub reply: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Messages go straight to the client without queueing.
    Direct,
}

/// Message published for a PWA client on the host event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PwaOutbound {
    #[serde(rename = "type")]
    pub kind: String,
    pub account_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of an outbound send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub ok: bool,
}

/// Per-call context the host passes to outbound operations.
pub struct OutboundContext<'a> {
    /// The resolved account (see [`PwaChannel::resolve_account`]).
    pub account: &'a Value,
    pub events: &'a dyn EventEmitter,
}

impl OutboundContext<'_> {
    fn account_id(&self) -> String {
        self.account
            .get("id")
            .or_else(|| self.account.get("accountId"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ACCOUNT)
            .to_string()
    }
}

/// The PWA channel as registered with the host.
#[derive(Debug, Default, Clone)]
pub struct PwaChannel;

impl PwaChannel {
    pub fn new() -> Self {
        Self
    }

    pub fn id(&self) -> &str {
        CHANNEL_ID
    }

    pub fn meta(&self) -> ChannelMeta {
        ChannelMeta {
            id: CHANNEL_ID.into(),
            label: "PWA".into(),
            selection_label: "PWA (Progressive Web App)".into(),
            docs_path: "/channels/pwa".into(),
            aliases: vec!["pwa".into(), "web".into()],
            order: 100,
        }
    }

    pub fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            chat_types: vec!["direct".into()],
            polls: false,
            threads: true,
            media: true,
            reactions: false,
            edit: true,
            reply: true,
        }
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::Direct
    }

    /// Account ids configured under `channels.pwa.accounts` in the host config.
    pub fn list_account_ids(&self, cfg: &Value) -> Vec<String> {
        cfg.pointer("/channels/pwa/accounts")
            .and_then(Value::as_object)
            .map(|accounts| accounts.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The configured account, or a bare `{accountId}` record when absent.
    ///
    /// An empty id means the `default` account.
    pub fn resolve_account(&self, cfg: &Value, account_id: &str) -> Value {
        let account_id = if account_id.is_empty() {
            DEFAULT_ACCOUNT
        } else {
            account_id
        };
        cfg.pointer("/channels/pwa/accounts")
            .and_then(|accounts| accounts.get(account_id))
            .filter(|account| !account.is_null())
            .cloned()
            .unwrap_or_else(|| json!({ "accountId": account_id }))
    }

    /// Topic a client's outbound messages are published on.
    pub fn outbound_topic(account_id: &str) -> String {
        format!("channel:{CHANNEL_ID}:{account_id}:outbound")
    }

    /// Push text to the client behind `ctx.account`.
    ///
    /// `message` is either a string or an object with a `text` field.
    pub async fn send_text(
        &self,
        ctx: &OutboundContext<'_>,
        message: &Value,
        thread_id: Option<&str>,
    ) -> anyhow::Result<SendReceipt> {
        let content = match message {
            Value::String(text) => text.clone(),
            other => other
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };

        let account_id = ctx.account_id();
        let payload = PwaOutbound {
            kind: "message".into(),
            account_id: account_id.clone(),
            thread_id: thread_id.map(str::to_string),
            content,
            timestamp: Utc::now(),
        };

        let topic = Self::outbound_topic(&account_id);
        debug!(topic = %topic, thread_id = ?thread_id, "Emitting outbound PWA message");
        ctx.events.emit(&topic, serde_json::to_value(&payload)?).await?;

        Ok(SendReceipt { ok: true })
    }

    pub async fn setup(&self) -> anyhow::Result<SendReceipt> {
        info!("PWA channel setup");
        Ok(SendReceipt { ok: true })
    }

    /// Health of one account.
    pub async fn status(&self, account: &Value) -> Value {
        json!({
            "connected": true,
            "status": "ok",
            "account": account,
        })
    }
}
