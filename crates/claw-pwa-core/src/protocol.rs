//! OpenClaw gateway wire protocol v3, as seen from a client.
//!
//! Every WebSocket text message is one JSON frame tagged by `type`
//! (`req`, `res` or `event`). A `res` answers the `req` whose `id` it echoes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Protocol version spoken by this client (both negotiation bounds).
pub const PROTOCOL_VERSION: u32 = 3;

/// Method names used by this client.
pub mod methods {
    pub const CONNECT: &str = "connect";
    pub const CHAT_SEND: &str = "chat.send";
    pub const CHAT_HISTORY: &str = "chat.history";
}

/// One JSON text message on the gateway socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    /// Sent by the client.
    #[serde(rename = "req")]
    Request {
        id: String,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<serde_json::Value>,
    },

    /// Reply to a request with the same `id`.
    #[serde(rename = "res")]
    Response {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorShape>,
    },

    /// Unsolicited push.
    #[serde(rename = "event")]
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        #[serde(
            default,
            rename = "stateVersion",
            skip_serializing_if = "Option::is_none"
        )]
        state_version: Option<StateVersion>,
    },
}

impl GatewayFrame {
    /// Build a request frame.
    pub fn request(
        id: impl Into<String>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self::Request {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Frame discriminator as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "req",
            Self::Response { .. } => "res",
            Self::Event { .. } => "event",
        }
    }

    /// True for a `req` frame with `method == "connect"`.
    pub fn is_connect_request(&self) -> bool {
        matches!(self, Self::Request { method, .. } if method == methods::CONNECT)
    }
}

/// The `error` object of a failed response.
///
/// Every field is optional on the way in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Build an error shape from an arbitrary JSON value.
    ///
    /// Accepts the structured `{code, message}` form, a bare string, or
    /// anything else (kept in `details`).
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(message) => Self::new("error", message),
            serde_json::Value::Object(_) => match serde_json::from_value::<Self>(value.clone()) {
                Ok(shape) if !shape.code.is_empty() || !shape.message.is_empty() => shape,
                _ => Self {
                    code: "error".into(),
                    message: String::new(),
                    details: Some(value),
                },
            },
            other => Self {
                code: "error".into(),
                message: String::new(),
                details: Some(other),
            },
        }
    }
}

impl fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code.is_empty(), self.message.is_empty()) {
            (false, false) => write!(f, "{}: {}", self.code, self.message),
            (false, true) => f.write_str(&self.code),
            (true, false) => f.write_str(&self.message),
            (true, true) => f.write_str("unknown error"),
        }
    }
}

/// Presence/health counters attached to some events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateVersion {
    #[serde(default)]
    pub presence: u64,
    #[serde(default)]
    pub health: u64,
}

/// Params of the `connect` request, answered to `connect.challenge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client: ClientInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthParams>,
}

impl ConnectParams {
    /// Connect params for this client's protocol version with a bearer token.
    pub fn new(client: ClientInfo, token: Option<String>) -> Self {
        Self {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client,
            caps: Vec::new(),
            role: None,
            auth: token.map(AuthParams::token),
        }
    }
}

/// Client descriptor sent in the `connect` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl AuthParams {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            password: None,
        }
    }
}

/// Gateway metadata returned in the payload of a successful `connect`.
///
/// The exact shape is gateway-defined; everything is optional and the raw
/// payload is kept alongside by the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    #[serde(default)]
    pub protocol: Option<u32>,
    #[serde(default)]
    pub server: Option<ServerInfo>,
    #[serde(default)]
    pub features: Option<Features>,
    #[serde(default)]
    pub policy: Option<Policy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub conn_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub max_payload: Option<usize>,
    #[serde(default)]
    pub max_buffered_bytes: Option<usize>,
    #[serde(default)]
    pub tick_interval_ms: Option<u64>,
}

/// `thinking` accepts either a boolean switch or a named mode such as `"auto"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThinkingMode {
    Enabled(bool),
    Mode(String),
}

impl Default for ThinkingMode {
    fn default() -> Self {
        Self::Mode("auto".into())
    }
}

impl From<&str> for ThinkingMode {
    /// `"true"` / `"false"` map to the boolean form, anything else is a mode name.
    fn from(value: &str) -> Self {
        match value {
            "true" => Self::Enabled(true),
            "false" => Self::Enabled(false),
            other => Self::Mode(other.to_string()),
        }
    }
}

/// Parameters of `chat.send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendParams {
    pub session_key: String,
    pub message: String,
    #[serde(default)]
    pub thinking: ThinkingMode,
    #[serde(default)]
    pub deliver: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl ChatSendParams {
    pub fn new(session_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            message: message.into(),
            thinking: ThinkingMode::default(),
            deliver: true,
            idempotency_key: None,
        }
    }
}

/// Payload of a successful `chat.send` response. Acceptance only, not completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendAck {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Parameters of `chat.history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryParams {
    pub session_key: String,
    pub limit: u32,
}
