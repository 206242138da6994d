//! Typed decoding of server-pushed `event` frames.
//!
//! Event payloads are loosely specified, so decoding never fails: a payload
//! that does not match the expected shape is surfaced as [`GatewayEvent::Other`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names pushed by the gateway.
pub mod names {
    pub const CONNECT_CHALLENGE: &str = "connect.challenge";
    pub const AGENT: &str = "agent";
    pub const CHAT: &str = "chat";
    pub const CHAT_DELTA: &str = "chat.delta";
    pub const CHAT_RESULT: &str = "chat.result";
    pub const CHAT_ERROR: &str = "chat.error";
}

/// A decoded gateway event.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Sent by the gateway right after the socket opens; starts authentication.
    ConnectChallenge(ChallengePayload),
    /// Streamed agent activity, discriminated by `stream`.
    Agent(AgentEvent),
    /// Incremental text for the active run.
    ChatDelta(ChatDelta),
    /// Final structured result for the active run.
    ChatResult(Value),
    /// Terminal error for the active run.
    ChatError(Value),
    /// Coarse session-level state transition (`final`, ...).
    Chat(ChatStateEvent),
    Other {
        event: String,
        payload: Option<Value>,
    },
}

impl GatewayEvent {
    /// Decode an event frame by name.
    pub fn decode(event: &str, payload: Option<Value>) -> Self {
        let decoded = match event {
            names::CONNECT_CHALLENGE => Some(Self::ConnectChallenge(
                payload
                    .clone()
                    .and_then(|p| serde_json::from_value(p).ok())
                    .unwrap_or_default(),
            )),
            names::AGENT => payload
                .clone()
                .and_then(|p| serde_json::from_value(p).ok())
                .map(Self::Agent),
            names::CHAT => payload
                .clone()
                .and_then(|p| serde_json::from_value(p).ok())
                .map(Self::Chat),
            names::CHAT_DELTA => Some(Self::ChatDelta(ChatDelta::from_payload(payload.as_ref()))),
            names::CHAT_RESULT => Some(Self::ChatResult(payload.clone().unwrap_or(Value::Null))),
            names::CHAT_ERROR => Some(Self::ChatError(payload.clone().unwrap_or(Value::Null))),
            _ => None,
        };

        decoded.unwrap_or_else(|| {
            if matches!(event, names::AGENT | names::CHAT) {
                tracing::debug!(event, "Event payload did not match expected shape");
            }
            Self::Other {
                event: event.to_string(),
                payload,
            }
        })
    }

    /// The wire name of this event.
    pub fn name(&self) -> &str {
        match self {
            Self::ConnectChallenge(_) => names::CONNECT_CHALLENGE,
            Self::Agent(_) => names::AGENT,
            Self::ChatDelta(_) => names::CHAT_DELTA,
            Self::ChatResult(_) => names::CHAT_RESULT,
            Self::ChatError(_) => names::CHAT_ERROR,
            Self::Chat(_) => names::CHAT,
            Self::Other { event, .. } => event,
        }
    }

    /// The run this event is tagged with, if the gateway tagged it.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            Self::Agent(e) => e.run_id.as_deref(),
            Self::ChatDelta(d) => d.run_id.as_deref(),
            Self::Chat(c) => c.run_id.as_deref(),
            Self::ChatResult(p) | Self::ChatError(p) => p.get("runId").and_then(Value::as_str),
            Self::ConnectChallenge(_) | Self::Other { .. } => None,
        }
    }
}

/// Payload of `connect.challenge`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChallengePayload {
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub ts: Option<Value>,
}

/// Secondary discriminator of `agent` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStream {
    Assistant,
    Lifecycle,
    Tool,
    Other,
}

/// Payload of an `agent` event.
///
/// `seq` and `ts` are kept as raw JSON so their exact type never decides
/// whether the event decodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    #[serde(default)]
    pub run_id: Option<String>,
    pub stream: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub seq: Option<Value>,
    #[serde(default)]
    pub session_key: Option<String>,
    #[serde(default)]
    pub ts: Option<Value>,
}

impl AgentEvent {
    pub fn kind(&self) -> AgentStream {
        match self.stream.as_str() {
            "assistant" => AgentStream::Assistant,
            "lifecycle" => AgentStream::Lifecycle,
            "tool" => AgentStream::Tool,
            _ => AgentStream::Other,
        }
    }

    /// `data.phase` of a lifecycle event (`start`, `end`, `error`).
    pub fn phase(&self) -> Option<&str> {
        self.data.get("phase").and_then(Value::as_str)
    }

    /// `data.text` of an assistant event.
    pub fn assistant_text(&self) -> Option<&str> {
        self.data.get("text").and_then(Value::as_str)
    }

    /// `data.delta` of an assistant event, when the gateway sends increments.
    pub fn assistant_delta(&self) -> Option<&str> {
        self.data.get("delta").and_then(Value::as_str)
    }

    pub fn is_lifecycle_end(&self) -> bool {
        self.kind() == AgentStream::Lifecycle && self.phase() == Some("end")
    }

    pub fn is_lifecycle_error(&self) -> bool {
        self.kind() == AgentStream::Lifecycle && self.phase() == Some("error")
    }
}

/// Payload of `chat.delta`. Text lives in `payload.text` or `payload.output.text`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatDelta {
    pub run_id: Option<String>,
    pub text: String,
}

impl ChatDelta {
    pub fn from_payload(payload: Option<&Value>) -> Self {
        let Some(payload) = payload else {
            return Self::default();
        };
        let text = payload
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .or_else(|| payload.pointer("/output/text").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();
        Self {
            run_id: payload.get("runId").and_then(Value::as_str).map(str::to_string),
            text,
        }
    }
}

/// Payload of a `chat` state event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStateEvent {
    pub state: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub session_key: Option<String>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ChatStateEvent {
    pub fn is_final(&self) -> bool {
        self.state == "final"
    }

    pub fn is_error(&self) -> bool {
        self.state == "error"
    }

    pub fn is_aborted(&self) -> bool {
        self.state == "aborted"
    }
}
