//! `chat.history` response normalization.
//!
//! Gateways answer `chat.history` either with a bare array of messages or with
//! an object wrapping that array under `messages`. Both shapes are decoded once
//! here, right after the response arrives.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One transcript record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    /// Gateway-specific fields (timestamps, ids, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HistoryMessage {
    /// Plain text of the message. Non-text blocks and unknown shapes are skipped.
    pub fn text(&self) -> String {
        match &self.content {
            Some(MessageContent::Text(text)) => text.clone(),
            Some(MessageContent::Blocks(blocks)) => blocks
                .iter()
                .filter(|b| b.kind.is_empty() || b.kind == "text")
                .filter_map(|b| b.text.as_deref())
                .collect::<Vec<_>>()
                .join(""),
            Some(MessageContent::Other(_)) | None => String::new(),
        }
    }
}

/// Message content: a plain string, a list of blocks, or anything else the
/// gateway sends (kept as raw JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
    Other(Value),
}

/// One content block. An untyped block carrying `text` counts as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The two observed `chat.history` payload shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HistoryPayload {
    Messages(Vec<HistoryMessage>),
    Wrapped {
        #[serde(default)]
        messages: Vec<HistoryMessage>,
    },
}

impl HistoryPayload {
    pub fn into_messages(self) -> Vec<HistoryMessage> {
        match self {
            Self::Messages(messages) | Self::Wrapped { messages } => messages,
        }
    }
}

/// Normalize a `chat.history` response payload into an ordered message list.
///
/// A missing or `null` payload is an empty history, not an error.
pub fn normalize_history(payload: Option<Value>) -> serde_json::Result<Vec<HistoryMessage>> {
    match payload {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => Ok(serde_json::from_value::<HistoryPayload>(value)?.into_messages()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!([
            {"role": "user", "content": "你好"},
            {"role": "assistant", "content": [{"type": "text", "text": "Hello"}, {"type": "text", "text": "!"}], "timestamp": 17}
        ])
    }

    #[test]
    fn test_bare_and_wrapped_normalize_identically() {
        let bare = normalize_history(Some(sample())).unwrap();
        let wrapped =
            normalize_history(Some(json!({"sessionKey": "global", "messages": sample()}))).unwrap();
        assert_eq!(bare, wrapped);
        assert_eq!(bare.len(), 2);
        assert_eq!(bare[0].role, "user");
        assert_eq!(bare[1].role, "assistant");
    }

    #[test]
    fn test_text_flattens_blocks() {
        let messages = normalize_history(Some(sample())).unwrap();
        assert_eq!(messages[0].text(), "你好");
        assert_eq!(messages[1].text(), "Hello!");
        assert_eq!(messages[1].extra.get("timestamp"), Some(&json!(17)));
    }

    #[test]
    fn test_empty_history() {
        assert!(normalize_history(Some(json!([]))).unwrap().is_empty());
        assert!(normalize_history(Some(json!({"messages": []}))).unwrap().is_empty());
        assert!(normalize_history(None).unwrap().is_empty());
        assert!(normalize_history(Some(Value::Null)).unwrap().is_empty());
    }

    #[test]
    fn test_message_without_content() {
        let messages = normalize_history(Some(json!([{"role": "system"}]))).unwrap();
        assert_eq!(messages[0].text(), "");
    }

    #[test]
    fn test_odd_records_do_not_fail_the_history() {
        let bare = normalize_history(Some(json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": [{"text": "x"}, {"type": "image", "url": "a.png"}]}
        ])))
        .unwrap();
        assert_eq!(bare.len(), 2);
        assert_eq!(bare[1].text(), "x");

        let wrapped = normalize_history(Some(json!({"messages": [
            {"role": "user", "content": "run it"},
            {"role": "tool", "content": {"result": 1}},
            {"role": "assistant", "content": [1, "two"]}
        ]})))
        .unwrap();
        assert_eq!(wrapped.len(), 3);
        assert_eq!(wrapped[0].text(), "run it");
        assert_eq!(
            wrapped[1].content,
            Some(MessageContent::Other(json!({"result": 1})))
        );
        assert_eq!(wrapped[1].text(), "");
        assert_eq!(wrapped[2].text(), "");
    }

    #[test]
    fn test_scalar_payload_rejected() {
        assert!(normalize_history(Some(json!(42))).is_err());
    }
}
