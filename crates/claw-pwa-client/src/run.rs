//! Tracking one chat run from acceptance to its terminal signal.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use claw_pwa_core::error::{ClawPwaError, Result};
use claw_pwa_core::events::{AgentEvent, AgentStream, ChatStateEvent, GatewayEvent};
use claw_pwa_core::protocol::ErrorShape;

use crate::dispatch::EventStream;

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Completed,
    Failed(ErrorShape),
    /// The gateway aborted the run or the connection went away first.
    Aborted,
}

/// Final state of a run: status plus the accumulated assistant text.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub text: String,
    /// Structured result from `chat.result` or the final `chat` message, if any.
    pub result: Option<Value>,
}

impl RunOutcome {
    /// The assistant text for a completed run, otherwise the run's error.
    pub fn into_result(self) -> Result<String> {
        match self.status {
            RunStatus::Completed => Ok(self.text),
            RunStatus::Failed(error) => Err(ClawPwaError::RunFailed {
                run_id: self.run_id,
                error,
            }),
            RunStatus::Aborted => Err(ClawPwaError::RunFailed {
                run_id: self.run_id,
                error: ErrorShape::new("aborted", "Run was aborted before completing"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextSource {
    Agent,
    ChatDelta,
}

/// Folds the event stream of one run into text and a terminal status.
///
/// Events tagged with a different run id are ignored; untagged events are
/// attributed to this run. The first terminal signal wins.
#[derive(Debug)]
pub struct RunTracker {
    run_id: String,
    text: String,
    source: Option<TextSource>,
    status: Option<RunStatus>,
    result: Option<Value>,
}

impl RunTracker {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            text: String::new(),
            source: None,
            status: None,
            result: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_some()
    }

    /// Apply one event. Returns the text newly appended by it, if any.
    pub fn apply(&mut self, event: &GatewayEvent) -> Option<String> {
        if self.is_finished() {
            return None;
        }
        if let Some(id) = event.run_id() {
            if id != self.run_id {
                debug!(run_id = %self.run_id, other = id, "Ignoring event for another run");
                return None;
            }
        }

        match event {
            GatewayEvent::Agent(agent) => self.on_agent(agent),
            GatewayEvent::ChatDelta(delta) => self.append(TextSource::ChatDelta, &delta.text),
            GatewayEvent::ChatResult(payload) => {
                self.result = Some(payload.clone());
                if self.text.is_empty() {
                    if let Some(text) = result_text(payload) {
                        self.text = text;
                    }
                }
                self.finish(RunStatus::Completed);
                None
            }
            GatewayEvent::ChatError(payload) => {
                let error = payload
                    .get("error")
                    .cloned()
                    .map(ErrorShape::from_value)
                    .unwrap_or_else(|| ErrorShape::from_value(payload.clone()));
                self.finish(RunStatus::Failed(error));
                None
            }
            GatewayEvent::Chat(chat) => {
                self.on_chat_state(chat);
                None
            }
            GatewayEvent::ConnectChallenge(_) | GatewayEvent::Other { .. } => None,
        }
    }

    /// Close out the run when the event stream ends before a terminal signal.
    pub fn abort(&mut self) {
        self.finish(RunStatus::Aborted);
    }

    /// Consume the tracker. A run without a terminal signal is reported as aborted.
    pub fn into_outcome(self) -> RunOutcome {
        RunOutcome {
            run_id: self.run_id,
            status: self.status.unwrap_or(RunStatus::Aborted),
            text: self.text,
            result: self.result,
        }
    }

    fn on_agent(&mut self, agent: &AgentEvent) -> Option<String> {
        match agent.kind() {
            AgentStream::Assistant => {
                if let Some(delta) = agent.assistant_delta() {
                    return self.append(TextSource::Agent, delta);
                }
                let text = agent.assistant_text()?;
                if self.source == Some(TextSource::Agent) && text.starts_with(&self.text) {
                    // Cumulative snapshot: only the unseen suffix is new.
                    let suffix = text[self.text.len()..].to_string();
                    return self.append(TextSource::Agent, &suffix);
                }
                self.append(TextSource::Agent, text)
            }
            AgentStream::Lifecycle => {
                if agent.is_lifecycle_end() {
                    self.finish(RunStatus::Completed);
                } else if agent.is_lifecycle_error() {
                    let error = agent
                        .data
                        .get("error")
                        .cloned()
                        .map(ErrorShape::from_value)
                        .unwrap_or_else(|| ErrorShape::new("agent_error", "Agent run failed"));
                    self.finish(RunStatus::Failed(error));
                }
                None
            }
            AgentStream::Tool | AgentStream::Other => None,
        }
    }

    fn on_chat_state(&mut self, chat: &ChatStateEvent) {
        if chat.is_final() {
            if let Some(message) = &chat.message {
                self.result = Some(message.clone());
                if self.text.is_empty() {
                    if let Some(text) = message_text(message) {
                        self.text = text;
                    }
                }
            }
            self.finish(RunStatus::Completed);
        } else if chat.is_error() {
            let message = chat
                .error_message
                .clone()
                .unwrap_or_else(|| "Chat run failed".to_string());
            self.finish(RunStatus::Failed(ErrorShape::new("chat_error", message)));
        } else if chat.is_aborted() {
            self.finish(RunStatus::Aborted);
        }
    }

    fn append(&mut self, source: TextSource, text: &str) -> Option<String> {
        if text.is_empty() {
            return None;
        }
        match self.source {
            None => self.source = Some(source),
            Some(existing) if existing != source => return None,
            Some(_) => {}
        }
        self.text.push_str(text);
        Some(text.to_string())
    }

    fn finish(&mut self, status: RunStatus) {
        if self.status.is_none() {
            debug!(run_id = %self.run_id, ?status, "Run finished");
            self.status = Some(status);
        }
    }
}

/// Text of a `chat.result` payload: `text`, `output.text`, or `message` content.
fn result_text(payload: &Value) -> Option<String> {
    payload
        .get("text")
        .and_then(Value::as_str)
        .or_else(|| payload.pointer("/output/text").and_then(Value::as_str))
        .map(str::to_string)
        .or_else(|| payload.get("message").and_then(message_text))
}

/// Text of a message value: a string, or `content` as a string or text blocks.
fn message_text(message: &Value) -> Option<String> {
    if let Some(text) = message.as_str() {
        return Some(text.to_string());
    }
    match message.get("content")? {
        Value::String(text) => Some(text.clone()),
        Value::Array(blocks) => {
            let text: String = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}

/// Waits for a run to finish on an [`EventStream`], with idle and overall limits.
#[derive(Debug, Clone, Copy)]
pub struct RunWatcher {
    idle: Duration,
    overall: Duration,
}

impl RunWatcher {
    pub fn new(idle: Duration, overall: Duration) -> Self {
        Self { idle, overall }
    }

    /// Consume events until the run finishes.
    ///
    /// `on_text` is called with each newly appended piece of assistant text.
    /// Fails with [`ClawPwaError::Timeout`] when no event arrives for the idle
    /// window or the run outlives the overall limit.
    pub async fn wait(
        &self,
        events: &mut EventStream,
        run_id: &str,
        mut on_text: impl FnMut(&str),
    ) -> Result<RunOutcome> {
        let mut tracker = RunTracker::new(run_id);
        let deadline = Instant::now() + self.overall;

        while !tracker.is_finished() {
            let now = Instant::now();
            if now >= deadline {
                return Err(ClawPwaError::Timeout(format!(
                    "run {run_id} did not finish within {}s",
                    self.overall.as_secs()
                )));
            }
            let window = self.idle.min(deadline - now);

            match tokio::time::timeout(window, events.next()).await {
                Ok(Some(event)) => {
                    if let Some(piece) = tracker.apply(&event) {
                        on_text(&piece);
                    }
                }
                Ok(None) => {
                    warn!(run_id, "Event stream ended before the run finished");
                    tracker.abort();
                }
                Err(_) if Instant::now() >= deadline => {
                    return Err(ClawPwaError::Timeout(format!(
                        "run {run_id} did not finish within {}s",
                        self.overall.as_secs()
                    )));
                }
                Err(_) => {
                    return Err(ClawPwaError::Timeout(format!(
                        "no events for run {run_id} in {}s",
                        self.idle.as_secs()
                    )));
                }
            }
        }

        Ok(tracker.into_outcome())
    }
}
