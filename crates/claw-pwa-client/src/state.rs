//! Connection and authentication state machine.

use std::fmt;

use serde_json::Value;

use claw_pwa_core::protocol::{methods, ConnectParams, ErrorShape, GatewayFrame, HelloOk};

use crate::correlation::Correlator;

/// Lifecycle of one gateway connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket open; the client waits for `connect.challenge` and does not speak first.
    AwaitingChallenge,
    /// `connect` sent, waiting for its response.
    Authenticating,
    Ready,
    Closed,
    Failed(String),
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::AwaitingChallenge => f.write_str("awaiting_challenge"),
            Self::Authenticating => f.write_str("authenticating"),
            Self::Ready => f.write_str("ready"),
            Self::Closed => f.write_str("closed"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Result of the `connect` exchange.
#[derive(Debug, Clone)]
pub enum HandshakeOutcome {
    Ready { hello: HelloOk, raw: Option<Value> },
    Rejected(ErrorShape),
}

/// Pure transition logic for the challenge → connect → ready exchange.
pub struct Handshake {
    params: ConnectParams,
    state: ConnectionState,
    connect_id: Option<String>,
}

impl Handshake {
    pub fn new(params: ConnectParams) -> Self {
        Self {
            params,
            state: ConnectionState::AwaitingChallenge,
            connect_id: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// React to `connect.challenge`: build the `connect` request.
    ///
    /// Only the first challenge counts; later ones return `Ok(None)`. If the
    /// params cannot be serialized the handshake fails instead of sending a
    /// `connect` without them.
    pub fn on_challenge(
        &mut self,
        correlator: &mut Correlator,
    ) -> serde_json::Result<Option<GatewayFrame>> {
        if self.state != ConnectionState::AwaitingChallenge {
            tracing::debug!(state = %self.state, "Ignoring repeated connect.challenge");
            return Ok(None);
        }
        let params = match serde_json::to_value(&self.params) {
            Ok(params) => params,
            Err(e) => {
                self.state = ConnectionState::Failed(format!("invalid connect params: {e}"));
                return Err(e);
            }
        };
        let id = correlator.allocate_id();
        self.connect_id = Some(id.clone());
        self.state = ConnectionState::Authenticating;
        Ok(Some(GatewayFrame::request(id, methods::CONNECT, Some(params))))
    }

    /// True if `id` is the outstanding `connect` request.
    pub fn expects(&self, id: &str) -> bool {
        self.state == ConnectionState::Authenticating && self.connect_id.as_deref() == Some(id)
    }

    /// React to the response of the `connect` request.
    ///
    /// Returns `None` when `id` is not the outstanding `connect`.
    pub fn on_response(
        &mut self,
        id: &str,
        ok: bool,
        payload: Option<Value>,
        error: Option<ErrorShape>,
    ) -> Option<HandshakeOutcome> {
        if !self.expects(id) {
            return None;
        }
        self.connect_id = None;

        if ok {
            self.state = ConnectionState::Ready;
            let hello = payload
                .clone()
                .and_then(|p| serde_json::from_value::<HelloOk>(p).ok())
                .unwrap_or_default();
            Some(HandshakeOutcome::Ready { hello, raw: payload })
        } else {
            let error = error.unwrap_or_else(|| ErrorShape::new("unauthorized", "connect rejected"));
            self.state = ConnectionState::Failed(error.to_string());
            Some(HandshakeOutcome::Rejected(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claw_pwa_core::protocol::ClientInfo;
    use serde_json::json;

    fn handshake() -> Handshake {
        Handshake::new(ConnectParams::new(
            ClientInfo {
                id: "webchat-ui".into(),
                display_name: None,
                version: Some("0.1.0".into()),
                platform: Some("web".into()),
                mode: Some("webchat".into()),
            },
            Some("tok".into()),
        ))
    }

    #[test]
    fn test_challenge_builds_connect_request() {
        let mut hs = handshake();
        let mut correlator = Correlator::new();
        let frame = hs.on_challenge(&mut correlator).unwrap().expect("connect frame");
        match frame {
            GatewayFrame::Request { id, method, params } => {
                assert_eq!(id, "1");
                assert_eq!(method, "connect");
                let params = params.unwrap();
                assert_eq!(params["minProtocol"], 3);
                assert_eq!(params["auth"]["token"], "tok");
                assert_eq!(params["client"]["id"], "webchat-ui");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(hs.state(), &ConnectionState::Authenticating);
    }

    #[test]
    fn test_second_challenge_ignored() {
        let mut hs = handshake();
        let mut correlator = Correlator::new();
        assert!(hs.on_challenge(&mut correlator).unwrap().is_some());
        assert!(hs.on_challenge(&mut correlator).unwrap().is_none());
        assert_eq!(correlator.allocate_id(), "2");
    }

    #[test]
    fn test_ok_response_reaches_ready() {
        let mut hs = handshake();
        let mut correlator = Correlator::new();
        hs.on_challenge(&mut correlator).unwrap();

        // Unrelated ids are not consumed.
        assert!(hs.on_response("7", true, None, None).is_none());

        let outcome = hs
            .on_response(
                "1",
                true,
                Some(json!({"protocol": 3, "server": {"version": "2026.1", "connId": "c1"}})),
                None,
            )
            .unwrap();
        match outcome {
            HandshakeOutcome::Ready { hello, raw } => {
                assert_eq!(hello.protocol, Some(3));
                assert_eq!(hello.server.unwrap().conn_id.as_deref(), Some("c1"));
                assert!(raw.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(hs.state().is_ready());
        assert!(!hs.expects("1"));
    }

    #[test]
    fn test_rejected_response_fails() {
        let mut hs = handshake();
        let mut correlator = Correlator::new();
        hs.on_challenge(&mut correlator).unwrap();
        let outcome = hs
            .on_response("1", false, None, Some(ErrorShape::new("unauthorized", "bad token")))
            .unwrap();
        assert!(matches!(outcome, HandshakeOutcome::Rejected(ref e) if e.message == "bad token"));
        assert!(hs.state().is_terminal());
    }

    #[test]
    fn test_response_before_challenge_ignored() {
        let mut hs = handshake();
        assert!(hs.on_response("1", true, None, None).is_none());
        assert_eq!(hs.state(), &ConnectionState::AwaitingChallenge);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Ready.to_string(), "ready");
        assert_eq!(
            ConnectionState::Failed("boom".into()).to_string(),
            "failed (boom)"
        );
    }
}
