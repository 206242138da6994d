//! The single dispatch loop and the ordered event stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, trace, warn};

use claw_pwa_core::error::{ClawPwaError, Result};
use claw_pwa_core::events::GatewayEvent;
use claw_pwa_core::protocol::GatewayFrame;

use crate::client::Hello;
use crate::correlation::{Correlator, ResponseOutcome};
use crate::state::{ConnectionState, Handshake, HandshakeOutcome};

/// Gateway events in arrival order. Ends when the connection closes.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<GatewayEvent>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<GatewayEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the connection is gone and the backlog is drained.
    pub async fn next(&mut self) -> Option<GatewayEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = GatewayEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Owns the read half of the socket. Every inbound frame passes through here.
pub(crate) struct Dispatcher {
    handshake: Handshake,
    handshake_tx: Option<oneshot::Sender<Result<Hello>>>,
    correlator: Arc<Mutex<Correlator>>,
    state_tx: watch::Sender<ConnectionState>,
    outbound: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedSender<GatewayEvent>,
}

impl Dispatcher {
    pub(crate) fn new(
        handshake: Handshake,
        handshake_tx: oneshot::Sender<Result<Hello>>,
        correlator: Arc<Mutex<Correlator>>,
        state_tx: watch::Sender<ConnectionState>,
        outbound: mpsc::UnboundedSender<Message>,
        events: mpsc::UnboundedSender<GatewayEvent>,
    ) -> Self {
        Self {
            handshake,
            handshake_tx: Some(handshake_tx),
            correlator,
            state_tx,
            outbound,
            events,
        }
    }

    pub(crate) async fn run<S>(mut self, mut incoming: S)
    where
        S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    {
        self.set_state(ConnectionState::AwaitingChallenge);
        let mut failure = None;

        while let Some(msg) = incoming.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Flow::Stop = self.handle_text(text.as_str()).await {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Gateway closed the connection");
                    break;
                }
                Ok(Message::Binary(_)) => debug!("Ignoring binary frame"),
                Ok(_) => {}
                Err(e) => {
                    warn!(%e, "WebSocket error");
                    failure = Some(e.to_string());
                    break;
                }
            }
        }

        self.shutdown(failure).await;
    }

    async fn handle_text(&mut self, text: &str) -> Flow {
        let frame = match serde_json::from_str::<GatewayFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%e, "Invalid frame received");
                return Flow::Continue;
            }
        };

        match frame {
            GatewayFrame::Event { event, payload, seq, .. } => {
                trace!(event = %event, ?seq, "Event received");
                match GatewayEvent::decode(&event, payload) {
                    GatewayEvent::ConnectChallenge(_) => self.on_challenge().await,
                    other => {
                        // The stream owner may have gone away; events are then dropped.
                        let _ = self.events.send(other);
                        Flow::Continue
                    }
                }
            }
            GatewayFrame::Response { id, ok, payload, error, .. } => {
                if self.handshake.expects(&id) {
                    return self.on_connect_response(&id, ok, payload, error);
                }
                self.correlator
                    .lock()
                    .await
                    .resolve(&id, ResponseOutcome { ok, payload, error });
                Flow::Continue
            }
            GatewayFrame::Request { id, method, .. } => {
                debug!(id, method, "Ignoring server-sent request");
                Flow::Continue
            }
        }
    }

    async fn on_challenge(&mut self) -> Flow {
        let frame = {
            let mut correlator = self.correlator.lock().await;
            self.handshake.on_challenge(&mut correlator)
        };
        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => return Flow::Continue,
            Err(e) => {
                warn!(error = %e, "Cannot encode connect params");
                self.set_state(self.handshake.state().clone());
                self.finish_handshake(Err(ClawPwaError::Json(e)));
                return Flow::Stop;
            }
        };

        match serde_json::to_string(&frame) {
            Ok(text) => {
                debug!("Challenge received, sending connect");
                if self.outbound.send(Message::Text(text.into())).is_err() {
                    return Flow::Stop;
                }
                self.set_state(ConnectionState::Authenticating);
                Flow::Continue
            }
            Err(e) => {
                self.finish_handshake(Err(ClawPwaError::Json(e)));
                Flow::Stop
            }
        }
    }

    fn on_connect_response(
        &mut self,
        id: &str,
        ok: bool,
        payload: Option<serde_json::Value>,
        error: Option<claw_pwa_core::protocol::ErrorShape>,
    ) -> Flow {
        match self.handshake.on_response(id, ok, payload, error) {
            Some(HandshakeOutcome::Ready { hello, raw }) => {
                info!(
                    protocol = ?hello.protocol,
                    server = ?hello.server.as_ref().and_then(|s| s.version.clone()),
                    "Connected to gateway"
                );
                self.set_state(ConnectionState::Ready);
                self.finish_handshake(Ok(Hello { info: hello, raw }));
                Flow::Continue
            }
            Some(HandshakeOutcome::Rejected(error)) => {
                warn!(%error, "Gateway rejected connect");
                self.set_state(ConnectionState::Failed(error.to_string()));
                self.finish_handshake(Err(ClawPwaError::Auth(error)));
                let _ = self.outbound.send(Message::Close(None));
                Flow::Stop
            }
            None => Flow::Continue,
        }
    }

    fn finish_handshake(&mut self, result: Result<Hello>) {
        if let Some(tx) = self.handshake_tx.take() {
            let _ = tx.send(result);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(%state, "Connection state");
        self.state_tx.send_replace(state);
    }

    async fn shutdown(mut self, failure: Option<String>) {
        let failed = self
            .correlator
            .lock()
            .await
            .fail_all(|| match &failure {
                Some(reason) => ClawPwaError::Transport(reason.clone()),
                None => ClawPwaError::Closed,
            });
        if failed > 0 {
            debug!(failed, "Pending requests failed on shutdown");
        }

        self.finish_handshake(Err(match &failure {
            Some(reason) => ClawPwaError::Transport(reason.clone()),
            None => ClawPwaError::Closed,
        }));

        if !self.state_tx.borrow().is_terminal() {
            self.set_state(match failure {
                Some(reason) => ConnectionState::Failed(reason),
                None => ConnectionState::Closed,
            });
        }

        let _ = self.outbound.send(Message::Close(None));
        info!("Gateway connection closed");
    }
}

/// Owns the write half of the socket.
pub(crate) async fn write_loop<K>(mut sink: K, mut rx: mpsc::UnboundedReceiver<Message>)
where
    K: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = sink.send(msg).await {
            debug!(%e, "Write failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}
