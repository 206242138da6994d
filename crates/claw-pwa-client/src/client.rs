//! The gateway client: connect, authenticate, and issue requests.

use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info};

use claw_pwa_core::config::Config;
use claw_pwa_core::error::{ClawPwaError, Result};
use claw_pwa_core::history::{normalize_history, HistoryMessage};
use claw_pwa_core::protocol::{
    methods, ChatHistoryParams, ChatSendAck, ChatSendParams, ConnectParams, GatewayFrame, HelloOk,
};

use crate::correlation::{Correlator, ResponseReceiver};
use crate::dispatch::{write_loop, Dispatcher, EventStream};
use crate::state::{ConnectionState, Handshake};
use crate::transport;

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub url: String,
    pub connect: ConnectParams,
    /// Bound on dialing plus the challenge/connect exchange.
    pub handshake_timeout: Duration,
    /// `Origin` header presented on the WebSocket upgrade.
    pub origin: Option<String>,
}

impl GatewayOptions {
    pub fn new(url: impl Into<String>, connect: ConnectParams) -> Self {
        Self {
            url: url.into(),
            connect,
            handshake_timeout: Duration::from_secs(30),
            origin: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.gateway_url(),
            connect: ConnectParams::new(config.client().client_info(), config.gateway_token()),
            handshake_timeout: config.gateway_timeout(),
            origin: None,
        }
    }
}

/// Gateway metadata from the successful `connect` response.
#[derive(Debug, Clone)]
pub struct Hello {
    pub info: HelloOk,
    /// The payload exactly as the gateway sent it.
    pub raw: Option<Value>,
}

/// A sent request whose response has not arrived yet.
#[must_use = "a pending response does nothing unless awaited"]
pub struct PendingResponse {
    id: String,
    method: String,
    rx: ResponseReceiver,
}

impl PendingResponse {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Wait for the response payload. `ok:false` becomes [`ClawPwaError::Request`].
    pub async fn wait(self) -> Result<Option<Value>> {
        let outcome = self.rx.await.map_err(|_| ClawPwaError::Closed)??;
        outcome.into_result(&self.method)
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<Option<Value>> {
        let what = format!("response to {} (id {})", self.method, self.id);
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| ClawPwaError::Timeout(what))?
    }
}

/// One authenticated connection to the gateway.
///
/// Requests may be issued concurrently from shared references; responses are
/// matched by id regardless of arrival order. Dropping the client closes the
/// connection.
pub struct GatewayClient {
    correlator: Arc<Mutex<Correlator>>,
    outbound: mpsc::UnboundedSender<Message>,
    state_rx: watch::Receiver<ConnectionState>,
    hello: Hello,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl GatewayClient {
    /// Dial the gateway and complete the handshake.
    ///
    /// Returns once the connection is `Ready`, together with the stream of all
    /// non-handshake events in arrival order. `handshake_timeout` bounds dialing
    /// and authentication together.
    pub async fn connect(options: &GatewayOptions) -> Result<(Self, EventStream)> {
        info!(url = %options.url, client = %options.connect.client.id, "Connecting to gateway");
        let deadline = Instant::now() + options.handshake_timeout;
        let socket = transport::dial(
            &options.url,
            options.origin.as_deref(),
            options.handshake_timeout,
        )
        .await?;
        Self::start_until(socket, options.connect.clone(), deadline, options.handshake_timeout).await
    }

    /// Run the protocol over an already-open socket.
    pub async fn start<S>(
        socket: S,
        params: ConnectParams,
        handshake_timeout: Duration,
    ) -> Result<(Self, EventStream)>
    where
        S: Stream<Item = std::result::Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin
            + Send
            + 'static,
    {
        let deadline = Instant::now() + handshake_timeout;
        Self::start_until(socket, params, deadline, handshake_timeout).await
    }

    async fn start_until<S>(
        socket: S,
        params: ConnectParams,
        deadline: Instant,
        handshake_timeout: Duration,
    ) -> Result<(Self, EventStream)>
    where
        S: Stream<Item = std::result::Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin
            + Send
            + 'static,
    {
        let (sink, stream) = socket.split();

        let correlator = Arc::new(Mutex::new(Correlator::new()));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (handshake_tx, handshake_rx) = oneshot::channel();

        let dispatcher = Dispatcher::new(
            Handshake::new(params),
            handshake_tx,
            correlator.clone(),
            state_tx,
            outbound_tx.clone(),
            events_tx,
        );

        let writer = tokio::spawn(write_loop(sink, outbound_rx));
        let reader = tokio::spawn(dispatcher.run(stream));

        let hello = match tokio::time::timeout_at(deadline, handshake_rx).await {
            Ok(Ok(Ok(hello))) => hello,
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(_)) => return Err(ClawPwaError::Closed),
            Err(_) => {
                let _ = outbound_tx.send(Message::Close(None));
                reader.abort();
                return Err(ClawPwaError::Timeout(format!(
                    "gateway handshake did not complete within {}s",
                    handshake_timeout.as_secs()
                )));
            }
        };

        let client = Self {
            correlator,
            outbound: outbound_tx,
            state_rx,
            hello,
            reader,
            writer,
        };
        Ok((client, EventStream::new(events_rx)))
    }

    /// Send a request and return a handle for its response.
    ///
    /// Returns as soon as the frame is queued for transmission.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<PendingResponse> {
        let state = self.state();
        if state.is_terminal() {
            return Err(ClawPwaError::Closed);
        }
        if !state.is_ready() {
            debug!(method, %state, "Refusing request before handshake completes");
            return Err(ClawPwaError::NotReady(state.to_string()));
        }

        let mut correlator = self.correlator.lock().await;
        let (id, rx) = correlator.register(method)?;
        let text = serde_json::to_string(&GatewayFrame::request(id.clone(), method, params))?;

        if self.outbound.send(Message::Text(text.into())).is_err() {
            correlator.cancel(&id);
            return Err(ClawPwaError::Closed);
        }
        debug!(id, method, "Request sent");

        Ok(PendingResponse {
            id,
            method: method.to_string(),
            rx,
        })
    }

    /// Send a request and wait for its payload.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Option<Value>> {
        self.send_request(method, params).await?.wait().await
    }

    /// Send a request and decode its payload into `T`.
    pub async fn request_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let payload = self.request(method, params).await?;
        serde_json::from_value(payload.unwrap_or(Value::Null)).map_err(|e| {
            ClawPwaError::Protocol(format!("unexpected {method} response payload: {e}"))
        })
    }

    /// Start a chat run. The ack only means the gateway accepted the message;
    /// progress arrives on the [`EventStream`].
    pub async fn chat_send(&self, mut params: ChatSendParams) -> Result<ChatSendAck> {
        if params.idempotency_key.is_none() {
            params.idempotency_key = Some(uuid::Uuid::new_v4().to_string());
        }
        let ack: ChatSendAck = self
            .request_typed(methods::CHAT_SEND, Some(serde_json::to_value(&params)?))
            .await?;
        info!(run_id = %ack.run_id, session_key = %params.session_key, "Chat run accepted");
        Ok(ack)
    }

    /// Fetch session history, oldest first. An empty session yields an empty vec.
    pub async fn chat_history(&self, session_key: &str, limit: u32) -> Result<Vec<HistoryMessage>> {
        let params = ChatHistoryParams {
            session_key: session_key.to_string(),
            limit,
        };
        let payload = self
            .request(methods::CHAT_HISTORY, Some(serde_json::to_value(&params)?))
            .await?;
        normalize_history(payload).map_err(|e| {
            ClawPwaError::Protocol(format!("unexpected chat.history response payload: {e}"))
        })
    }

    pub fn hello(&self) -> &Hello {
        &self.hello
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// A receiver that observes every later state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Close the connection and wait for the dispatch loop to wind down.
    pub async fn close(mut self) {
        let _ = self.outbound.send(Message::Close(None));
        let _ = (&mut self.writer).await;
        // The read half ends once the peer acknowledges the close.
        if tokio::time::timeout(Duration::from_secs(5), &mut self.reader)
            .await
            .is_err()
        {
            self.reader.abort();
        }
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        let _ = self.outbound.send(Message::Close(None));
    }
}
