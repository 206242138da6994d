//! Per-connection relay between a browser socket and the gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame as ClientCloseFrame, Message as ClientMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use claw_pwa_client::transport;
use claw_pwa_core::protocol::methods;

use crate::state::{ProxyState, UPSTREAM_ORIGIN};

/// Set `params.auth.token` on a `connect` request frame.
///
/// Returns the rewritten frame, or `None` when `text` is not a `connect`
/// request and must be forwarded as is. Missing `params` or `auth` objects
/// are created; every other field is preserved.
pub fn inject_token(text: &str, token: &str) -> Option<String> {
    let mut frame: Value = serde_json::from_str(text).ok()?;
    let is_connect = frame.get("type").and_then(Value::as_str) == Some("req")
        && frame.get("method").and_then(Value::as_str) == Some(methods::CONNECT);
    if !is_connect {
        return None;
    }

    let params = object_entry(frame.as_object_mut()?, "params")?;
    let auth = object_entry(params, "auth")?;
    auth.insert("token".into(), Value::String(token.to_string()));

    serde_json::to_string(&frame).ok()
}

/// The object under `key`, replacing a missing or non-object value with `{}`.
fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
    let slot = map.entry(key).or_insert_with(|| json!({}));
    if !slot.is_object() {
        *slot = json!({});
    }
    slot.as_object_mut()
}

fn to_upstream(msg: ClientMessage) -> Option<UpstreamMessage> {
    match msg {
        ClientMessage::Text(text) => Some(UpstreamMessage::Text(text.as_str().to_owned().into())),
        ClientMessage::Binary(data) => Some(UpstreamMessage::Binary(data)),
        ClientMessage::Close(frame) => Some(UpstreamMessage::Close(frame.map(|f| {
            UpstreamCloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason.as_str().to_owned().into(),
            }
        }))),
        // Each side answers its own pings.
        ClientMessage::Ping(_) | ClientMessage::Pong(_) => None,
    }
}

fn to_client(msg: UpstreamMessage) -> Option<ClientMessage> {
    match msg {
        UpstreamMessage::Text(text) => Some(ClientMessage::Text(text.as_str().to_owned().into())),
        UpstreamMessage::Binary(data) => Some(ClientMessage::Binary(data)),
        UpstreamMessage::Close(frame) => Some(ClientMessage::Close(frame.map(|f| {
            ClientCloseFrame {
                code: u16::from(f.code),
                reason: f.reason.as_str().to_owned().into(),
            }
        }))),
        UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_) => None,
    }
}

/// Relay one browser connection until either side goes away.
pub async fn relay(mut client: WebSocket, state: Arc<ProxyState>, peer: Option<SocketAddr>) {
    info!(peer = ?peer, "Client connected");

    let upstream = match transport::dial(
        &state.gateway_url,
        Some(UPSTREAM_ORIGIN),
        state.dial_timeout,
    )
    .await
    {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(gateway = %state.gateway_url, error = %e, "Gateway connection failed");
            let body = json!({
                "type": "error",
                "message": format!("Failed to connect to gateway: {e}"),
            });
            let _ = client.send(ClientMessage::Text(body.to_string().into())).await;
            let _ = client.send(ClientMessage::Close(None)).await;
            return;
        }
    };
    info!(gateway = %state.gateway_url, "Connected to gateway");

    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();
    let cancel = CancellationToken::new();

    let inbound = {
        let cancel = cancel.clone();
        let token = state.token.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = client_rx.next() => msg,
                };
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "Client read error");
                        break;
                    }
                    None => break,
                };

                let closing = matches!(msg, ClientMessage::Close(_));
                let Some(mut out) = to_upstream(msg) else {
                    continue;
                };
                let rewritten = match (&out, &token) {
                    (UpstreamMessage::Text(text), Some(token)) => inject_token(text.as_str(), token),
                    _ => None,
                };
                if let Some(rewritten) = rewritten {
                    debug!("Injected token into connect request");
                    out = UpstreamMessage::Text(rewritten.into());
                }

                trace!(bytes = out.len(), "Client -> Gateway");
                if let Err(e) = upstream_tx.send(out).await {
                    debug!(error = %e, "Gateway write error");
                    break;
                }
                if closing {
                    break;
                }
            }
            cancel.cancel();
            let _ = upstream_tx.close().await;
        })
    };

    let outbound = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = upstream_rx.next() => msg,
                };
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "Gateway read error");
                        break;
                    }
                    None => break,
                };

                let closing = matches!(msg, UpstreamMessage::Close(_));
                trace!(bytes = msg.len(), "Gateway -> Client");
                let Some(out) = to_client(msg) else {
                    continue;
                };
                if let Err(e) = client_tx.send(out).await {
                    debug!(error = %e, "Client write error");
                    break;
                }
                if closing {
                    break;
                }
            }
            cancel.cancel();
            let _ = client_tx.close().await;
        })
    };

    let _ = tokio::join!(inbound, outbound);
    info!(peer = ?peer, "Connection closed");
}
