//! WebSocket dialing.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use claw_pwa_core::error::{ClawPwaError, Result};

pub type GatewayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket to the gateway, optionally presenting an `Origin` header.
pub async fn dial(url: &str, origin: Option<&str>, timeout: Duration) -> Result<GatewayStream> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ClawPwaError::Config(format!("Invalid gateway URL {url}: {e}")))?;

    if let Some(origin) = origin {
        let value = HeaderValue::from_str(origin)
            .map_err(|e| ClawPwaError::Config(format!("Invalid origin {origin}: {e}")))?;
        request.headers_mut().insert(ORIGIN, value);
    }

    debug!(url, "Dialing gateway");
    let (stream, response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| ClawPwaError::Timeout(format!("WebSocket handshake with {url}")))?
        .map_err(|e| ClawPwaError::Transport(format!("Failed to connect to {url}: {e}")))?;

    debug!(url, status = %response.status(), "WebSocket established");
    Ok(stream)
}
