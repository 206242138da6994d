//! End-to-end tests against an in-process fake gateway.

use std::future::Future;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use claw_pwa_client::{ConnectionState, GatewayClient, GatewayOptions, RunStatus, RunWatcher};
use claw_pwa_core::error::ClawPwaError;
use claw_pwa_core::protocol::{ChatSendParams, ClientInfo, ConnectParams};

const TOKEN: &str = "test-token";

type Socket = WebSocketStream<TcpStream>;

async fn recv_json(ws: &mut Socket) -> Option<Value> {
    while let Some(msg) = ws.next().await {
        match msg.ok()? {
            Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
    None
}

async fn send_json(ws: &mut Socket, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Start a gateway that authenticates one client and then runs `script`.
///
/// The connect request is answered `ok` only when it carries [`TOKEN`].
async fn spawn_gateway<F, Fut>(script: F) -> String
where
    F: FnOnce(Socket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        send_json(
            &mut ws,
            json!({"type": "event", "event": "connect.challenge", "payload": {"nonce": "n-1", "ts": 1}}),
        )
        .await;

        let connect = recv_json(&mut ws).await.expect("connect request");
        assert_eq!(connect["type"], "req");
        assert_eq!(connect["method"], "connect");
        assert_eq!(connect["params"]["minProtocol"], 3);
        assert_eq!(connect["params"]["maxProtocol"], 3);

        if connect["params"]["auth"]["token"] == TOKEN {
            send_json(
                &mut ws,
                json!({"type": "res", "id": connect["id"], "ok": true,
                       "payload": {"protocol": 3, "server": {"version": "test", "connId": "c-1"}}}),
            )
            .await;
            script(ws).await;
        } else {
            send_json(
                &mut ws,
                json!({"type": "res", "id": connect["id"], "ok": false,
                       "error": {"code": "unauthorized", "message": "invalid token"}}),
            )
            .await;
            // Anything the client sends after a rejection is a failure.
            if let Some(frame) = recv_json(&mut ws).await {
                panic!("client sent {frame} after rejection");
            }
        }
    });

    format!("ws://{addr}")
}

fn options(url: String, token: &str) -> GatewayOptions {
    let client = ClientInfo {
        id: "webchat-ui".into(),
        display_name: None,
        version: Some("1.0.0".into()),
        platform: Some("web".into()),
        mode: Some("webchat".into()),
    };
    let mut options = GatewayOptions::new(url, ConnectParams::new(client, Some(token.into())));
    options.handshake_timeout = Duration::from_secs(5);
    options
}

#[tokio::test]
async fn test_connect_then_chat_send_streams_run() {
    let url = spawn_gateway(|mut ws| async move {
        let req = recv_json(&mut ws).await.unwrap();
        assert_eq!(req["id"], "2");
        assert_eq!(req["method"], "chat.send");
        assert_eq!(req["params"]["sessionKey"], "global");
        assert_eq!(req["params"]["message"], "hello");
        assert!(req["params"]["idempotencyKey"].is_string());

        send_json(&mut ws, json!({"type": "res", "id": "2", "ok": true, "payload": {"runId": "run-1"}})).await;
        for frame in [
            json!({"type": "event", "event": "agent", "payload": {"runId": "run-1", "stream": "lifecycle", "data": {"phase": "start"}}}),
            json!({"type": "event", "event": "agent", "payload": {"runId": "run-1", "stream": "assistant", "data": {"text": "Hi"}}}),
            json!({"type": "event", "event": "agent", "payload": {"runId": "run-1", "stream": "assistant", "data": {"text": "Hi there"}}}),
            json!({"type": "event", "event": "agent", "payload": {"runId": "run-1", "stream": "lifecycle", "data": {"phase": "end"}}}),
        ] {
            send_json(&mut ws, frame).await;
        }
        let _ = recv_json(&mut ws).await;
    })
    .await;

    let (client, mut events) = GatewayClient::connect(&options(url, TOKEN)).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(client.hello().info.protocol, Some(3));

    let ack = client.chat_send(ChatSendParams::new("global", "hello")).await.unwrap();
    assert_eq!(ack.run_id, "run-1");

    let mut chunks = Vec::new();
    let outcome = RunWatcher::new(Duration::from_secs(5), Duration::from_secs(10))
        .wait(&mut events, &ack.run_id, |piece| chunks.push(piece.to_string()))
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.text, "Hi there");
    assert_eq!(chunks, vec!["Hi", " there"]);
    client.close().await;
}

#[tokio::test]
async fn test_invalid_token_is_auth_error() {
    let url = spawn_gateway(|_ws| async move {}).await;

    match GatewayClient::connect(&options(url, "wrong")).await {
        Err(ClawPwaError::Auth(error)) => {
            assert_eq!(error.code, "unauthorized");
            assert_eq!(error.message, "invalid token");
        }
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("connect should have been rejected"),
    }
}

#[tokio::test]
async fn test_history_empty_and_both_shapes() {
    let url = spawn_gateway(|mut ws| async move {
        let payloads = [
            json!([]),
            json!([{"role": "user", "content": "hi"}, {"role": "assistant", "content": [{"type": "text", "text": "hello"}]}]),
            json!({"messages": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": [{"type": "text", "text": "hello"}]}]}),
        ];
        for payload in payloads {
            let req = recv_json(&mut ws).await.unwrap();
            assert_eq!(req["method"], "chat.history");
            assert_eq!(req["params"], json!({"sessionKey": "global", "limit": 10}));
            send_json(&mut ws, json!({"type": "res", "id": req["id"], "ok": true, "payload": payload})).await;
        }
        let _ = recv_json(&mut ws).await;
    })
    .await;

    let (client, _events) = GatewayClient::connect(&options(url, TOKEN)).await.unwrap();

    assert!(client.chat_history("global", 10).await.unwrap().is_empty());

    let bare = client.chat_history("global", 10).await.unwrap();
    let wrapped = client.chat_history("global", 10).await.unwrap();
    assert_eq!(bare, wrapped);
    assert_eq!(bare.len(), 2);
    assert_eq!(bare[1].role, "assistant");
    assert_eq!(bare[1].text(), "hello");
}

#[tokio::test]
async fn test_out_of_order_responses_and_request_error() {
    let url = spawn_gateway(|mut ws| async move {
        let first = recv_json(&mut ws).await.unwrap();
        let second = recv_json(&mut ws).await.unwrap();
        send_json(&mut ws, json!({"type": "res", "id": second["id"], "ok": true, "payload": {"n": 2}})).await;
        send_json(
            &mut ws,
            json!({"type": "res", "id": first["id"], "ok": false, "error": {"code": "bad_request", "message": "nope"}}),
        )
        .await;
        // A duplicate response for an id already answered is discarded.
        send_json(&mut ws, json!({"type": "res", "id": second["id"], "ok": true, "payload": {"n": 3}})).await;
        let _ = recv_json(&mut ws).await;
    })
    .await;

    let (client, _events) = GatewayClient::connect(&options(url, TOKEN)).await.unwrap();
    let first = client.send_request("sessions.list", None).await.unwrap();
    let second = client.send_request("health", None).await.unwrap();
    assert_eq!(first.id(), "2");
    assert_eq!(second.id(), "3");

    let second = second.wait().await.unwrap();
    assert_eq!(second, Some(json!({"n": 2})));
    match first.wait().await {
        Err(ClawPwaError::Request { method, error }) => {
            assert_eq!(method, "sessions.list");
            assert_eq!(error.code, "bad_request");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(client.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_transport_close_fails_pending_and_aborts_run() {
    let url = spawn_gateway(|mut ws| async move {
        let send = recv_json(&mut ws).await.unwrap();
        send_json(&mut ws, json!({"type": "res", "id": send["id"], "ok": true, "payload": {"runId": "run-9"}})).await;
        send_json(
            &mut ws,
            json!({"type": "event", "event": "chat.delta", "payload": {"runId": "run-9", "text": "part"}}),
        )
        .await;
        // Wait for the history request, then drop the socket without answering.
        let _history = recv_json(&mut ws).await.unwrap();
        drop(ws);
    })
    .await;

    let (client, mut events) = GatewayClient::connect(&options(url, TOKEN)).await.unwrap();
    let ack = client.chat_send(ChatSendParams::new("global", "hello")).await.unwrap();

    let history = client.chat_history("global", 10).await;
    assert!(matches!(
        history,
        Err(ClawPwaError::Closed) | Err(ClawPwaError::Transport(_))
    ));

    let outcome = RunWatcher::new(Duration::from_secs(5), Duration::from_secs(10))
        .wait(&mut events, &ack.run_id, |_| {})
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.text, "part");

    assert!(client.state().is_terminal());
    assert!(matches!(
        client.chat_history("global", 10).await,
        Err(ClawPwaError::Closed)
    ));
}

#[tokio::test]
async fn test_slow_upgrade_counts_against_handshake_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        // Upgrade late, then never send the challenge.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let mut ws = accept_async(stream).await.unwrap();
        let _ = recv_json(&mut ws).await;
    });

    let mut opts = options(format!("ws://{addr}"), TOKEN);
    opts.handshake_timeout = Duration::from_millis(600);

    let started = std::time::Instant::now();
    let err = GatewayClient::connect(&opts).await.err().unwrap();
    let elapsed = started.elapsed();
    assert!(matches!(err, ClawPwaError::Timeout(_)), "{err:?}");
    assert!(elapsed < Duration::from_millis(900), "took {elapsed:?}");
}
