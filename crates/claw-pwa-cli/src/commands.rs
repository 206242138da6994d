//! Subcommand implementations.

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde_json::json;
use tracing::{info, warn};

use claw_pwa_channel::{PluginConfig, PluginMeta, PwaChannel};
use claw_pwa_client::{GatewayClient, GatewayOptions, RunStatus, RunWatcher};
use claw_pwa_core::config::Config;
use claw_pwa_core::protocol::{ChatSendParams, ThinkingMode};
use claw_pwa_proxy::ProxyState;

pub async fn serve(config: &Config) -> anyhow::Result<()> {
    let state = Arc::new(ProxyState::from_config(config));
    if state.token.is_none() {
        warn!("No gateway token configured; connect requests are relayed unchanged");
    }
    claw_pwa_proxy::start_proxy(state).await
}

/// Overrides for a single `chat` invocation.
pub struct ChatArgs {
    pub message: String,
    pub session: Option<String>,
    pub thinking: Option<String>,
    pub no_deliver: bool,
}

pub async fn chat(config: &Config, args: ChatArgs) -> anyhow::Result<()> {
    let chat = config.chat();
    let (client, mut events) = GatewayClient::connect(&GatewayOptions::from_config(config))
        .await
        .context("Failed to connect to gateway")?;

    let mut params = ChatSendParams::new(
        args.session.unwrap_or_else(|| chat.session_key.clone()),
        args.message,
    );
    params.thinking = args
        .thinking
        .as_deref()
        .map(ThinkingMode::from)
        .unwrap_or_else(|| chat.thinking_mode());
    params.deliver = chat.deliver && !args.no_deliver;

    let ack = client.chat_send(params).await?;

    let mut stdout = std::io::stdout();
    let outcome = RunWatcher::new(chat.idle_timeout(), chat.run_timeout())
        .wait(&mut events, &ack.run_id, |piece| {
            let _ = stdout.write_all(piece.as_bytes());
            let _ = stdout.flush();
        })
        .await?;
    println!();

    info!(run_id = %outcome.run_id, status = ?outcome.status, "Run finished");
    client.close().await;

    if outcome.status == RunStatus::Aborted {
        warn!(run_id = %outcome.run_id, "Run ended without a completion signal");
    }
    outcome.into_result()?;
    Ok(())
}

pub async fn history(
    config: &Config,
    session: Option<String>,
    limit: Option<u32>,
    as_json: bool,
) -> anyhow::Result<()> {
    let chat = config.chat();
    let session = session.unwrap_or(chat.session_key);
    let limit = limit.unwrap_or(chat.history_limit);

    let (client, _events) = GatewayClient::connect(&GatewayOptions::from_config(config))
        .await
        .context("Failed to connect to gateway")?;
    let messages = client.chat_history(&session, limit).await?;
    client.close().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }
    if messages.is_empty() {
        println!("(no messages in session {session})");
    }
    for message in &messages {
        println!("{}: {}", message.role, message.text());
    }
    Ok(())
}

pub async fn probe(config: &Config) -> anyhow::Result<()> {
    let url = config.gateway_url();
    let (client, _events) = GatewayClient::connect(&GatewayOptions::from_config(config))
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;

    let hello = client.hello();
    println!("Gateway: {url}");
    println!("State: {}", client.state());
    if let Some(protocol) = hello.info.protocol {
        println!("Protocol: {protocol}");
    }
    if let Some(server) = &hello.info.server {
        println!("Server version: {}", server.version.as_deref().unwrap_or("unknown"));
        if let Some(conn_id) = &server.conn_id {
            println!("Connection: {conn_id}");
        }
    }
    if let Some(raw) = &hello.raw {
        println!("{}", serde_json::to_string_pretty(raw)?);
    }
    client.close().await;
    Ok(())
}

pub fn config_show(config: &Config) -> anyhow::Result<()> {
    let mut value = serde_json::to_value(config)?;
    if let Some(token) = value.pointer_mut("/gateway/token") {
        if token.is_string() {
            *token = json!("***");
        }
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

pub fn config_get(config: &Config, key: &str) -> anyhow::Result<()> {
    match config.get_path(key) {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => bail!("No config value at {key}"),
    }
    Ok(())
}

pub fn config_validate(config: &Config) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for warning in &warnings {
        println!("warning: {warning}");
    }
    for error in &errors {
        println!("error: {error}");
    }
    if !errors.is_empty() {
        bail!("Config has {} error(s)", errors.len());
    }
    println!("Config OK");
    Ok(())
}

/// Print the channel descriptor a plugin host would register.
pub fn channel_describe() -> anyhow::Result<()> {
    let channel = PwaChannel::new();
    let descriptor = json!({
        "plugin": PluginMeta::current(),
        "id": channel.id(),
        "meta": channel.meta(),
        "capabilities": channel.capabilities(),
        "deliveryMode": channel.delivery_mode(),
        "defaultConfig": PluginConfig::default(),
    });
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}
