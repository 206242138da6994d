//! Plugin lifecycle: config, initialization, client admission, status.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::channel::{PwaChannel, CHANNEL_ID};
use crate::host::{ChannelRegistration, HostApi};

/// Gateway URL used when the host does not advertise one.
pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";

const CLIENT_ID_HEADER: &str = "x-client-id";
const CLIENT_ID_PARAM: &str = "clientId";
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("PWA channel not initialized")]
    NotInitialized,

    #[error("Channel registration failed: {0}")]
    Registration(anyhow::Error),
}

/// Static plugin metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginMeta {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub author: &'static str,
    pub license: &'static str,
}

impl PluginMeta {
    pub const fn current() -> Self {
        Self {
            name: "pwa-channel",
            version: "0.1.0",
            description: "PWA channel for OpenClaw Gateway",
            author: "ClawPWA",
            license: "MIT",
        }
    }
}

/// Plugin settings, merged by the host from its own config file.
///
/// Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
    pub cors: CorsConfig,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 18789,
            path: "/pwa".into(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub origin: CorsOrigin,
    pub credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origin: CorsOrigin::One("*".into()),
            credentials: true,
        }
    }
}

/// A single origin (possibly `*`) or an allow-list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    One(String),
    Many(Vec<String>),
}

impl CorsOrigin {
    pub fn allows(&self, origin: &str) -> bool {
        match self {
            Self::One(allowed) => allowed == "*" || allowed == origin,
            Self::Many(allowed) => allowed.iter().any(|a| a == "*" || a == origin),
        }
    }
}

/// The parts of an incoming client upgrade request the plugin looks at.
#[derive(Debug, Clone, Default)]
pub struct ClientRequest {
    /// Request target, e.g. `/pwa?clientId=abc`.
    pub url: String,
    /// Header names are matched case-insensitively.
    pub headers: HashMap<String, String>,
}

impl ClientRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn query_param(&self, name: &str) -> Option<String> {
        let (_, query) = self.url.split_once('?')?;
        let query = query.split('#').next().unwrap_or_default();
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

/// Client id for a connection: `clientId` query parameter, then the
/// `x-client-id` header, else a fresh `pwa-<millis>-<9 base36 chars>` id.
pub fn extract_client_id(request: &ClientRequest) -> String {
    if let Some(id) = request.query_param(CLIENT_ID_PARAM).filter(|id| !id.is_empty()) {
        return id;
    }
    if let Some(id) = request.header(CLIENT_ID_HEADER).filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    generate_client_id()
}

fn generate_client_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    format!("pwa-{}-{suffix}", chrono::Utc::now().timestamp_millis())
}

/// Plugin status as reported to the host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatus {
    #[serde(flatten)]
    pub meta: PluginMeta,
    pub enabled: bool,
    pub status: Option<ChannelStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub gateway_url: String,
    pub path: String,
    pub clients: usize,
}

struct ActiveChannel {
    channel: PwaChannel,
    gateway_url: String,
    clients: RwLock<HashSet<String>>,
}

/// Host-owned plugin state. Created with [`PluginContext::new`], brought up by
/// [`init`](Self::init) and torn down by [`shutdown`](Self::shutdown).
pub struct PluginContext {
    config: PluginConfig,
    active: Option<ActiveChannel>,
}

impl PluginContext {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    pub fn channel(&self) -> Option<&PwaChannel> {
        self.active.as_ref().map(|a| &a.channel)
    }

    /// Register the channel with the host. A disabled config leaves the
    /// context uninitialized and registers nothing.
    pub fn init(&mut self, host: &dyn HostApi) -> Result<(), ChannelError> {
        if !self.config.enabled {
            info!("PWA channel disabled, skipping initialization");
            return Ok(());
        }
        if self.active.is_some() {
            debug!("PWA channel already initialized");
            return Ok(());
        }

        let gateway_url = host
            .ws_url()
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());
        let channel = PwaChannel::new();

        host.register_channel(ChannelRegistration {
            id: CHANNEL_ID.into(),
            transport: "websocket".into(),
            meta: channel.meta(),
            capabilities: channel.capabilities(),
            config: self.config.clone(),
            gateway_url: gateway_url.clone(),
        })
        .map_err(ChannelError::Registration)?;

        info!(gateway_url = %gateway_url, path = %self.config.path, "PWA channel initialized");
        self.active = Some(ActiveChannel {
            channel,
            gateway_url,
            clients: RwLock::new(HashSet::new()),
        });
        Ok(())
    }

    /// Admit a browser connection and return its client id.
    pub async fn handle_client_connection(
        &self,
        request: &ClientRequest,
    ) -> Result<String, ChannelError> {
        let Some(active) = &self.active else {
            warn!(url = %request.url, "Client connected before PWA channel initialized");
            return Err(ChannelError::NotInitialized);
        };

        let client_id = extract_client_id(request);
        active.clients.write().await.insert(client_id.clone());
        info!(client_id = %client_id, "PWA client connected");
        Ok(client_id)
    }

    /// Forget a client. Returns false if it was not connected.
    pub async fn client_disconnected(&self, client_id: &str) -> bool {
        match &self.active {
            Some(active) => {
                let removed = active.clients.write().await.remove(client_id);
                if removed {
                    info!(client_id, "PWA client disconnected");
                }
                removed
            }
            None => false,
        }
    }

    pub async fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            let clients = active.clients.read().await.len();
            info!(clients, "PWA channel shut down");
        }
    }

    pub async fn status(&self) -> PluginStatus {
        let status = match &self.active {
            Some(active) => Some(ChannelStatus {
                gateway_url: active.gateway_url.clone(),
                path: self.config.path.clone(),
                clients: active.clients.read().await.len(),
            }),
            None => None,
        };
        PluginStatus {
            meta: PluginMeta::current(),
            enabled: status.is_some(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeHost {
        ws_url: Option<String>,
        fail: bool,
        registered: Mutex<Vec<ChannelRegistration>>,
    }

    impl HostApi for FakeHost {
        fn ws_url(&self) -> Option<String> {
            self.ws_url.clone()
        }

        fn register_channel(&self, registration: ChannelRegistration) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("host refused");
            }
            self.registered.lock().unwrap().push(registration);
            Ok(())
        }
    }

    #[test]
    fn test_config_defaults_and_merge() {
        let config: PluginConfig = serde_json::from_str(r#"{"path": "/app"}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.port, 18789);
        assert_eq!(config.path, "/app");
        assert!(config.cors.credentials);
        assert!(config.cors.origin.allows("http://anything"));

        let config: PluginConfig =
            serde_json::from_str(r#"{"cors": {"origin": ["http://a.test"]}}"#).unwrap();
        assert!(config.cors.origin.allows("http://a.test"));
        assert!(!config.cors.origin.allows("http://b.test"));
        assert!(config.cors.credentials);
    }

    #[test]
    fn test_extract_client_id_precedence() {
        let req = ClientRequest::new("/pwa?foo=1&clientId=abc%20d").with_header("X-Client-Id", "hdr");
        assert_eq!(extract_client_id(&req), "abc d");

        let req = ClientRequest::new("/pwa?clientId=a+b%2Bc&clientId=second#frag");
        assert_eq!(extract_client_id(&req), "a b+c");

        let req = ClientRequest::new("/pwa").with_header("X-Client-Id", "hdr");
        assert_eq!(extract_client_id(&req), "hdr");

        let generated = extract_client_id(&ClientRequest::new("/pwa?clientId="));
        let parts: Vec<&str> = generated.splitn(3, '-').collect();
        assert_eq!(parts[0], "pwa");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].bytes().all(|b| BASE36.contains(&b)));
    }

    #[tokio::test]
    async fn test_init_registers_with_host_url() {
        let host = FakeHost {
            ws_url: Some("ws://gateway:9000".into()),
            ..Default::default()
        };
        let mut ctx = PluginContext::new(PluginConfig::default());
        ctx.init(&host).unwrap();

        let registered = host.registered.lock().unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].id, "pwa");
        assert_eq!(registered[0].transport, "websocket");
        assert_eq!(registered[0].gateway_url, "ws://gateway:9000");
        drop(registered);

        let status = ctx.status().await;
        assert!(status.enabled);
        assert_eq!(status.status.unwrap().gateway_url, "ws://gateway:9000");
    }

    #[tokio::test]
    async fn test_disabled_config_registers_nothing() {
        let host = FakeHost::default();
        let mut ctx = PluginContext::new(PluginConfig {
            enabled: false,
            ..Default::default()
        });
        ctx.init(&host).unwrap();
        assert!(!ctx.is_initialized());
        assert!(host.registered.lock().unwrap().is_empty());

        let err = ctx
            .handle_client_connection(&ClientRequest::new("/pwa"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::NotInitialized));

        let status = serde_json::to_value(ctx.status().await).unwrap();
        assert_eq!(status["name"], "pwa-channel");
        assert_eq!(status["enabled"], false);
        assert!(status["status"].is_null());
    }

    #[tokio::test]
    async fn test_registration_failure_surfaces() {
        let host = FakeHost {
            fail: true,
            ..Default::default()
        };
        let mut ctx = PluginContext::new(PluginConfig::default());
        assert!(matches!(ctx.init(&host), Err(ChannelError::Registration(_))));
        assert!(!ctx.is_initialized());
    }

    #[tokio::test]
    async fn test_client_lifecycle_and_shutdown() {
        let host = FakeHost::default();
        let mut ctx = PluginContext::new(PluginConfig::default());
        ctx.init(&host).unwrap();
        assert_eq!(
            host.registered.lock().unwrap()[0].gateway_url,
            DEFAULT_GATEWAY_URL
        );

        let id = ctx
            .handle_client_connection(&ClientRequest::new("/pwa?clientId=c1"))
            .await
            .unwrap();
        assert_eq!(id, "c1");
        assert_eq!(ctx.status().await.status.unwrap().clients, 1);

        assert!(ctx.client_disconnected("c1").await);
        assert!(!ctx.client_disconnected("c1").await);

        ctx.shutdown().await;
        assert!(!ctx.is_initialized());
        assert!(ctx.channel().is_none());
        assert!(matches!(
            ctx.handle_client_connection(&ClientRequest::new("/pwa")).await,
            Err(ChannelError::NotInitialized)
        ));
    }
}
