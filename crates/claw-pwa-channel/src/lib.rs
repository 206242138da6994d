//! PWA channel for the OpenClaw gateway plugin host.
//!
//! The host owns a [`PluginContext`] and drives its lifecycle explicitly:
//! [`PluginContext::init`] registers the [`PwaChannel`] descriptor through the
//! host's [`HostApi`], browser connections are admitted with
//! [`PluginContext::handle_client_connection`], and
//! [`PluginContext::shutdown`] tears everything down again.

pub mod channel;
pub mod host;
pub mod plugin;

pub use channel::{
    ChannelCapabilities, ChannelMeta, DeliveryMode, OutboundContext, PwaChannel, PwaOutbound,
    SendReceipt,
};
pub use host::{ChannelRegistration, EventEmitter, HostApi};
pub use plugin::{
    extract_client_id, ChannelError, ChannelStatus, ClientRequest, CorsConfig, CorsOrigin, PluginConfig,
    PluginContext, PluginMeta, PluginStatus, DEFAULT_GATEWAY_URL,
};
