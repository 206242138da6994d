//! Bridge server between browser clients and the OpenClaw gateway.
//!
//! Browsers connect to `/ws`; each connection gets its own upstream socket to
//! the gateway and frames are relayed both ways unchanged, except that the
//! `connect` request carries the token configured on the server.

pub mod relay;
pub mod server;
pub mod state;

pub use relay::inject_token;
pub use server::{router, serve, start_proxy};
pub use state::ProxyState;
