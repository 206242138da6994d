//! Client for the OpenClaw gateway session protocol.
//!
//! A [`GatewayClient`] owns one WebSocket connection. A single dispatch task
//! reads every inbound frame in order: responses complete pending requests
//! through the [`Correlator`], `connect.challenge` drives the [`Handshake`],
//! and all other events are forwarded, unmodified and in order, to the
//! [`EventStream`] returned from [`GatewayClient::connect`].

pub mod client;
pub mod correlation;
pub mod dispatch;
pub mod run;
pub mod state;
pub mod transport;

pub use client::{GatewayClient, GatewayOptions, Hello, PendingResponse};
pub use correlation::{Correlator, ResponseOutcome};
pub use dispatch::EventStream;
pub use run::{RunOutcome, RunStatus, RunTracker, RunWatcher};
pub use state::{ConnectionState, Handshake, HandshakeOutcome};
