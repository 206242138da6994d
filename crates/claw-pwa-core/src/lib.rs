//! Core types, config, and errors for the ClawPWA gateway client.

pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod protocol;
