//! Messaging client backed by a gateway sidecar.
//!
//! The sidecar owns the wire protocol and credential storage. This crate
//! drives it over REST (commands) and a per-session WebSocket (lifecycle
//! events), and exposes it through the `relay-session` client traits.

pub mod client;
pub mod connector;
pub mod events;
mod http;
pub mod wire;

pub use client::GatewayClient;
pub use connector::{GatewayConfig, GatewayConnector};
