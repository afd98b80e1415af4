//! Tunnel client
//!
//! Listens on a local TCP port and carries every accepted connection over
//! its own WebSocket tunnel to a remote WSRX server.

pub mod client;
pub mod config;

pub use client::{ClientError, TunnelClient};
pub use config::{ClientConfig, ClientConfigBuilder};
