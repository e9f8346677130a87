//! # TCP Relay Core
//!
//! Core library for the tcp-relay service: accepts inbound TCP connections
//! and pipes each one to a fixed target, either directly or tunneled
//! through an upstream HTTP `CONNECT` proxy, under a shared idle deadline.

pub mod config;
pub mod dial;
pub mod error;
pub mod handshake;
pub mod server;
pub mod session;
pub mod timeout;
pub mod tunnel;

pub use config::{HostPort, RelayConfig, Via};
pub use error::{Error, Result};
pub use server::{RelayServer, FIRST_SESSION_ID};
pub use session::RelaySession;
pub use tunnel::{TunnelOutcome, TunnelSummary};
