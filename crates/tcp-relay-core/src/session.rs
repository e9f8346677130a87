//! Per-connection relay session driver.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::info;

use crate::config::{RelayConfig, Via};
use crate::error::Result;
use crate::tunnel::{self, TunnelSummary};
use crate::{dial, handshake};

/// One accepted client connection and its paired outbound connection.
///
/// The session owns both sockets for its lifetime; they are closed on every
/// exit path when `run` returns. Failures never escape the session: the only
/// user-visible failure channel is the log.
pub struct RelaySession {
    id: u64,
    config: Arc<RelayConfig>,
}

impl RelaySession {
    /// Create a session for an accepted connection.
    pub fn new(id: u64, config: Arc<RelayConfig>) -> Self {
        Self { id, config }
    }

    /// The session's correlation id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Drive the session to completion: dial the outbound side, handshake
    /// with the proxy when configured, then tunnel until EOF, error, or
    /// idle timeout.
    pub async fn run(self, client: TcpStream, peer: SocketAddr) {
        info!("[session {}] start connection from {}", self.id, peer);
        match self.relay(client).await {
            Ok(summary) => info!(
                "[session {}] end connection (sent: {}, recv: {})",
                self.id, summary.uplink_bytes, summary.downlink_bytes
            ),
            Err(_) => {
                // Already reported at the point of failure.
                info!("[session {}] end connection", self.id);
            }
        }
    }

    async fn relay(&self, client: TcpStream) -> Result<TunnelSummary> {
        let mut server = dial::dial(self.id, &self.config).await?;
        if matches!(self.config.via, Via::HttpProxy(_)) {
            handshake::http_connect(self.id, &mut server, &self.config.target).await?;
        }
        Ok(tunnel::run(self.id, client, server, self.config.idle_timeout).await)
    }
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession").field("id", &self.id).finish()
    }
}
