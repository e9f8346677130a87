//! Outbound connection establishment.
//!
//! Resolves the dial address and tries each resolved endpoint in order.
//! Endpoints are attempted sequentially, never in parallel; a timeout or
//! refusal on one endpoint moves on to the next, and only exhausting the
//! list fails the dial.

use std::time::Duration;

use tokio::net::{self, TcpStream};
use tracing::{debug, error, trace};

use crate::config::{RelayConfig, Via};
use crate::error::{Error, Result};
use crate::timeout::Watchdog;

/// Time allowed for DNS resolution of the dial address.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(20);

/// Time allowed for each individual endpoint connect attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Dial the outbound side of a session: the HTTP proxy when the config says
/// to tunnel through one, the target otherwise.
pub async fn dial(session_id: u64, config: &RelayConfig) -> Result<TcpStream> {
    let address = config.dial_address();
    let (host, port) = (address.host.as_str(), address.port);

    if matches!(config.via, Via::HttpProxy(_)) {
        debug!(
            "[session {}] start connecting to the http proxy server {}:{}",
            session_id, host, port
        );
    } else {
        debug!(
            "[session {}] start connecting to {}:{}",
            session_id, host, port
        );
    }

    let mut watchdog = Watchdog::new();
    watchdog.arm(RESOLVE_TIMEOUT);
    trace!("[session {}] start resolving {}:{}", session_id, host, port);
    let endpoints: Vec<_> = match watchdog.watch(net::lookup_host((host, port))).await {
        None => {
            error!("[session {}] resolve {}:{} timeout", session_id, host, port);
            return Err(Error::ResolveTimeout {
                host: host.to_string(),
                port,
            });
        }
        Some(Err(source)) => {
            error!(
                "[session {}] resolve {}:{} error: {}",
                session_id, host, port, source
            );
            return Err(Error::Resolve {
                host: host.to_string(),
                port,
                source,
            });
        }
        Some(Ok(endpoints)) => endpoints.collect(),
    };
    trace!("[session {}] resolve {}:{} success", session_id, host, port);

    let mut watchdog = Watchdog::new();
    for endpoint in endpoints {
        watchdog.arm(CONNECT_TIMEOUT);
        trace!(
            "[session {}] start connecting {}:{}({})",
            session_id,
            host,
            port,
            endpoint
        );
        match watchdog.watch(TcpStream::connect(endpoint)).await {
            None => {
                trace!(
                    "[session {}] connect to {}:{}({}) timeout",
                    session_id,
                    host,
                    port,
                    endpoint
                );
            }
            Some(Err(e)) => {
                trace!(
                    "[session {}] connect to {}:{}({}) error: {}",
                    session_id,
                    host,
                    port,
                    endpoint,
                    e
                );
            }
            Some(Ok(server)) => {
                debug!(
                    "[session {}] successfully connected to {}:{}({})",
                    session_id, host, port, endpoint
                );
                return Ok(server);
            }
        }
    }

    error!(
        "[session {}] failed to connect to {}:{}",
        session_id, host, port
    );
    Err(Error::Connect {
        host: host.to_string(),
        port,
    })
}
