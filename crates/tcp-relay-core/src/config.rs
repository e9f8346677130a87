//! Configuration structures for tcp-relay.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// A host/port pair naming one side of a TCP connection.
///
/// The host may be a DNS name, an IPv4 literal, or an IPv6 literal without
/// enclosing brackets. On the wire and in `host:port` text form an IPv6
/// literal is bracketed; in storage it is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    /// Host name or address literal.
    pub host: String,

    /// TCP port, 1..=65535.
    pub port: u16,
}

impl HostPort {
    /// Create a new host/port pair.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The `host:port` authority form, with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        self.to_string()
    }
}

/// Formats as the `host:port` authority form, with IPv6 literals bracketed,
/// so a displayed pair always reads back through [`FromStr`].
impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for HostPort {
    type Err = Error;

    /// Parse `host:port`. A host containing `:` must be enclosed in
    /// brackets (`[::1]:80`); the brackets are stripped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidAddress(s.to_string()))?;

        let port = port
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| Error::InvalidAddress(s.to_string()))?;

        let host = if host.contains(':') {
            host.strip_prefix('[')
                .and_then(|host| host.strip_suffix(']'))
                .ok_or_else(|| Error::InvalidAddress(s.to_string()))?
        } else {
            host
        };

        if host.is_empty() {
            return Err(Error::InvalidAddress(s.to_string()));
        }

        Ok(Self::new(host, port))
    }
}

/// How the outbound connection is established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Via {
    /// Connect straight to the target.
    Direct,

    /// Connect to an HTTP proxy and tunnel through a `CONNECT` request.
    HttpProxy(HostPort),
}

/// Immutable per-process relay configuration, shared by every session.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Destination the client is relayed to.
    pub target: HostPort,

    /// Maximum quiet period during tunnel transfer.
    pub idle_timeout: Duration,

    /// Outbound connection mode.
    pub via: Via,
}

impl RelayConfig {
    /// The address the outbound dial goes to: the proxy when tunneling
    /// through one, the target otherwise.
    pub fn dial_address(&self) -> &HostPort {
        match &self.via {
            Via::HttpProxy(proxy) => proxy,
            Via::Direct => &self.target,
        }
    }
}
