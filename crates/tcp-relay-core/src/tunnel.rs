//! Bidirectional tunnel transfer between the client and server sockets.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::timeout::Deadline;

const TRANSFER_BUFFER_SIZE: usize = 4096;

/// Copy direction within a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Uplink,
    /// Server to client.
    Downlink,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Uplink => write!(f, "uplink"),
            Direction::Downlink => write!(f, "downlink"),
        }
    }
}

/// How a tunnel transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelOutcome {
    /// Both directions ran to completion (EOF or error).
    Done,
    /// The shared idle deadline fired with a direction still pending.
    TimedOut,
}

/// Result of a tunnel transfer, with bytes delivered per direction.
#[derive(Debug, Clone, Copy)]
pub struct TunnelSummary {
    /// Why the transfer ended.
    pub outcome: TunnelOutcome,
    /// Bytes written to the server.
    pub uplink_bytes: u64,
    /// Bytes written to the client.
    pub downlink_bytes: u64,
}

/// Pipe bytes both ways between `client` and `server` until both directions
/// finish or nothing happens for `idle_timeout`.
///
/// Both directions re-arm one shared [`Deadline`] before every read and
/// every write, so progress in either direction keeps the whole tunnel
/// alive. An error in one direction cancels the other; EOF in one direction
/// lets the other run on. When the deadline fires, in-flight reads and
/// writes are dropped and the transfer reports [`TunnelOutcome::TimedOut`].
/// Simultaneous completion resolves in favor of the data path.
pub async fn run<C, S>(
    session_id: u64,
    client: C,
    server: S,
    idle_timeout: Duration,
) -> TunnelSummary
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("[session {}] start tunnel transfer", session_id);

    let deadline = Deadline::new();
    deadline.arm(idle_timeout);
    let uplink_bytes = AtomicU64::new(0);
    let downlink_bytes = AtomicU64::new(0);

    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, server_write) = tokio::io::split(server);

    let directions = async {
        let _ = tokio::try_join!(
            copy_direction(
                session_id,
                Direction::Uplink,
                client_read,
                server_write,
                &deadline,
                idle_timeout,
                &uplink_bytes,
            ),
            copy_direction(
                session_id,
                Direction::Downlink,
                server_read,
                client_write,
                &deadline,
                idle_timeout,
                &downlink_bytes,
            ),
        );
    };

    let outcome = tokio::select! {
        biased;
        _ = directions => TunnelOutcome::Done,
        _ = deadline.wait() => {
            debug!(
                "[session {}] tunnel transfer connection closed due to timeout",
                session_id
            );
            TunnelOutcome::TimedOut
        }
    };

    debug!("[session {}] end tunnel transfer", session_id);

    TunnelSummary {
        outcome,
        uplink_bytes: uplink_bytes.load(Ordering::Relaxed),
        downlink_bytes: downlink_bytes.load(Ordering::Relaxed),
    }
}

async fn copy_direction<R, W>(
    session_id: u64,
    direction: Direction,
    mut from: R,
    mut to: W,
    deadline: &Deadline,
    idle_timeout: Duration,
    transferred: &AtomicU64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = [0u8; TRANSFER_BUFFER_SIZE];
    loop {
        deadline.arm(idle_timeout);
        let bytes_read = match from.read(&mut buffer).await {
            Ok(0) => {
                debug!("[session {}] {} transfer read eof", session_id, direction);
                return Ok(());
            }
            Ok(n) => n,
            Err(e) => {
                debug!(
                    "[session {}] {} transfer read error: {}",
                    session_id, direction, e
                );
                return Err(e);
            }
        };

        let mut bytes_written = 0;
        while bytes_written < bytes_read {
            deadline.arm(idle_timeout);
            match to.write(&buffer[bytes_written..bytes_read]).await {
                Ok(0) => {
                    debug!(
                        "[session {}] {} transfer write error: connection closed",
                        session_id, direction
                    );
                    return Err(io::Error::from(io::ErrorKind::WriteZero));
                }
                Ok(n) => {
                    bytes_written += n;
                    transferred.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    debug!(
                        "[session {}] {} transfer write error: {}",
                        session_id, direction, e
                    );
                    return Err(e);
                }
            }
        }
    }
}
