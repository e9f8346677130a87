//! Listener and accept loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::session::RelaySession;

/// First session id handed out by a relay process.
pub const FIRST_SESSION_ID: u64 = 10000;

/// TCP relay server: accepts clients and spawns a detached session each.
pub struct RelayServer {
    listener: TcpListener,
    config: Arc<RelayConfig>,
}

impl RelayServer {
    /// Bind the listening socket.
    pub async fn bind(listen_addr: SocketAddr, config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    /// The bound listening address. Useful when binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    ///
    /// Session ids are handed out strictly increasing in accept order.
    /// Accept errors are logged and the loop keeps going; the loop only ends
    /// with the runtime.
    pub async fn run(self) -> Result<()> {
        self.run_with_observer(|_| {}).await
    }

    /// Accept loop with a hook invoked with each assigned session id, in
    /// accept order.
    pub(crate) async fn run_with_observer<F>(self, mut on_accept: F) -> Result<()>
    where
        F: FnMut(u64),
    {
        info!("relay listening on {}", self.listener.local_addr()?);

        let mut session_id = FIRST_SESSION_ID;
        loop {
            match self.listener.accept().await {
                Ok((client, peer)) => {
                    let session = RelaySession::new(session_id, Arc::clone(&self.config));
                    session_id += 1;
                    on_accept(session.id());
                    tokio::spawn(async move {
                        session.run(client, peer).await;
                    });
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::Instant;

    use crate::config::{HostPort, Via};

    #[tokio::test]
    async fn hands_out_unique_monotonic_session_ids_in_accept_order() {
        // Point the sessions at a port nothing listens on; ids are assigned
        // at accept, before the dial outcome matters.
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_port = closed.local_addr().unwrap().port();
        drop(closed);

        let config = RelayConfig {
            target: HostPort::new("127.0.0.1", target_port),
            idle_timeout: Duration::from_secs(60),
            via: Via::Direct,
        };
        let server = RelayServer::bind("127.0.0.1:0".parse().unwrap(), config)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let ids = std::sync::Arc::new(Mutex::new(Vec::new()));
        let observed = std::sync::Arc::clone(&ids);
        tokio::spawn(async move {
            let _ = server
                .run_with_observer(move |id| observed.lock().unwrap().push(id))
                .await;
        });

        const CLIENTS: usize = 32;
        let mut connects = Vec::new();
        for _ in 0..CLIENTS {
            connects.push(tokio::spawn(async move {
                let _ = TcpStream::connect(addr).await.unwrap();
            }));
        }
        for connect in connects {
            connect.await.unwrap();
        }

        // Accepts lag the client-side connects; wait for all of them.
        let deadline = Instant::now() + Duration::from_secs(5);
        while ids.lock().unwrap().len() < CLIENTS {
            assert!(Instant::now() < deadline, "accepts did not complete");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let ids = ids.lock().unwrap();
        let expected: Vec<u64> =
            (FIRST_SESSION_ID..FIRST_SESSION_ID + CLIENTS as u64).collect();
        assert_eq!(*ids, expected);
    }
}
