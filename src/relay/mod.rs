// WebSocket fan-out relay.
//
// The relay accepts connections and forwards every inbound text frame,
// verbatim, to all other open connections. It never decodes payloads; the
// wire format is a client-side concern. Each connection gets two tasks:
//
// - **Reader**: pulls frames off the socket. Any frame re-arms the
//   connection's liveness flag; text frames are handed to the registry for
//   broadcast. Ends on close frame, error, or EOF, then removes the
//   connection from the registry.
// - **Writer**: drains the connection's bounded outbound queue into the
//   socket. Ends when told to close (eviction, shutdown) or when every
//   sender is gone (registry removal).
//
// The heartbeat sweep runs as a third task owned by the run loop; shutdown
// flips a watch signal observed by the accept loop and the sweep, then
// closes every remaining connection.

pub mod liveness;
pub mod registry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use self::registry::{Outbound, Registry};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default heartbeat period. A connection with no inbound activity is
/// terminated after at least one and at most two of these.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(60);

/// Capacity of each connection's outbound queue. A client that falls this
/// many frames behind is treated as a failed recipient and closed.
const OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen port; 0 lets the OS pick (the bound port is available from
    /// `Relay::local_addr`).
    pub port: u16,
    pub heartbeat: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            port: DEFAULT_PORT,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to bind relay listener on port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },
}

/// A bound but not yet running relay.
pub struct Relay {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    config: RelayConfig,
}

impl Relay {
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .map_err(|source| RelayError::Bind {
                port: config.port,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| RelayError::Bind {
            port: config.port,
            source,
        })?;
        Ok(Relay {
            listener,
            local_addr,
            registry: Arc::new(Registry::new()),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run until the shutdown signal flips (or its sender is dropped), then
    /// stop the heartbeat task and close every open connection.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let Relay {
            listener,
            local_addr,
            registry,
            config,
        } = self;
        info!("Relay listening on {}", local_addr);

        let sweeper = tokio::spawn(liveness::run(
            Arc::clone(&registry),
            config.heartbeat,
            shutdown.clone(),
        ));

        let mut shutdown = shutdown;
        let result = loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let registry = Arc::clone(&registry);
                            tokio::spawn(handle_connection(stream, addr, registry));
                        }
                        Err(e) => break Err(anyhow::Error::from(e).context("accept failed")),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Relay shutting down");
                    break Ok(());
                }
            }
        };

        // Tear down the sweep and every connection on both exit paths, so
        // nothing periodic outlives the server.
        sweeper.abort();
        let _ = sweeper.await;
        let closed = registry.close_all();
        info!("Closed {} connection(s) on shutdown", closed);
        result
    }

    /// Spawn the run loop on the runtime, returning a handle that stops it.
    pub fn spawn(self) -> RelayHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let local_addr = self.local_addr;
        let task = tokio::spawn(self.run(shutdown_rx));
        RelayHandle {
            local_addr,
            shutdown_tx,
            task,
        }
    }
}

/// Handle to a spawned relay.
pub struct RelayHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal shutdown and wait (bounded) for the run loop to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

/// Service one connection: handshake, register, then read until the socket
/// goes away.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, registry: Arc<Registry>) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (mut write, mut read) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let id = registry.insert(outbound_tx);
    info!("Connection {} accepted from {}", id, addr);

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            match frame {
                Outbound::Relay(payload) => {
                    if let Err(e) = write.send(Message::Text(payload)).await {
                        warn!("Write to connection {} failed: {}", id, e);
                        break;
                    }
                }
                Outbound::Close => break,
            }
        }
        let _ = write.close().await;
    });

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(payload)) => {
                registry.mark_alive(id);
                debug!(
                    "Relaying {} byte frame from connection {}",
                    payload.len(),
                    id
                );
                registry.broadcast(id, payload);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                // Binary, ping and pong frames are not relayed, but they do
                // count as activity.
                registry.mark_alive(id);
            }
            Err(e) => {
                warn!("WebSocket error on connection {}: {}", id, e);
                break;
            }
        }
    }

    registry.remove(id);
    info!("Connection {} closed", id);
    let _ = writer.await;
}
