//! TCP transport
//!
//! - `TcpConnection` - a server-accepted socket
//! - `TcpClient` - an outbound socket with its own processing queue
//! - `TcpServer` - listener with an accept loop

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use super::entity::{ConnectionId, Entity, EntityCore};
use super::server::{server_accessors, ServerConnection, ServerCore};
use super::state::{DisconnectReason, ReceiverKind};
use super::transport::{cancelled, spawn_stream};
use crate::engine::Engine;
use crate::error::{NetworkError, Result};
use crate::queue::{ProcessingQueue, QueueHandle};

/// A TCP socket accepted by a [`TcpServer`]
#[derive(Debug)]
pub struct TcpConnection {
    core: EntityCore,
}

impl TcpConnection {
    fn new(engine: Engine, id: ConnectionId, address: SocketAddr) -> Self {
        Self {
            core: EntityCore::new(engine, ReceiverKind::TcpConnection, id, Some(address)),
        }
    }
}

impl Entity for TcpConnection {
    const KIND: ReceiverKind = ReceiverKind::TcpConnection;

    fn core(&self) -> &EntityCore {
        &self.core
    }
}

impl ServerConnection for TcpConnection {}

/// Outbound TCP client
#[derive(Debug)]
pub struct TcpClient {
    core: EntityCore,
    address: SocketAddr,
}

impl TcpClient {
    pub fn new(engine: Engine, address: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            core: EntityCore::new(engine, ReceiverKind::TcpClient, 0, Some(address)),
            address,
        })
    }

    /// Open the socket and start receiving
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        self.core.begin_connect()?;

        let stream = match TcpStream::connect(self.address).await {
            Ok(stream) => stream,
            Err(e) => {
                self.core.abort_connect();
                return Err(NetworkError::ConnectFailed {
                    address: self.address.to_string(),
                    reason: e.to_string(),
                }
                .into());
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            self.core.abort_connect();
            return Err(e.into());
        }

        let queue = Arc::new(ProcessingQueue::new(format!("tcp-client-{}", self.address)));
        let (tx, rx) = mpsc::unbounded_channel();
        self.core.attach(QueueHandle::Dedicated(queue), tx);
        if !self.core.mark_connected() {
            return Err(NetworkError::Terminated.into());
        }

        spawn_stream(self, stream, rx);
        Ok(())
    }
}

impl Entity for TcpClient {
    const KIND: ReceiverKind = ReceiverKind::TcpClient;

    fn core(&self) -> &EntityCore {
        &self.core
    }
}

/// TCP listener producing [`TcpConnection`]s
pub struct TcpServer {
    core: Arc<ServerCore<TcpConnection>>,
    address: SocketAddr,
}

impl TcpServer {
    pub fn new(engine: Engine, address: SocketAddr) -> Self {
        Self {
            core: Arc::new(ServerCore::new("tcp", engine)),
            address,
        }
    }

    /// Bind and start accepting. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let shutdown = self.core.begin()?;

        let listener = match TcpListener::bind(self.address).await {
            Ok(listener) => listener,
            Err(e) => {
                self.core.abort();
                return Err(e.into());
            }
        };
        let local = listener.local_addr()?;
        self.core.started(local);

        tokio::spawn(accept_connections(listener, self.core.clone(), shutdown));
        Ok(local)
    }

    /// Stop accepting and disconnect every connection with `reason`
    pub fn stop(&self, reason: DisconnectReason) -> Result<()> {
        self.core.finish(reason)
    }

    server_accessors!(TcpConnection);
}

async fn accept_connections(
    listener: TcpListener,
    server: Arc<ServerCore<TcpConnection>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(address = %addr, "Accepted TCP connection");
                        if let Err(e) = open_connection(&server, stream, addr) {
                            error!(address = %addr, error = %e, "Failed to set up TCP connection");
                        }
                    }
                    Err(e) => {
                        error!("Failed to accept TCP connection: {}", e);
                    }
                }
            }
            _ = cancelled(&mut shutdown) => {
                info!("TCP acceptor shutting down");
                break;
            }
        }
    }
}

fn open_connection(
    server: &Arc<ServerCore<TcpConnection>>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let Some(slot) = server.acquire_slot() else {
        return Err(NetworkError::NotRunning.into());
    };

    let connection = Arc::new(TcpConnection::new(
        server.engine().clone(),
        server.next_id(),
        addr,
    ));
    let (tx, rx) = mpsc::unbounded_channel();
    connection.core.attach(QueueHandle::Pooled(slot), tx);
    connection.core.mark_connected();

    server.track(connection.clone());
    spawn_stream(&connection, stream, rx);
    Ok(())
}
