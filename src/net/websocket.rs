//! WebSocket transport
//!
//! Frames travel as binary WebSocket messages once the HTTP upgrade has
//! completed. Text messages from a peer are parsed as frame bytes too.
//! Servers can optionally wrap accepted sockets in TLS before the upgrade.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_native_tls::TlsAcceptor;
use tokio_tungstenite::MaybeTlsStream;
use tracing::{debug, error, info, warn};

use super::entity::{ConnectionId, Entity, EntityCore};
use super::server::{server_accessors, ServerConnection, ServerCore};
use super::state::{DisconnectReason, EntityState, ReceiverKind};
use super::transport::{cancelled, spawn_websocket, Outbound};
use crate::engine::Engine;
use crate::error::{NetworkError, Result};
use crate::queue::{ProcessingQueue, QueueHandle};

/// A WebSocket accepted by a [`WebSocketServer`]
#[derive(Debug)]
pub struct WebSocketConnection {
    core: EntityCore,
}

impl WebSocketConnection {
    fn new(engine: Engine, id: ConnectionId, address: SocketAddr) -> Self {
        Self {
            core: EntityCore::new(engine, ReceiverKind::WebSocketConnection, id, Some(address)),
        }
    }
}

impl Entity for WebSocketConnection {
    const KIND: ReceiverKind = ReceiverKind::WebSocketConnection;

    fn core(&self) -> &EntityCore {
        &self.core
    }
}

impl ServerConnection for WebSocketConnection {}

/// Outbound WebSocket client for `ws://` and `wss://` URLs
#[derive(Debug)]
pub struct WebSocketClient {
    core: EntityCore,
    url: String,
}

impl WebSocketClient {
    pub fn new(engine: Engine, url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            core: EntityCore::new(engine, ReceiverKind::WebSocketClient, 0, None),
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Perform the upgrade handshake and start receiving
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        self.core.begin_connect()?;

        let stream = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                self.core.abort_connect();
                return Err(NetworkError::ConnectFailed {
                    address: self.url.clone(),
                    reason: e.to_string(),
                }
                .into());
            }
        };

        if let MaybeTlsStream::Plain(tcp) = stream.get_ref() {
            let _ = tcp.set_nodelay(true);
            if let Ok(address) = tcp.peer_addr() {
                self.core.set_remote_address(address);
            }
        }

        let queue = Arc::new(ProcessingQueue::new(format!("ws-client-{}", self.url)));
        let (tx, rx) = mpsc::unbounded_channel();
        self.core.attach(QueueHandle::Dedicated(queue), tx);
        if !self.core.mark_connected() {
            return Err(NetworkError::Terminated.into());
        }

        spawn_websocket(self, stream, rx);
        Ok(())
    }
}

impl Entity for WebSocketClient {
    const KIND: ReceiverKind = ReceiverKind::WebSocketClient;

    fn core(&self) -> &EntityCore {
        &self.core
    }
}

/// WebSocket listener, optionally over TLS
pub struct WebSocketServer {
    core: Arc<ServerCore<WebSocketConnection>>,
    address: SocketAddr,
    tls: Option<TlsAcceptor>,
}

impl WebSocketServer {
    pub fn new(engine: Engine, address: SocketAddr) -> Self {
        Self {
            core: Arc::new(ServerCore::new("websocket", engine)),
            address,
            tls: None,
        }
    }

    /// Accept `wss://` clients using `acceptor`
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
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

        tokio::spawn(accept_connections(
            listener,
            self.core.clone(),
            self.tls.clone(),
            shutdown,
        ));
        Ok(local)
    }

    /// Stop accepting and disconnect every connection with `reason`
    pub fn stop(&self, reason: DisconnectReason) -> Result<()> {
        self.core.finish(reason)
    }

    server_accessors!(WebSocketConnection);
}

async fn accept_connections(
    listener: TcpListener,
    server: Arc<ServerCore<WebSocketConnection>>,
    tls: Option<TlsAcceptor>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(address = %addr, "Accepted WebSocket connection");
                        open_connection(&server, stream, addr, tls.clone());
                    }
                    Err(e) => {
                        error!("Failed to accept WebSocket connection: {}", e);
                    }
                }
            }
            _ = cancelled(&mut shutdown) => {
                info!("WebSocket acceptor shutting down");
                break;
            }
        }
    }
}

fn open_connection(
    server: &Arc<ServerCore<WebSocketConnection>>,
    stream: TcpStream,
    addr: SocketAddr,
    tls: Option<TlsAcceptor>,
) {
    // Set TCP options before upgrade
    let _ = stream.set_nodelay(true);
    let Some(slot) = server.acquire_slot() else {
        return;
    };

    let connection = Arc::new(WebSocketConnection::new(
        server.engine().clone(),
        server.next_id(),
        addr,
    ));
    let (tx, rx) = mpsc::unbounded_channel();
    connection.core.attach(QueueHandle::Pooled(slot), tx);
    connection.core.set_state(EntityState::Connecting);
    server.track(connection.clone());

    tokio::spawn(async move {
        let mut shutdown = connection.core.shutdown_signal();
        match tls {
            Some(acceptor) => {
                let accepted = tokio::select! {
                    result = acceptor.accept(stream) => result,
                    _ = cancelled(&mut shutdown) => return,
                };
                match accepted {
                    Ok(stream) => upgrade(connection, stream, rx, shutdown).await,
                    Err(e) => {
                        warn!(address = %addr, error = %e, "TLS handshake failed");
                        connection.disconnect(DisconnectReason::SslAuthenticationFailed);
                    }
                }
            }
            None => upgrade(connection, stream, rx, shutdown).await,
        }
    });
}

/// Complete the HTTP upgrade and start the reader and writer
async fn upgrade<S>(
    connection: Arc<WebSocketConnection>,
    stream: S,
    outbound: Outbound,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let handshake = tokio::select! {
        result = tokio_tungstenite::accept_async(stream) => result,
        _ = cancelled(&mut shutdown) => return,
    };

    match handshake {
        Ok(stream) => {
            if connection.core.mark_connected() {
                spawn_websocket(&connection, stream, outbound);
            }
        }
        Err(e) => {
            debug!(
                connection_id = connection.core.id(),
                error = %e,
                "WebSocket handshake failed"
            );
            connection.disconnect(DisconnectReason::InvalidDataReceived);
        }
    }
}
