//! UDP transport
//!
//! UDP has no connections, so the server keeps one virtual
//! [`UdpConnection`] per remote endpoint. The first datagram from a new
//! endpoint creates it; it lives until it is explicitly disconnected.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

use super::entity::{receive, ConnectionId, Entity, EntityCore};
use super::server::{server_accessors, ServerConnection, ServerCore};
use super::state::{DisconnectReason, ReceiverKind};
use super::transport::{cancelled, spawn_datagram_writer};
use crate::engine::Engine;
use crate::error::{NetworkError, Result};
use crate::queue::{ProcessingQueue, QueueHandle};

/// Largest possible UDP payload
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

type Endpoints = DashMap<SocketAddr, Arc<UdpConnection>>;

/// A remote endpoint known to a [`UdpServer`]
#[derive(Debug)]
pub struct UdpConnection {
    core: EntityCore,
}

impl Entity for UdpConnection {
    const KIND: ReceiverKind = ReceiverKind::UdpConnection;

    fn core(&self) -> &EntityCore {
        &self.core
    }
}

impl ServerConnection for UdpConnection {}

/// Outbound UDP client over a connected socket
#[derive(Debug)]
pub struct UdpClient {
    core: EntityCore,
    address: SocketAddr,
}

impl UdpClient {
    pub fn new(engine: Engine, address: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            core: EntityCore::new(engine, ReceiverKind::UdpClient, 0, Some(address)),
            address,
        })
    }

    /// Bind a local socket, connect it to the server and start receiving
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        self.core.begin_connect()?;

        let socket = match self.open_socket().await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                self.core.abort_connect();
                return Err(NetworkError::ConnectFailed {
                    address: self.address.to_string(),
                    reason: e.to_string(),
                }
                .into());
            }
        };

        let queue = Arc::new(ProcessingQueue::new(format!("udp-client-{}", self.address)));
        let (tx, rx) = mpsc::unbounded_channel();
        self.core.attach(QueueHandle::Dedicated(queue), tx);
        if !self.core.mark_connected() {
            return Err(NetworkError::Terminated.into());
        }

        spawn_datagram_writer(self, socket.clone(), None, rx);
        tokio::spawn(client_receive_loop(self.clone(), socket));
        Ok(())
    }

    async fn open_socket(&self) -> std::io::Result<UdpSocket> {
        let local = match self.address.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.address).await?;
        Ok(socket)
    }
}

impl Entity for UdpClient {
    const KIND: ReceiverKind = ReceiverKind::UdpClient;

    fn core(&self) -> &EntityCore {
        &self.core
    }
}

async fn client_receive_loop(client: Arc<UdpClient>, socket: Arc<UdpSocket>) {
    let mut shutdown = client.core.shutdown_signal();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            _ = cancelled(&mut shutdown) => break,
            result = socket.recv(&mut buf) => match result {
                // Empty datagrams carry nothing and do not close anything
                Ok(0) => {}
                Ok(n) => receive(&client, &buf[..n]),
                Err(e) => {
                    debug!(address = %client.address, error = %e, "UDP receive failed");
                    client.disconnect(DisconnectReason::ConnectionLost);
                    break;
                }
            }
        }
    }
}

/// UDP endpoint tracking virtual connections by remote address
pub struct UdpServer {
    core: Arc<ServerCore<UdpConnection>>,
    endpoints: Arc<Endpoints>,
    address: SocketAddr,
}

impl UdpServer {
    pub fn new(engine: Engine, address: SocketAddr) -> Self {
        Self {
            core: Arc::new(ServerCore::new("udp", engine)),
            endpoints: Arc::new(DashMap::new()),
            address,
        }
    }

    /// Bind and start receiving. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let shutdown = self.core.begin()?;

        let socket = match UdpSocket::bind(self.address).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                self.core.abort();
                return Err(e.into());
            }
        };
        let local = socket.local_addr()?;
        self.core.started(local);

        tokio::spawn(receive_datagrams(
            socket,
            self.core.clone(),
            self.endpoints.clone(),
            shutdown,
        ));
        Ok(local)
    }

    /// Stop receiving and disconnect every endpoint with `reason`
    pub fn stop(&self, reason: DisconnectReason) -> Result<()> {
        self.core.finish(reason)?;
        self.endpoints.clear();
        Ok(())
    }

    /// The connection tracking `address`, if it has sent anything
    pub fn connection_for(&self, address: &SocketAddr) -> Option<Arc<UdpConnection>> {
        self.endpoints.get(address).map(|entry| entry.value().clone())
    }

    server_accessors!(UdpConnection);
}

async fn receive_datagrams(
    socket: Arc<UdpSocket>,
    server: Arc<ServerCore<UdpConnection>>,
    endpoints: Arc<Endpoints>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok((0, addr)) => {
                    trace!(address = %addr, "Ignoring empty datagram");
                }
                Ok((n, addr)) => {
                    let existing = endpoints.get(&addr).map(|entry| entry.value().clone());
                    let connection = match existing {
                        Some(connection) => connection,
                        None => match open_connection(&server, &socket, &endpoints, addr) {
                            Some(connection) => connection,
                            None => continue,
                        },
                    };
                    receive(&connection, &buf[..n]);
                }
                Err(e) => {
                    // ICMP errors from earlier sends surface here; the socket stays usable
                    debug!(error = %e, "UDP receive failed");
                }
            },
            _ = cancelled(&mut shutdown) => {
                info!("UDP receiver shutting down");
                break;
            }
        }
    }
}

fn open_connection(
    server: &Arc<ServerCore<UdpConnection>>,
    socket: &Arc<UdpSocket>,
    endpoints: &Arc<Endpoints>,
    addr: SocketAddr,
) -> Option<Arc<UdpConnection>> {
    let slot = server.acquire_slot()?;
    let id: ConnectionId = server.next_id();
    let connection = Arc::new(UdpConnection {
        core: EntityCore::new(
            server.engine().clone(),
            ReceiverKind::UdpConnection,
            id,
            Some(addr),
        ),
    });

    let (tx, rx) = mpsc::unbounded_channel();
    connection.core.attach(QueueHandle::Pooled(slot), tx);
    connection.core.mark_connected();
    endpoints.insert(addr, connection.clone());

    let weak: Weak<Endpoints> = Arc::downgrade(endpoints);
    connection.core.on_disconnect(move |_| {
        if let Some(endpoints) = weak.upgrade() {
            endpoints.remove_if(&addr, |_, current| current.core.id() == id);
        }
    });

    server.track(connection.clone());
    spawn_datagram_writer(&connection, socket.clone(), Some(addr), rx);
    debug!(connection_id = id, address = %addr, "New UDP endpoint");
    Some(connection)
}
