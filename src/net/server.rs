//! Server bookkeeping
//!
//! Shared by the TCP, UDP and WebSocket servers:
//! - running/stopped life-cycle
//! - connection id generation
//! - thread-safe connection registry
//! - connection added/removed notifications

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use super::entity::{ConnectionId, Entity};
use super::state::DisconnectReason;
use crate::engine::Engine;
use crate::error::{NetworkError, Result};
use crate::queue::{QueuePool, QueueSlot};

/// Notification published by a server
#[derive(Debug)]
pub enum ServerEvent<C> {
    /// A connection was accepted (or, for UDP, first heard from)
    ConnectionAdded(Arc<C>),
    /// A connection disconnected and left the registry
    ConnectionRemoved {
        id: ConnectionId,
        reason: DisconnectReason,
    },
}

impl<C> Clone for ServerEvent<C> {
    fn clone(&self) -> Self {
        match self {
            ServerEvent::ConnectionAdded(connection) => {
                ServerEvent::ConnectionAdded(connection.clone())
            }
            ServerEvent::ConnectionRemoved { id, reason } => ServerEvent::ConnectionRemoved {
                id: *id,
                reason: *reason,
            },
        }
    }
}

/// A server-side connection
pub trait ServerConnection: Entity {
    fn id(&self) -> ConnectionId {
        self.core().id()
    }
}

/// State shared between a server handle and its accept task
pub(crate) struct ServerCore<C: ServerConnection> {
    name: &'static str,
    engine: Engine,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    local_address: RwLock<Option<SocketAddr>>,
    connections: DashMap<ConnectionId, Arc<C>>,
    next_id: AtomicU64,
    pool: RwLock<Option<Arc<QueuePool>>>,
    events: broadcast::Sender<ServerEvent<C>>,
}

impl<C: ServerConnection> ServerCore<C> {
    pub(crate) fn new(name: &'static str, engine: Engine) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            name,
            engine,
            shutdown: Mutex::new(None),
            local_address: RwLock::new(None),
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            pool: RwLock::new(None),
            events,
        }
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn is_running(&self) -> bool {
        self.shutdown.lock().is_some()
    }

    /// Claim the running state before binding
    pub(crate) fn begin(&self) -> Result<watch::Receiver<bool>> {
        let mut shutdown = self.shutdown.lock();
        if shutdown.is_some() {
            return Err(NetworkError::AlreadyRunning.into());
        }
        let (tx, rx) = watch::channel(false);
        *shutdown = Some(tx);
        *self.pool.write() = Some(Arc::new(QueuePool::new(
            self.name,
            self.engine.connections_per_queue(),
        )));
        Ok(rx)
    }

    /// Undo [`begin`](Self::begin) after a failed bind
    pub(crate) fn abort(&self) {
        self.shutdown.lock().take();
        self.pool.write().take();
    }

    pub(crate) fn started(&self, address: SocketAddr) {
        *self.local_address.write() = Some(address);
        info!(server = self.name, address = %address, "Server listening");
    }

    /// Stop accepting and disconnect every tracked connection
    pub(crate) fn finish(&self, reason: DisconnectReason) -> Result<()> {
        let Some(shutdown) = self.shutdown.lock().take() else {
            return Err(NetworkError::NotRunning.into());
        };
        let _ = shutdown.send(true);

        let connections: Vec<Arc<C>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for connection in &connections {
            connection.disconnect(reason);
        }
        self.connections.clear();

        if let Some(pool) = self.pool.write().take() {
            pool.dispose();
        }
        self.local_address.write().take();

        info!(
            server = self.name,
            connections = connections.len(),
            reason = %reason,
            "Server stopped"
        );
        Ok(())
    }

    pub(crate) fn local_address(&self) -> Option<SocketAddr> {
        *self.local_address.read()
    }

    pub(crate) fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// A slot on the server's queue pool
    pub(crate) fn acquire_slot(&self) -> Option<QueueSlot> {
        self.pool.read().as_ref().map(|pool| pool.acquire())
    }

    /// Register a connection and remove it again when it disconnects
    pub(crate) fn track(self: &Arc<Self>, connection: Arc<C>) {
        let id = connection.id();
        self.connections.insert(id, connection.clone());

        debug!(
            server = self.name,
            connection_id = id,
            address = ?connection.remote_address(),
            total = self.connections.len(),
            "Connection added"
        );
        let _ = self
            .events
            .send(ServerEvent::ConnectionAdded(connection.clone()));

        let server: Weak<Self> = Arc::downgrade(self);
        connection.core().on_disconnect(move |reason| {
            if let Some(server) = server.upgrade() {
                server.untrack(id, reason);
            }
        });

        // Accepted while stop was disconnecting the tracked set
        if !self.is_running() {
            connection.disconnect(DisconnectReason::ServerStopped);
        }
    }

    fn untrack(&self, id: ConnectionId, reason: DisconnectReason) {
        if self.connections.remove(&id).is_some() {
            debug!(
                server = self.name,
                connection_id = id,
                reason = %reason,
                total = self.connections.len(),
                "Connection removed"
            );
        }
        let _ = self
            .events
            .send(ServerEvent::ConnectionRemoved { id, reason });
    }

    pub(crate) fn connection(&self, id: ConnectionId) -> Option<Arc<C>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    pub(crate) fn connections(&self) -> Vec<Arc<C>> {
        let mut connections: Vec<Arc<C>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        connections.sort_by_key(|connection| connection.id());
        connections
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ServerEvent<C>> {
        self.events.subscribe()
    }
}

/// Public accessors every server exposes, implemented through [`ServerCore`]
macro_rules! server_accessors {
    ($connection:ty) => {
        /// Address the server is bound to, while running
        pub fn local_address(&self) -> Option<std::net::SocketAddr> {
            self.core.local_address()
        }

        pub fn is_running(&self) -> bool {
            self.core.is_running()
        }

        pub fn connection(
            &self,
            id: $crate::net::entity::ConnectionId,
        ) -> Option<std::sync::Arc<$connection>> {
            self.core.connection(id)
        }

        /// Snapshot of live connections ordered by id
        pub fn connections(&self) -> Vec<std::sync::Arc<$connection>> {
            self.core.connections()
        }

        pub fn connection_count(&self) -> usize {
            self.core.connection_count()
        }

        /// Subscribe to connection added/removed notifications
        pub fn events(
            &self,
        ) -> tokio::sync::broadcast::Receiver<$crate::net::server::ServerEvent<$connection>> {
            self.core.subscribe()
        }
    };
}

pub(crate) use server_accessors;
