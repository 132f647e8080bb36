//! Entity core
//!
//! State shared by every client and server-side connection:
//! - lifecycle state and the single disconnect path
//! - receive buffer feeding the frame protocol
//!
//! Data handed to the processing queue before a disconnect is still parsed
//! and dispatched, unless the disconnect was for invalid data or spam.
//! - processing queue handle and outbound channel
//! - connect/disconnect notifications

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use super::monitoring::ConnectionMonitoring;
use super::state::{DisconnectReason, EntityState, ReceiverKind};
use crate::engine::Engine;
use crate::error::{NetworkError, Result};
use crate::message::{HandlerFailure, Message};
use crate::queue::QueueHandle;

/// Server-assigned connection identifier; clients use 0
pub type ConnectionId = u64;

/// Lifecycle notification published by an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityEvent {
    Connected,
    Disconnected(DisconnectReason),
}

type DisconnectHook = Box<dyn FnOnce(DisconnectReason) + Send + 'static>;

#[derive(Default)]
struct Hooks {
    fired: Option<DisconnectReason>,
    pending: Vec<DisconnectHook>,
}

/// Anything that owns a socket and receives messages
pub trait Entity: Send + Sync + Sized + 'static {
    /// Dispatch key for handlers registered against this entity type
    const KIND: ReceiverKind;

    fn core(&self) -> &EntityCore;

    fn state(&self) -> EntityState {
        self.core().state()
    }

    fn is_connected(&self) -> bool {
        self.core().state().is_connected()
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        self.core().remote_address()
    }

    /// The reason passed to the first disconnect, if any
    fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.core().disconnect_reason()
    }

    /// Serialize and queue a message for sending
    fn send(&self, message: &dyn Message) -> Result<()> {
        self.core().send(message)
    }

    /// Queue pre-serialized frame bytes for sending
    fn send_bytes(&self, data: Bytes) -> Result<()> {
        self.core().send_bytes(data)
    }

    /// Disconnect; returns `false` if already disconnected
    fn disconnect(&self, reason: DisconnectReason) -> bool {
        self.core().disconnect(reason)
    }

    /// Subscribe to connect/disconnect notifications
    fn events(&self) -> broadcast::Receiver<EntityEvent> {
        self.core().events()
    }
}

/// Shared per-entity state
pub struct EntityCore {
    engine: Engine,
    kind: ReceiverKind,
    id: ConnectionId,
    remote: RwLock<Option<SocketAddr>>,
    state: RwLock<EntityState>,
    reason: RwLock<Option<DisconnectReason>>,
    notified: AtomicBool,
    buffer: Arc<Mutex<BytesMut>>,
    monitoring: ConnectionMonitoring,
    queue: Mutex<Option<QueueHandle>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    shutdown: watch::Sender<bool>,
    hooks: Mutex<Hooks>,
    events: broadcast::Sender<EntityEvent>,
}

impl EntityCore {
    pub fn new(
        engine: Engine,
        kind: ReceiverKind,
        id: ConnectionId,
        remote: Option<SocketAddr>,
    ) -> Self {
        let buffer_length = engine.protocol().network_buffer_length();
        let (shutdown, _) = watch::channel(false);
        let (events, _) = broadcast::channel(16);
        Self {
            engine,
            kind,
            id,
            remote: RwLock::new(remote),
            state: RwLock::new(EntityState::Uninitialized),
            reason: RwLock::new(None),
            notified: AtomicBool::new(false),
            buffer: Arc::new(Mutex::new(BytesMut::with_capacity(buffer_length))),
            monitoring: ConnectionMonitoring::new(),
            queue: Mutex::new(None),
            outbound: Mutex::new(None),
            shutdown,
            hooks: Mutex::new(Hooks::default()),
            events,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn kind(&self) -> ReceiverKind {
        self.kind
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        *self.remote.read()
    }

    pub(crate) fn set_remote_address(&self, address: SocketAddr) {
        *self.remote.write() = Some(address);
    }

    pub fn state(&self) -> EntityState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, new_state: EntityState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        if old_state != new_state {
            trace!(
                receiver = %self.kind,
                connection_id = self.id,
                old_state = %old_state,
                new_state = %new_state,
                "Entity state changed"
            );
        }
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        *self.reason.read()
    }

    pub fn monitoring(&self) -> &ConnectionMonitoring {
        &self.monitoring
    }

    pub fn events(&self) -> broadcast::Receiver<EntityEvent> {
        self.events.subscribe()
    }

    /// A receiver that flips to `true` once the entity starts disconnecting
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Claim the entity for a client connect attempt
    pub(crate) fn begin_connect(&self) -> Result<()> {
        let mut state = self.state.write();
        match *state {
            EntityState::Uninitialized => {
                *state = EntityState::Connecting;
                Ok(())
            }
            EntityState::Connecting | EntityState::Connected => {
                Err(NetworkError::AlreadyConnected.into())
            }
            EntityState::Disconnecting | EntityState::Disconnected => {
                Err(NetworkError::Terminated.into())
            }
        }
    }

    /// Roll back a failed connect attempt
    pub(crate) fn abort_connect(&self) {
        let mut state = self.state.write();
        if *state == EntityState::Connecting {
            *state = EntityState::Uninitialized;
        }
    }

    /// Install the queue and outbound channel used once connected
    pub(crate) fn attach(&self, queue: QueueHandle, outbound: mpsc::UnboundedSender<Bytes>) {
        *self.queue.lock() = Some(queue);
        *self.outbound.lock() = Some(outbound);
    }

    /// Flip to `Connected` and notify subscribers.
    ///
    /// Returns `false` if the entity was disconnected in the meantime.
    pub(crate) fn mark_connected(&self) -> bool {
        {
            let mut state = self.state.write();
            if !state.is_active() {
                return false;
            }
            *state = EntityState::Connected;
        }

        info!(
            receiver = %self.kind,
            connection_id = self.id,
            address = ?self.remote_address(),
            "Connected"
        );
        let _ = self.events.send(EntityEvent::Connected);
        true
    }

    /// Run `hook` once when the entity disconnects.
    ///
    /// Runs immediately if the entity is already disconnected.
    pub fn on_disconnect<F>(&self, hook: F)
    where
        F: FnOnce(DisconnectReason) + Send + 'static,
    {
        let mut hooks = self.hooks.lock();
        match hooks.fired {
            Some(reason) => {
                drop(hooks);
                hook(reason);
            }
            None => hooks.pending.push(Box::new(hook)),
        }
    }

    pub fn send(&self, message: &dyn Message) -> Result<()> {
        if !self.state().is_connected() {
            return Err(NetworkError::NotConnected.into());
        }
        let data = self.engine.serialize(message)?;
        self.send_bytes(data)
    }

    pub fn send_bytes(&self, data: Bytes) -> Result<()> {
        if !self.state().is_connected() {
            return Err(NetworkError::NotConnected.into());
        }
        let outbound = self.outbound.lock();
        match outbound.as_ref() {
            Some(tx) => tx
                .send(data)
                .map_err(|_| NetworkError::ConnectionClosed.into()),
            None => Err(NetworkError::NotConnected.into()),
        }
    }

    /// The single disconnect path. Only the first call has any effect.
    pub fn disconnect(&self, reason: DisconnectReason) -> bool {
        if self.notified.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.set_state(EntityState::Disconnecting);
        *self.reason.write() = Some(reason);

        // Stops reader and writer tasks
        let _ = self.shutdown.send(true);
        self.outbound.lock().take();
        if let Some(queue) = self.queue.lock().take() {
            // Reset after whatever is already queued has parsed the buffer
            let buffer = self.buffer.clone();
            if !queue.enqueue(move || *buffer.lock() = BytesMut::new()) {
                *self.buffer.lock() = BytesMut::new();
            }
            queue.release();
        } else {
            *self.buffer.lock() = BytesMut::new();
        }

        self.set_state(EntityState::Disconnected);

        let pending = {
            let mut hooks = self.hooks.lock();
            hooks.fired = Some(reason);
            std::mem::take(&mut hooks.pending)
        };
        for hook in pending {
            hook(reason);
        }

        info!(
            receiver = %self.kind,
            connection_id = self.id,
            address = ?self.remote_address(),
            reason = %reason,
            "Disconnected"
        );
        let _ = self.events.send(EntityEvent::Disconnected(reason));
        true
    }
}

impl std::fmt::Debug for EntityCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCore")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("remote", &self.remote_address())
            .field("state", &self.state())
            .field("reason", &self.disconnect_reason())
            .finish()
    }
}

/// Append received bytes and hand parsing to the entity's queue.
///
/// The buffer lock is held across the append and the enqueue so the queue
/// worker never parses a half-appended read.
pub(crate) fn receive<E: Entity>(entity: &Arc<E>, data: &[u8]) {
    let core = entity.core();
    let mut buffer = core.buffer.lock();
    if !core.state().is_connected() {
        return;
    }
    buffer.extend_from_slice(data);

    let queue = core.queue.lock();
    let Some(queue) = queue.as_ref() else {
        return;
    };
    let target = entity.clone();
    if !queue.enqueue(move || process_received(&target)) {
        debug!(
            receiver = %E::KIND,
            connection_id = core.id,
            "Queue rejected received data"
        );
    }
}

/// Check if queued messages must be dropped rather than handled
fn discarding(core: &EntityCore) -> bool {
    core.disconnect_reason().is_some_and(|reason| reason.discards_pending())
}

/// Parse buffered frames and dispatch each message in order
fn process_received<E: Entity>(entity: &Arc<E>) {
    let core = entity.core();
    if discarding(core) {
        return;
    }

    let engine = core.engine.clone();
    let parsed = {
        let mut buffer = core.buffer.lock();
        engine.protocol().try_parse(engine.registry(), &mut buffer)
    };

    let messages = match parsed {
        Ok(messages) => messages,
        Err(e) => {
            warn!(
                receiver = %E::KIND,
                connection_id = core.id,
                address = ?core.remote_address(),
                error = %e,
                "Invalid data received"
            );
            core.disconnect(DisconnectReason::InvalidDataReceived);
            return;
        }
    };

    let max_per_second = engine.protocol().max_received_messages_per_second();
    for message in messages {
        if core.monitoring.exceeds(max_per_second) {
            warn!(
                receiver = %E::KIND,
                connection_id = core.id,
                address = ?core.remote_address(),
                max_per_second,
                "Message rate exceeded"
            );
            core.disconnect(DisconnectReason::Spam);
            return;
        }
        if discarding(core) {
            return;
        }

        let message_id = message.message_id();
        let message_type = engine.registry().type_name(message_id).unwrap_or("unknown");
        match engine.registry().dispatch(message.as_ref(), entity) {
            Ok(_) => {}
            Err(HandlerFailure::Error(e)) => {
                warn!(
                    receiver = %E::KIND,
                    connection_id = core.id,
                    message_id,
                    message_type,
                    error = %e,
                    "Handler failed"
                );
            }
            Err(HandlerFailure::Panicked(msg)) => {
                error!(
                    receiver = %E::KIND,
                    connection_id = core.id,
                    message_id,
                    message_type,
                    panic = %msg,
                    "Handler panicked"
                );
            }
        }
    }
}
