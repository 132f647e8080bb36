//! Message and handler registry
//!
//! Maps numeric message ids to message factories, and
//! `(message type, receiver kind)` pairs to handler functions. A registry is
//! filled once at startup and then frozen inside an [`Engine`](crate::Engine).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use super::{AsAny, Message, MessageId, MessageType};
use crate::error::ProtocolError;
use crate::net::entity::Entity;
use crate::net::state::ReceiverKind;

/// Type-erased handler stored in the registry
type ErasedHandler = Box<dyn Fn(&dyn Message, &dyn Any) -> anyhow::Result<()> + Send + Sync>;

/// Factory for a registered message type
struct MessageEntry {
    create: fn() -> Box<dyn Message>,
    version: u8,
    type_name: &'static str,
}

/// A handler that did not complete normally
#[derive(Error, Debug)]
pub enum HandlerFailure {
    #[error("handler returned an error: {0:#}")]
    Error(anyhow::Error),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Registry of message types and their handlers
#[derive(Default)]
pub struct Registry {
    messages: HashMap<MessageId, MessageEntry>,
    ids_by_type: HashMap<TypeId, MessageId>,
    handlers: HashMap<(TypeId, ReceiverKind), ErasedHandler>,
}

fn create_boxed<M: MessageType>() -> Box<dyn Message> {
    Box::new(M::default())
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a concrete message type under its id
    pub fn register_message<M: MessageType>(&mut self) -> Result<(), ProtocolError> {
        if self.messages.contains_key(&M::ID) {
            return Err(ProtocolError::DuplicateMessageId(M::ID));
        }

        self.messages.insert(
            M::ID,
            MessageEntry {
                create: create_boxed::<M>,
                version: M::VERSION,
                type_name: std::any::type_name::<M>(),
            },
        );
        self.ids_by_type.insert(TypeId::of::<M>(), M::ID);

        debug!(
            message_id = M::ID,
            version = M::VERSION,
            message_type = std::any::type_name::<M>(),
            "Message type registered"
        );
        Ok(())
    }

    /// Register a handler for messages of type `M` received by entities of type `E`.
    ///
    /// Registering a second handler for the same pair replaces the first.
    pub fn register_handler<M, E, F>(&mut self, handler: F) -> Result<(), ProtocolError>
    where
        M: MessageType,
        E: Entity,
        F: Fn(&M, &Arc<E>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if !self.ids_by_type.contains_key(&TypeId::of::<M>()) {
            return Err(ProtocolError::UnregisteredMessageType);
        }

        let erased: ErasedHandler = Box::new(move |message, receiver| {
            let message = message
                .as_any()
                .downcast_ref::<M>()
                .ok_or_else(|| anyhow::anyhow!("message type mismatch"))?;
            let receiver = receiver
                .downcast_ref::<Arc<E>>()
                .ok_or_else(|| anyhow::anyhow!("receiver type mismatch"))?;
            handler(message, receiver)
        });
        self.handlers.insert((TypeId::of::<M>(), E::KIND), erased);

        debug!(
            message_id = M::ID,
            receiver = %E::KIND,
            "Handler registered"
        );
        Ok(())
    }

    /// Create a default instance of the message registered under `id`
    pub fn create_message(&self, id: MessageId) -> Option<Box<dyn Message>> {
        self.messages.get(&id).map(|entry| (entry.create)())
    }

    /// The version byte expected for `id`
    pub fn expected_version(&self, id: MessageId) -> Option<u8> {
        self.messages.get(&id).map(|entry| entry.version)
    }

    /// The Rust type name registered for `id`
    pub fn type_name(&self, id: MessageId) -> Option<&'static str> {
        self.messages.get(&id).map(|entry| entry.type_name)
    }

    /// Check if a message id is registered
    pub fn is_registered(&self, id: MessageId) -> bool {
        self.messages.contains_key(&id)
    }

    /// Check if a handler exists for `M` on entities of kind `kind`
    pub fn has_handler<M: MessageType>(&self, kind: ReceiverKind) -> bool {
        self.handlers.contains_key(&(TypeId::of::<M>(), kind))
    }

    /// Number of registered message types
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Invoke the handler registered for this message and receiver kind.
    ///
    /// Returns `Ok(false)` when no handler is registered; the message is
    /// dropped. Handler errors and panics are contained and returned.
    pub fn dispatch<E: Entity>(
        &self,
        message: &dyn Message,
        receiver: &Arc<E>,
    ) -> Result<bool, HandlerFailure> {
        let key = (message.as_any().type_id(), E::KIND);
        let Some(handler) = self.handlers.get(&key) else {
            trace!(
                message_id = message.message_id(),
                message_type = self.type_name(message.message_id()).unwrap_or("unknown"),
                receiver = %E::KIND,
                "No handler registered, message dropped"
            );
            return Ok(false);
        };

        let receiver: &dyn Any = receiver;
        match catch_unwind(AssertUnwindSafe(|| handler(message, receiver))) {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(HandlerFailure::Error(e)),
            Err(payload) => Err(HandlerFailure::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("messages", &self.messages.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
