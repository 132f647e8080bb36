//! Engine module
//!
//! Contains the shared state every client, connection and server runs on.

use std::sync::Arc;

use tracing::info;

use crate::config::NetframeConfig;
use crate::message::{Message, Registry};
use crate::protocol::{DefaultProtocol, Protocol};
use crate::queue::DEFAULT_CONNECTIONS_PER_QUEUE;

/// Registry and protocol shared across all entities.
///
/// Cheap to clone; clones share the same frozen registry.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    protocol: Arc<dyn Protocol>,
    connections_per_queue: usize,
}

impl Engine {
    /// Freeze a registry together with a protocol
    pub fn new<P: Protocol + 'static>(registry: Registry, protocol: P) -> Self {
        Self {
            registry: Arc::new(registry),
            protocol: Arc::new(protocol),
            connections_per_queue: DEFAULT_CONNECTIONS_PER_QUEUE,
        }
    }

    /// Create an engine using the default frame protocol built from config
    pub fn from_config(registry: Registry, config: &NetframeConfig) -> Self {
        let protocol = DefaultProtocol::from_config(&config.protocol);
        info!(
            messages = registry.message_count(),
            protocol = ?protocol,
            connections_per_queue = config.queue.connections_per_queue,
            "Engine initialized"
        );
        Self::new(registry, protocol).with_connections_per_queue(config.queue.connections_per_queue)
    }

    /// Set how many server connections share one processing queue
    pub fn with_connections_per_queue(mut self, count: usize) -> Self {
        self.connections_per_queue = count.max(1);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn protocol(&self) -> &dyn Protocol {
        self.protocol.as_ref()
    }

    pub fn connections_per_queue(&self) -> usize {
        self.connections_per_queue
    }

    /// Serialize a message with the engine's protocol
    pub fn serialize(&self, message: &dyn Message) -> crate::Result<bytes::Bytes> {
        Ok(self.protocol.serialize(message)?)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("protocol", &self.protocol)
            .field("connections_per_queue", &self.connections_per_queue)
            .finish()
    }
}
