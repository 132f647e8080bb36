//! Netframe Messaging Engine Library
//!
//! This library frames, serializes, dispatches and orders binary messages
//! exchanged over TCP, UDP and WebSocket connections.
//!
//! ## Modules
//!
//! - `config` - Engine configuration management
//! - `engine` - Shared registry and protocol
//! - `error` - Error types and result definitions
//! - `message` - Message contract, field codec and handler registry
//! - `net` - Clients, connections, servers and broadcast groups
//! - `protocol` - Frame protocol and payload transforms
//! - `queue` - Processing queues and queue pools

pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod net;
pub mod protocol;
pub mod queue;

// Re-export commonly used types
pub use config::NetframeConfig;
pub use engine::Engine;
pub use error::{NetframeError, Result};
pub use message::{Message, MessageId, MessageReader, MessageType, MessageWriter, Registry};
pub use net::{DisconnectReason, Entity, EntityState, ReceiverKind};
pub use protocol::{DefaultProtocol, Protocol};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
