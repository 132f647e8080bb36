//! Message envelope module
//!
//! Defines the message abstraction the frame protocol produces and consumes:
//! - `Message` - object-safe serialize/deserialize contract
//! - `MessageType` - static id and version of a concrete message
//! - `codec` - little-endian field writer/reader
//! - `registry` - message id and handler registration

use std::any::Any;
use std::fmt::Debug;

pub mod codec;
pub mod registry;

pub use codec::{MessageReader, MessageWriter, WireValue};
pub use registry::{HandlerFailure, Registry};

use crate::error::ProtocolError;

/// Process-wide numeric message identifier
pub type MessageId = u16;

/// Default message version byte
pub const DEFAULT_VERSION: u8 = 1;

/// Upcast helper so `&dyn Message` can be downcast to its concrete type
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A message exchanged between endpoints
pub trait Message: AsAny + Debug + Send + Sync {
    /// The numeric id written in the frame header
    fn message_id(&self) -> MessageId;

    /// The version byte written at the start of the payload
    fn version(&self) -> u8 {
        DEFAULT_VERSION
    }

    /// Write the message fields
    fn serialize(&self, writer: &mut MessageWriter);

    /// Read the message fields into `self`
    fn deserialize(&mut self, reader: &mut MessageReader<'_>) -> Result<(), ProtocolError>;
}

/// Static identity of a concrete message type
pub trait MessageType: Message + Default + 'static {
    /// The numeric id of this message type
    const ID: MessageId;

    /// The version byte this type writes and expects
    const VERSION: u8 = DEFAULT_VERSION;
}
