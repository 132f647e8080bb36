//! Protocol module
//!
//! Turns messages into wire bytes and back:
//! - `frame` - the default length-prefixed frame protocol
//! - `transform` - optional compression and encryption of frame fields

pub mod frame;
pub mod transform;

use bytes::{Bytes, BytesMut};

pub use frame::{DefaultProtocol, HEADER_SIZE};
pub use transform::{ChaChaTransform, PayloadTransform, ZlibTransform};

use crate::error::ProtocolError;
use crate::message::{Message, Registry};

/// A wire protocol shared by every entity of an engine
pub trait Protocol: Send + Sync + std::fmt::Debug {
    /// Size of each socket read
    fn network_buffer_length(&self) -> usize;

    /// Per-entity ceiling on messages received per second; 0 disables it
    fn max_received_messages_per_second(&self) -> u32;

    /// Encode one message as a complete frame
    fn serialize(&self, message: &dyn Message) -> Result<Bytes, ProtocolError>;

    /// Parse every complete frame at the front of `buffer`.
    ///
    /// Consumed bytes are removed from the buffer. A trailing partial frame
    /// is left in place until more data arrives. Any error means the stream
    /// can no longer be trusted and the sender should be dropped.
    fn try_parse(
        &self,
        registry: &Registry,
        buffer: &mut BytesMut,
    ) -> Result<Vec<Box<dyn Message>>, ProtocolError>;
}
