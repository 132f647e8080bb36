//! Default frame protocol
//!
//! Frame layout, all integers little-endian:
//!
//! ```text
//! u16  message id
//! u32  payload length (version byte included)
//! u8   version byte
//! ...  message fields
//! ```

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use super::transform::{PayloadTransform, ZlibTransform};
use super::Protocol;
use crate::config::ProtocolConfig;
use crate::error::ProtocolError;
use crate::message::{Message, MessageReader, MessageWriter, Registry};

/// Size of the id + length header
pub const HEADER_SIZE: usize = 6;

/// Default socket receive buffer size
pub const DEFAULT_NETWORK_BUFFER_LENGTH: usize = 8 * 1024;

/// Default per-connection message ceiling (messages per second)
pub const DEFAULT_MAX_MESSAGES_PER_SECOND: u32 = 1000;

/// Default ceiling on a single frame payload (1 MiB)
pub const DEFAULT_MAX_PAYLOAD_LENGTH: usize = 1024 * 1024;

/// Length-prefixed frame protocol
pub struct DefaultProtocol {
    network_buffer_length: usize,
    max_messages_per_second: u32,
    max_payload_length: usize,
    strict_versions: bool,
    transforms: Vec<Box<dyn PayloadTransform>>,
}

impl DefaultProtocol {
    pub fn new() -> Self {
        Self {
            network_buffer_length: DEFAULT_NETWORK_BUFFER_LENGTH,
            max_messages_per_second: DEFAULT_MAX_MESSAGES_PER_SECOND,
            max_payload_length: DEFAULT_MAX_PAYLOAD_LENGTH,
            strict_versions: true,
            transforms: Vec::new(),
        }
    }

    /// Build a protocol from configuration
    pub fn from_config(config: &ProtocolConfig) -> Self {
        let mut protocol = Self::new()
            .with_network_buffer_length(config.network_buffer_length)
            .with_max_messages_per_second(config.max_received_messages_per_second)
            .with_max_payload_length(config.max_payload_length)
            .with_strict_versions(config.strict_versions);
        if config.compression {
            protocol = protocol.with_transform(
                ZlibTransform::new().with_decompress_limit(config.max_payload_length),
            );
        }
        protocol
    }

    pub fn with_network_buffer_length(mut self, length: usize) -> Self {
        self.network_buffer_length = length.max(1);
        self
    }

    /// Set the spam ceiling; 0 disables it
    pub fn with_max_messages_per_second(mut self, max: u32) -> Self {
        self.max_messages_per_second = max;
        self
    }

    pub fn with_max_payload_length(mut self, max: usize) -> Self {
        self.max_payload_length = max;
        self
    }

    /// Reject frames whose version byte differs from the registered version
    pub fn with_strict_versions(mut self, strict: bool) -> Self {
        self.strict_versions = strict;
        self
    }

    /// Append a payload transform
    pub fn with_transform<T: PayloadTransform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn max_payload_length(&self) -> usize {
        self.max_payload_length
    }

    fn encode_fields(&self, fields: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut data = fields.to_vec();
        for transform in &self.transforms {
            data = transform.encode(&data)?;
        }
        Ok(data)
    }

    fn decode_fields(&self, fields: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut data = fields.to_vec();
        for transform in self.transforms.iter().rev() {
            data = transform.decode(&data)?;
        }
        Ok(data)
    }

    /// Deserialize one payload (version byte + fields) into a message
    fn decode_payload(
        &self,
        registry: &Registry,
        id: u16,
        payload: &[u8],
    ) -> Result<Box<dyn Message>, ProtocolError> {
        let mut message = registry
            .create_message(id)
            .ok_or(ProtocolError::UnknownMessageId(id))?;

        let version = payload[0];
        let expected = message.version();
        if self.strict_versions && version != expected {
            return Err(ProtocolError::VersionMismatch {
                id,
                expected,
                actual: version,
            });
        }

        let decoded;
        let fields = if self.transforms.is_empty() {
            &payload[1..]
        } else {
            decoded = self.decode_fields(&payload[1..])?;
            &decoded[..]
        };

        let mut reader = MessageReader::new(fields);
        message.deserialize(&mut reader)?;
        if reader.has_remaining() {
            return Err(ProtocolError::MalformedFrame(format!(
                "{} unread payload bytes for message {}",
                reader.remaining(),
                id
            )));
        }
        Ok(message)
    }
}

impl Default for DefaultProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for DefaultProtocol {
    fn network_buffer_length(&self) -> usize {
        self.network_buffer_length
    }

    fn max_received_messages_per_second(&self) -> u32 {
        self.max_messages_per_second
    }

    fn serialize(&self, message: &dyn Message) -> Result<Bytes, ProtocolError> {
        let mut writer = MessageWriter::with_capacity(64);
        writer.write_u16(message.message_id());

        let length_pos = writer.len();
        writer.write_u32(0);
        let payload_start = writer.len();

        writer.write_u8(message.version());
        if self.transforms.is_empty() {
            message.serialize(&mut writer);
        } else {
            let mut fields = MessageWriter::new();
            message.serialize(&mut fields);
            writer.write_raw(&self.encode_fields(fields.as_bytes())?);
        }

        let payload_length = writer.len() - payload_start;
        if payload_length > self.max_payload_length {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_length,
                max: self.max_payload_length,
            });
        }
        writer.patch_u32(length_pos, payload_length as u32);

        Ok(writer.freeze())
    }

    fn try_parse(
        &self,
        registry: &Registry,
        buffer: &mut BytesMut,
    ) -> Result<Vec<Box<dyn Message>>, ProtocolError> {
        let mut messages = Vec::new();
        let mut cursor = 0usize;

        loop {
            let unread = buffer.len() - cursor;
            if unread < HEADER_SIZE {
                break;
            }

            let header = &buffer[cursor..cursor + HEADER_SIZE];
            let id = u16::from_le_bytes([header[0], header[1]]);
            let length = u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as usize;

            if length == 0 {
                return Err(ProtocolError::MalformedFrame(format!(
                    "message {} has an empty payload",
                    id
                )));
            }
            if length > self.max_payload_length {
                return Err(ProtocolError::PayloadTooLarge {
                    size: length,
                    max: self.max_payload_length,
                });
            }
            if !registry.is_registered(id) {
                warn!(message_id = id, "Unknown message id received");
                return Err(ProtocolError::UnknownMessageId(id));
            }

            if unread - HEADER_SIZE < length {
                // Partial frame; the header is re-read on the next pass
                buffer.reserve(HEADER_SIZE + length - unread);
                break;
            }

            let payload_start = cursor + HEADER_SIZE;
            let payload = &buffer[payload_start..payload_start + length];
            messages.push(self.decode_payload(registry, id, payload)?);
            cursor = payload_start + length;
        }

        if cursor > 0 {
            buffer.advance(cursor);
        }

        trace!(
            parsed = messages.len(),
            buffered = buffer.len(),
            "Frame parse pass complete"
        );
        Ok(messages)
    }
}

impl std::fmt::Debug for DefaultProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultProtocol")
            .field("network_buffer_length", &self.network_buffer_length)
            .field("max_messages_per_second", &self.max_messages_per_second)
            .field("max_payload_length", &self.max_payload_length)
            .field("strict_versions", &self.strict_versions)
            .field(
                "transforms",
                &self.transforms.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
