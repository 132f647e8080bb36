//! Integration tests for the default frame protocol
//!
//! These tests verify:
//! - Serialize/parse round trips for registered message types
//! - Partial frame buffering across reads
//! - Batch parsing of back-to-back frames
//! - Rejection of unknown message ids

mod common;

use bytes::BytesMut;
use pretty_assertions::assert_eq;

use common::{Echo, Telemetry};
use netframe::config::ProtocolConfig;
use netframe::error::ProtocolError;
use netframe::message::AsAny;
use netframe::protocol::{ChaChaTransform, ZlibTransform};
use netframe::{DefaultProtocol, Message, MessageType, Protocol, Registry};

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_message::<Echo>().unwrap();
    registry.register_message::<Telemetry>().unwrap();
    registry
}

fn telemetry() -> Telemetry {
    Telemetry {
        unit: 513,
        online: true,
        readings: vec![1.5, -0.25, 1e9],
        label: Some("north-ridge".to_string()),
        delta: -42,
    }
}

fn take<M: MessageType + Clone>(message: &Box<dyn Message>) -> M {
    message
        .as_ref()
        .as_any()
        .downcast_ref::<M>()
        .cloned()
        .expect("unexpected message type")
}

/// Test that a serialized message parses back to equal fields
#[test]
fn test_round_trip() {
    let protocol = DefaultProtocol::new();
    let registry = registry();
    let original = telemetry();

    let bytes = protocol.serialize(&original).unwrap();
    let mut buffer = BytesMut::from(&bytes[..]);
    let messages = protocol.try_parse(&registry, &mut buffer).unwrap();

    assert_eq!(messages.len(), 1);
    assert_eq!(take::<Telemetry>(&messages[0]), original);
    assert!(buffer.is_empty());
}

/// Test that the header carries id, payload length and version byte
#[test]
fn test_wire_header() {
    let protocol = DefaultProtocol::new();
    let bytes = protocol.serialize(&telemetry()).unwrap();

    assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), Telemetry::ID);
    let length = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
    assert_eq!(length, bytes.len() - 6);
    assert_eq!(bytes[6], Telemetry::VERSION);
}

/// Test that a header plus part of the payload waits for the rest
#[test]
fn test_partial_frame_buffering() {
    let protocol = DefaultProtocol::new();
    let registry = registry();

    // version byte + u32 + string length prefix + "x" = 10 payload bytes
    let frame = protocol.serialize(&Echo::new(7, "x")).unwrap();
    assert_eq!(frame.len(), 6 + 10);

    let mut buffer = BytesMut::from(&frame[..9]);
    let messages = protocol.try_parse(&registry, &mut buffer).unwrap();
    assert!(messages.is_empty());
    assert_eq!(buffer.len(), 9);

    buffer.extend_from_slice(&frame[9..]);
    let messages = protocol.try_parse(&registry, &mut buffer).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(take::<Echo>(&messages[0]), Echo::new(7, "x"));
    assert!(buffer.is_empty());
}

/// Test that feeding a stream one byte at a time still yields every message
#[test]
fn test_byte_at_a_time() {
    let protocol = DefaultProtocol::new();
    let registry = registry();
    let mut stream = Vec::new();
    stream.extend_from_slice(&protocol.serialize(&Echo::new(1, "one")).unwrap());
    stream.extend_from_slice(&protocol.serialize(&telemetry()).unwrap());

    let mut buffer = BytesMut::new();
    let mut parsed = Vec::new();
    for byte in stream {
        buffer.extend_from_slice(&[byte]);
        parsed.extend(protocol.try_parse(&registry, &mut buffer).unwrap());
    }

    assert_eq!(parsed.len(), 2);
    assert_eq!(take::<Echo>(&parsed[0]), Echo::new(1, "one"));
    assert_eq!(take::<Telemetry>(&parsed[1]), telemetry());
}

/// Test that back-to-back frames parse in wire order from one call
#[test]
fn test_batch_parsing() {
    let protocol = DefaultProtocol::new();
    let registry = registry();

    let mut buffer = BytesMut::new();
    buffer.extend_from_slice(&protocol.serialize(&Echo::new(1, "first")).unwrap());
    buffer.extend_from_slice(&protocol.serialize(&Echo::new(2, "second")).unwrap());

    let messages = protocol.try_parse(&registry, &mut buffer).unwrap();
    let echoes: Vec<Echo> = messages.iter().map(take::<Echo>).collect();
    assert_eq!(echoes, vec![Echo::new(1, "first"), Echo::new(2, "second")]);
}

/// Test that an unregistered id is a hard error even after valid frames
#[test]
fn test_unknown_id_rejected() {
    let protocol = DefaultProtocol::new();
    let registry = registry();

    let mut buffer = BytesMut::new();
    buffer.extend_from_slice(&protocol.serialize(&Echo::new(1, "ok")).unwrap());
    buffer.extend_from_slice(&[0xE7, 0x03, 1, 0, 0, 0, 1]);

    assert_eq!(
        protocol.try_parse(&registry, &mut buffer).unwrap_err(),
        ProtocolError::UnknownMessageId(999)
    );
}

/// Test that a protocol built from config compresses and still round trips
#[test]
fn test_configured_compression() {
    let config = ProtocolConfig {
        compression: true,
        ..ProtocolConfig::default()
    };
    let protocol = DefaultProtocol::from_config(&config);
    let registry = registry();
    let original = Echo::new(3, &"chatter ".repeat(200));

    let compressed = protocol.serialize(&original).unwrap();
    let plain = DefaultProtocol::new().serialize(&original).unwrap();
    assert!(compressed.len() < plain.len());

    let mut buffer = BytesMut::from(&compressed[..]);
    let messages = protocol.try_parse(&registry, &mut buffer).unwrap();
    assert_eq!(take::<Echo>(&messages[0]), original);
}

/// Test that encrypted frames keep their header readable
#[test]
fn test_encrypted_frames() {
    let key = [7u8; 32];
    let protocol = DefaultProtocol::new()
        .with_transform(ZlibTransform::new())
        .with_transform(ChaChaTransform::new(&key));
    let registry = registry();

    let bytes = protocol.serialize(&Echo::new(5, "sealed")).unwrap();
    assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), Echo::ID);
    assert!(!bytes.windows(6).any(|window| window == b"sealed"));

    let mut buffer = BytesMut::from(&bytes[..]);
    let messages = protocol.try_parse(&registry, &mut buffer).unwrap();
    assert_eq!(take::<Echo>(&messages[0]), Echo::new(5, "sealed"));
}
