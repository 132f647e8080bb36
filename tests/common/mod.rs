//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use netframe::error::ProtocolError;
use netframe::{
    Entity, EntityState, Message, MessageId, MessageReader, MessageType, MessageWriter,
};

/// How long any single wait may take before a test fails
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Message echoed back by test servers
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Echo {
    pub sequence: u32,
    pub text: String,
}

impl Echo {
    pub fn new(sequence: u32, text: &str) -> Self {
        Self {
            sequence,
            text: text.to_string(),
        }
    }
}

impl Message for Echo {
    fn message_id(&self) -> MessageId {
        Self::ID
    }

    fn serialize(&self, writer: &mut MessageWriter) {
        writer.write(&self.sequence);
        writer.write(&self.text);
    }

    fn deserialize(&mut self, reader: &mut MessageReader<'_>) -> Result<(), ProtocolError> {
        self.sequence = reader.read_value()?;
        self.text = reader.read_value()?;
        Ok(())
    }
}

impl MessageType for Echo {
    const ID: MessageId = 10;
}

/// Message carrying several field types, version 3
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Telemetry {
    pub unit: u16,
    pub online: bool,
    pub readings: Vec<f64>,
    pub label: Option<String>,
    pub delta: i64,
}

impl Message for Telemetry {
    fn message_id(&self) -> MessageId {
        Self::ID
    }

    fn version(&self) -> u8 {
        Self::VERSION
    }

    fn serialize(&self, writer: &mut MessageWriter) {
        writer.write(&self.unit);
        writer.write(&self.online);
        writer.write(&self.readings);
        writer.write(&self.label);
        writer.write(&self.delta);
    }

    fn deserialize(&mut self, reader: &mut MessageReader<'_>) -> Result<(), ProtocolError> {
        self.unit = reader.read_value()?;
        self.online = reader.read_value()?;
        self.readings = reader.read_value()?;
        self.label = reader.read_value()?;
        self.delta = reader.read_value()?;
        Ok(())
    }
}

impl MessageType for Telemetry {
    const ID: MessageId = 11;
    const VERSION: u8 = 3;
}

pub fn localhost() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Poll until `check` holds, panicking after [`TIMEOUT`]
pub async fn wait_until<F: FnMut() -> bool>(what: &str, mut check: F) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_state<E: Entity>(entity: &Arc<E>, state: EntityState) {
    wait_until(&format!("state {}", state), || entity.state() == state).await;
}

/// Receive with [`TIMEOUT`]
pub async fn recv<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}
