//! Error handling module
//!
//! Defines custom error types for the Netframe engine.

use std::io;

use thiserror::Error;

use crate::message::MessageId;

/// Main error type for the Netframe engine
#[derive(Error, Debug)]
pub enum NetframeError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS setup errors
    #[error("TLS error: {0}")]
    Tls(String),
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Entity has already been disconnected")]
    Terminated,

    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Server is not running")]
    NotRunning,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connect to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },
}

/// Protocol-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown message id: {0}")]
    UnknownMessageId(MessageId),

    #[error("Message id {0} is already registered")]
    DuplicateMessageId(MessageId),

    #[error("Message type is not registered")]
    UnregisteredMessageType,

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unexpected end of payload: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("Version mismatch for message {id}: expected {expected}, got {actual}")]
    VersionMismatch {
        id: MessageId,
        expected: u8,
        actual: u8,
    },

    #[error("Invalid string encoding")]
    InvalidStringEncoding,

    #[error("Payload transform failed: {0}")]
    Transform(String),
}

/// Result type alias for Netframe operations
pub type Result<T> = std::result::Result<T, NetframeError>;
