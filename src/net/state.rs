//! Entity lifecycle types
//!
//! Lifecycle states, disconnect reasons and receiver kinds shared by every
//! client, server-accepted connection and server.

use std::fmt;

/// Lifecycle state of a client or connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Created, transport not opened yet
    Uninitialized,
    /// Transport being opened (TCP connect, TLS or WebSocket handshake)
    Connecting,
    /// Transport open, messages flowing
    Connected,
    /// Disconnect in progress
    Disconnecting,
    /// Terminal state
    Disconnected,
}

impl EntityState {
    /// Check if the entity can send and receive messages
    pub fn is_connected(&self) -> bool {
        matches!(self, EntityState::Connected)
    }

    /// Check if the entity is still alive (not disconnecting/disconnected)
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            EntityState::Disconnecting | EntityState::Disconnected
        )
    }

    /// Get a human-readable name for the state
    pub fn name(&self) -> &'static str {
        match self {
            EntityState::Uninitialized => "Uninitialized",
            EntityState::Connecting => "Connecting",
            EntityState::Connected => "Connected",
            EntityState::Disconnecting => "Disconnecting",
            EntityState::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Why an entity was disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DisconnectReason {
    /// Disconnect requested by local code
    Requested = 0,
    /// Zero-byte read, socket reset or other transport failure
    ConnectionLost = 1,
    /// Unknown message id or malformed frame
    InvalidDataReceived = 2,
    /// Transport refused an outbound write
    InvalidMessageSent = 3,
    /// TLS handshake failed
    SslAuthenticationFailed = 4,
    /// Message rate ceiling exceeded
    Spam = 5,
    /// The owning server was stopped
    ServerStopped = 6,
}

impl DisconnectReason {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Messages already handed to the queue are dropped instead of handled
    pub fn discards_pending(&self) -> bool {
        matches!(self, DisconnectReason::InvalidDataReceived | DisconnectReason::Spam)
    }

    /// Get a human-readable name for the reason
    pub fn name(&self) -> &'static str {
        match self {
            DisconnectReason::Requested => "Requested",
            DisconnectReason::ConnectionLost => "ConnectionLost",
            DisconnectReason::InvalidDataReceived => "InvalidDataReceived",
            DisconnectReason::InvalidMessageSent => "InvalidMessageSent",
            DisconnectReason::SslAuthenticationFailed => "SslAuthenticationFailed",
            DisconnectReason::Spam => "Spam",
            DisconnectReason::ServerStopped => "ServerStopped",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The category of entity a message is dispatched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiverKind {
    TcpClient,
    TcpConnection,
    UdpClient,
    UdpConnection,
    WebSocketClient,
    WebSocketConnection,
}

impl ReceiverKind {
    pub fn name(&self) -> &'static str {
        match self {
            ReceiverKind::TcpClient => "TcpClient",
            ReceiverKind::TcpConnection => "TcpConnection",
            ReceiverKind::UdpClient => "UdpClient",
            ReceiverKind::UdpConnection => "UdpConnection",
            ReceiverKind::WebSocketClient => "WebSocketClient",
            ReceiverKind::WebSocketConnection => "WebSocketConnection",
        }
    }
}

impl fmt::Display for ReceiverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
