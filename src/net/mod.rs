//! Networking module
//!
//! Entities that drive sockets and feed the frame protocol:
//! - `entity` - shared state, receive pipeline and the disconnect path
//! - `tcp`, `udp`, `websocket` - clients, server-side connections and servers
//! - `group` - broadcast lists
//! - `monitoring` - per-connection message rate tracking

pub mod entity;
pub mod group;
pub mod monitoring;
pub mod server;
pub mod state;
pub mod tcp;
pub mod tls;
pub(crate) mod transport;
pub mod udp;
pub mod websocket;

pub use entity::{ConnectionId, Entity, EntityCore, EntityEvent};
pub use group::ConnectionGroup;
pub use monitoring::ConnectionMonitoring;
pub use server::{ServerConnection, ServerEvent};
pub use state::{DisconnectReason, EntityState, ReceiverKind};
pub use tcp::{TcpClient, TcpConnection, TcpServer};
pub use udp::{UdpClient, UdpConnection, UdpServer};
pub use websocket::{WebSocketClient, WebSocketConnection, WebSocketServer};
