//! Netframe Chat Relay Server
//!
//! Demo server for the Netframe engine: accepts TCP, UDP and WebSocket
//! clients and relays every chat message to everyone on the same transport.

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

use netframe::error::ProtocolError;
use netframe::net::{
    ConnectionGroup, ServerConnection, ServerEvent, TcpConnection, TcpServer, UdpConnection,
    UdpServer, WebSocketConnection, WebSocketServer,
};
use netframe::{
    DisconnectReason, Engine, Entity, Message, MessageId, MessageReader, MessageType,
    MessageWriter, NetframeConfig, Registry, VERSION,
};

/// A line of chat
#[derive(Debug, Default, Clone)]
struct ChatMessage {
    sender: String,
    text: String,
}

impl Message for ChatMessage {
    fn message_id(&self) -> MessageId {
        Self::ID
    }

    fn serialize(&self, writer: &mut MessageWriter) {
        writer.write(&self.sender);
        writer.write(&self.text);
    }

    fn deserialize(&mut self, reader: &mut MessageReader<'_>) -> Result<(), ProtocolError> {
        self.sender = reader.read_value()?;
        self.text = reader.read_value()?;
        Ok(())
    }
}

impl MessageType for ChatMessage {
    const ID: MessageId = 100;
}

/// One broadcast group per transport
struct Rooms {
    tcp: Arc<ConnectionGroup<TcpConnection>>,
    udp: Arc<ConnectionGroup<UdpConnection>>,
    websocket: Arc<ConnectionGroup<WebSocketConnection>>,
}

impl Rooms {
    fn new() -> Self {
        Self {
            tcp: Arc::new(ConnectionGroup::new("tcp-chat")),
            udp: Arc::new(ConnectionGroup::new("udp-chat")),
            websocket: Arc::new(ConnectionGroup::new("websocket-chat")),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    init_logging();

    info!("Netframe chat relay v{}", VERSION);

    // Load configuration
    let config = NetframeConfig::load().await?;
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let rooms = Rooms::new();
    let registry = build_registry(&rooms)?;
    let engine = Engine::from_config(registry, &config);

    let tcp = TcpServer::new(engine.clone(), config.tcp_address());
    let udp = UdpServer::new(engine.clone(), config.udp_address());
    let mut websocket = WebSocketServer::new(engine.clone(), config.websocket_address());
    if let Some(tls) = &config.tls {
        websocket = websocket.with_tls(netframe::net::tls::load_acceptor(tls)?);
    }

    // Join every new connection to its room
    spawn_room_keeper(tcp.events(), rooms.tcp.clone(), shutdown_tx.subscribe());
    spawn_room_keeper(udp.events(), rooms.udp.clone(), shutdown_tx.subscribe());
    spawn_room_keeper(
        websocket.events(),
        rooms.websocket.clone(),
        shutdown_tx.subscribe(),
    );

    let tcp_addr = tcp.start().await?;
    info!("TCP server listening on: {}", tcp_addr);
    let udp_addr = udp.start().await?;
    info!("UDP server listening on: {}", udp_addr);
    let ws_addr = websocket.start().await?;
    info!(
        secure = websocket.is_secure(),
        "WebSocket server listening on: {}", ws_addr
    );

    info!("Server startup complete!");

    // Wait for shutdown signal
    wait_for_shutdown(shutdown_tx.clone()).await;

    info!("Shutting down server...");
    for result in [
        tcp.stop(DisconnectReason::ServerStopped),
        udp.stop(DisconnectReason::ServerStopped),
        websocket.stop(DisconnectReason::ServerStopped),
    ] {
        if let Err(e) = result {
            error!("Failed to stop server: {}", e);
        }
    }

    info!("Server shutdown complete. Goodbye!");
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,netframe=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();
}

/// Register the chat message and one relay handler per transport
fn build_registry(rooms: &Rooms) -> Result<Registry> {
    let mut registry = Registry::new();
    registry.register_message::<ChatMessage>()?;

    let room = rooms.tcp.clone();
    registry.register_handler::<ChatMessage, TcpConnection, _>(move |message, connection| {
        relay(&room, message, connection.id())
    })?;

    let room = rooms.udp.clone();
    registry.register_handler::<ChatMessage, UdpConnection, _>(move |message, connection| {
        relay(&room, message, connection.id())
    })?;

    let room = rooms.websocket.clone();
    registry.register_handler::<ChatMessage, WebSocketConnection, _>(
        move |message, connection| relay(&room, message, connection.id()),
    )?;

    Ok(registry)
}

fn relay<E: Entity>(
    room: &ConnectionGroup<E>,
    message: &ChatMessage,
    connection_id: u64,
) -> anyhow::Result<()> {
    let sent = room.broadcast_message(message)?;
    debug!(
        connection_id,
        sender = %message.sender,
        recipients = sent,
        "Relayed chat message"
    );
    Ok(())
}

/// Add accepted connections to `room` until shutdown
fn spawn_room_keeper<C: ServerConnection>(
    mut events: broadcast::Receiver<ServerEvent<C>>,
    room: Arc<ConnectionGroup<C>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(ServerEvent::ConnectionAdded(connection)) => {
                        room.add(connection);
                    }
                    Ok(ServerEvent::ConnectionRemoved { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        error!(room = room.name(), skipped, "Room keeper fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown_rx.recv() => break,
            }
        }
        room.clear();
    });
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    let _ = shutdown_tx.send(());
}
