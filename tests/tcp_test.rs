//! Integration tests for TCP clients, connections and servers
//!
//! These tests run real loopback sockets and verify:
//! - Message echo through handlers on both ends
//! - Disconnect reasons for invalid data and spam
//! - Per-connection ordering on a shared queue
//! - Server and client misuse errors

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use common::{localhost, recv, wait_for_state, wait_until, Echo};
use netframe::error::NetworkError;
use netframe::net::{ServerConnection, ServerEvent, TcpClient, TcpConnection, TcpServer};
use netframe::{
    DefaultProtocol, DisconnectReason, Engine, Entity, EntityState, NetframeError, Protocol,
    Registry,
};

/// Server engine that echoes every [`Echo`] back to its sender
fn echo_server_engine(protocol: DefaultProtocol) -> Engine {
    let mut registry = Registry::new();
    registry.register_message::<Echo>().unwrap();
    registry
        .register_handler::<Echo, TcpConnection, _>(|message, connection| {
            connection.send(message)?;
            Ok(())
        })
        .unwrap();
    Engine::new(registry, protocol)
}

/// Client engine that forwards every received [`Echo`] to a channel
fn client_engine() -> (Engine, mpsc::UnboundedReceiver<Echo>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut registry = Registry::new();
    registry.register_message::<Echo>().unwrap();
    registry
        .register_handler::<Echo, TcpClient, _>(move |message, _client| {
            tx.send(message.clone())?;
            Ok(())
        })
        .unwrap();
    (Engine::new(registry, DefaultProtocol::new()), rx)
}

async fn next_connection(
    events: &mut tokio::sync::broadcast::Receiver<ServerEvent<TcpConnection>>,
) -> Arc<TcpConnection> {
    loop {
        let event = tokio::time::timeout(common::TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for connection")
            .expect("server events closed");
        if let ServerEvent::ConnectionAdded(connection) = event {
            return connection;
        }
    }
}

/// Test that a message sent by a client comes back through the server handler
#[tokio::test]
async fn test_echo_round_trip() {
    let server = TcpServer::new(echo_server_engine(DefaultProtocol::new()), localhost());
    let addr = server.start().await.unwrap();
    assert_ne!(addr.port(), 0);

    let (engine, mut received) = client_engine();
    let client = TcpClient::new(engine, addr);
    client.connect().await.unwrap();
    assert_eq!(client.state(), EntityState::Connected);

    client.send(&Echo::new(1, "hello")).unwrap();
    client.send(&Echo::new(2, "world")).unwrap();

    assert_eq!(recv(&mut received).await, Echo::new(1, "hello"));
    assert_eq!(recv(&mut received).await, Echo::new(2, "world"));

    server.stop(DisconnectReason::ServerStopped).unwrap();
}

/// Test that connection ids start at 1 and the registry tracks connections
#[tokio::test]
async fn test_connection_ids_and_tracking() {
    let server = TcpServer::new(echo_server_engine(DefaultProtocol::new()), localhost());
    let mut events = server.events();
    let addr = server.start().await.unwrap();

    let (engine, _rx) = client_engine();
    let first = TcpClient::new(engine.clone(), addr);
    first.connect().await.unwrap();
    let one = next_connection(&mut events).await;

    let second = TcpClient::new(engine, addr);
    second.connect().await.unwrap();
    let two = next_connection(&mut events).await;

    assert_eq!(one.id(), 1);
    assert_eq!(two.id(), 2);
    assert_eq!(server.connection_count(), 2);
    assert!(server.connection(1).is_some());

    first.disconnect(DisconnectReason::Requested);
    wait_for_state(&one, EntityState::Disconnected).await;
    assert_eq!(one.disconnect_reason(), Some(DisconnectReason::ConnectionLost));
    wait_until("connection removal", || server.connection_count() == 1).await;

    let remaining: Vec<u64> = server.connections().iter().map(|c| c.id()).collect();
    assert_eq!(remaining, vec![2]);

    server.stop(DisconnectReason::ServerStopped).unwrap();
}

/// Test that an unknown message id disconnects with InvalidDataReceived
#[tokio::test]
async fn test_unknown_id_disconnects() {
    let server = TcpServer::new(echo_server_engine(DefaultProtocol::new()), localhost());
    let mut events = server.events();
    let addr = server.start().await.unwrap();

    let (engine, _rx) = client_engine();
    let client = TcpClient::new(engine, addr);
    client.connect().await.unwrap();
    let connection = next_connection(&mut events).await;

    client
        .send_bytes(Bytes::from_static(&[0xE7, 0x03, 1, 0, 0, 0, 1]))
        .unwrap();

    wait_for_state(&connection, EntityState::Disconnected).await;
    assert_eq!(
        connection.disconnect_reason(),
        Some(DisconnectReason::InvalidDataReceived)
    );

    // The client sees the socket close
    wait_for_state(&client, EntityState::Disconnected).await;
    assert_eq!(
        client.disconnect_reason(),
        Some(DisconnectReason::ConnectionLost)
    );

    server.stop(DisconnectReason::ServerStopped).unwrap();
}

/// Test that exceeding the rate ceiling disconnects before the excess is handled
#[tokio::test]
async fn test_spam_disconnects_before_dispatch() {
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();

    let mut registry = Registry::new();
    registry.register_message::<Echo>().unwrap();
    registry
        .register_handler::<Echo, TcpConnection, _>(move |_message, _connection| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    let engine = Engine::new(
        registry,
        DefaultProtocol::new().with_max_messages_per_second(3),
    );

    let server = TcpServer::new(engine, localhost());
    let mut events = server.events();
    let addr = server.start().await.unwrap();

    let (engine, _rx) = client_engine();
    let client = TcpClient::new(engine, addr);
    client.connect().await.unwrap();
    let connection = next_connection(&mut events).await;

    let protocol = DefaultProtocol::new();
    let mut burst = BytesMut::new();
    for i in 0..10 {
        burst.extend_from_slice(&protocol.serialize(&Echo::new(i, "spam")).unwrap());
    }
    client.send_bytes(burst.freeze()).unwrap();

    wait_for_state(&connection, EntityState::Disconnected).await;
    assert_eq!(connection.disconnect_reason(), Some(DisconnectReason::Spam));
    assert_eq!(handled.load(Ordering::SeqCst), 3);

    server.stop(DisconnectReason::ServerStopped).unwrap();
}

/// Test that connections sharing a pooled queue keep their own order
#[tokio::test]
async fn test_pooled_ordering() {
    let seen: Arc<Mutex<Vec<(u64, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    let mut registry = Registry::new();
    registry.register_message::<Echo>().unwrap();
    registry
        .register_handler::<Echo, TcpConnection, _>(move |message, connection| {
            log.lock().push((connection.id(), message.sequence));
            Ok(())
        })
        .unwrap();
    let engine = Engine::new(registry, DefaultProtocol::new()).with_connections_per_queue(2);

    let server = TcpServer::new(engine, localhost());
    let mut events = server.events();
    let addr = server.start().await.unwrap();

    let (engine, _rx) = client_engine();
    let a = TcpClient::new(engine.clone(), addr);
    a.connect().await.unwrap();
    let conn_a = next_connection(&mut events).await;
    let b = TcpClient::new(engine, addr);
    b.connect().await.unwrap();
    let conn_b = next_connection(&mut events).await;

    for round in 0..50u32 {
        a.send(&Echo::new(round, "a")).unwrap();
        b.send(&Echo::new(round, "b")).unwrap();
    }

    wait_until("all messages handled", || seen.lock().len() == 100).await;

    let seen = seen.lock();
    for id in [conn_a.id(), conn_b.id()] {
        let order: Vec<u32> = seen
            .iter()
            .filter(|(conn, _)| *conn == id)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
    }
    drop(seen);

    server.stop(DisconnectReason::ServerStopped).unwrap();
}

/// Test that stopping the server disconnects every connection with the given reason
#[tokio::test]
async fn test_stop_disconnects_connections() {
    let server = TcpServer::new(echo_server_engine(DefaultProtocol::new()), localhost());
    let mut events = server.events();
    let addr = server.start().await.unwrap();

    let (engine, _rx) = client_engine();
    let client = TcpClient::new(engine, addr);
    client.connect().await.unwrap();
    let connection = next_connection(&mut events).await;

    server.stop(DisconnectReason::ServerStopped).unwrap();
    assert_eq!(connection.state(), EntityState::Disconnected);
    assert_eq!(
        connection.disconnect_reason(),
        Some(DisconnectReason::ServerStopped)
    );
    assert_eq!(server.connection_count(), 0);
    assert!(!server.is_running());

    wait_for_state(&client, EntityState::Disconnected).await;
}

/// Test that lifecycle misuse is reported without changing state
#[tokio::test]
async fn test_misuse_errors() {
    let server = TcpServer::new(echo_server_engine(DefaultProtocol::new()), localhost());
    assert!(matches!(
        server.stop(DisconnectReason::Requested),
        Err(NetframeError::Network(NetworkError::NotRunning))
    ));

    let addr = server.start().await.unwrap();
    assert!(matches!(
        server.start().await,
        Err(NetframeError::Network(NetworkError::AlreadyRunning))
    ));

    let (engine, _rx) = client_engine();
    let client = TcpClient::new(engine, addr);
    assert!(matches!(
        client.send(&Echo::new(0, "early")),
        Err(NetframeError::Network(NetworkError::NotConnected))
    ));

    client.connect().await.unwrap();
    assert!(matches!(
        client.connect().await,
        Err(NetframeError::Network(NetworkError::AlreadyConnected))
    ));
    assert_eq!(client.state(), EntityState::Connected);

    client.disconnect(DisconnectReason::Requested);
    assert!(matches!(
        client.connect().await,
        Err(NetframeError::Network(NetworkError::Terminated))
    ));
    assert_eq!(client.disconnect_reason(), Some(DisconnectReason::Requested));

    server.stop(DisconnectReason::ServerStopped).unwrap();
}

/// Test that a refused connect leaves the client reusable
#[tokio::test]
async fn test_connect_failure_resets_state() {
    // Bind then drop a listener to get a port nobody is listening on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (engine, _rx) = client_engine();
    let client = TcpClient::new(engine, addr);
    assert!(matches!(
        client.connect().await,
        Err(NetframeError::Network(NetworkError::ConnectFailed { .. }))
    ));
    assert_eq!(client.state(), EntityState::Uninitialized);
}
