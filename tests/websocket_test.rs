//! Integration tests for the WebSocket transport
//!
//! These tests verify:
//! - Message echo over binary WebSocket frames
//! - Text frames are parsed as frame bytes
//! - Failed upgrade handshakes disconnect with InvalidDataReceived
//! - Failed TLS handshakes disconnect with SslAuthenticationFailed
//! - Server-side tracking of upgraded connections

mod common;

use std::path::PathBuf;

use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use common::{localhost, recv, wait_for_state, wait_until, Echo};
use netframe::config::TlsConfig;
use netframe::net::tls::load_acceptor;
use netframe::net::{
    ServerConnection, ServerEvent, WebSocketClient, WebSocketConnection, WebSocketServer,
};
use netframe::{
    DefaultProtocol, DisconnectReason, Engine, Entity, EntityState, Protocol, Registry,
};

fn echo_server() -> WebSocketServer {
    let mut registry = Registry::new();
    registry.register_message::<Echo>().unwrap();
    registry
        .register_handler::<Echo, WebSocketConnection, _>(|message, connection| {
            connection.send(message)?;
            Ok(())
        })
        .unwrap();
    WebSocketServer::new(Engine::new(registry, DefaultProtocol::new()), localhost())
}

fn client_engine() -> (Engine, mpsc::UnboundedReceiver<Echo>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut registry = Registry::new();
    registry.register_message::<Echo>().unwrap();
    registry
        .register_handler::<Echo, WebSocketClient, _>(move |message, _client| {
            tx.send(message.clone())?;
            Ok(())
        })
        .unwrap();
    (Engine::new(registry, DefaultProtocol::new()), rx)
}

async fn next_connection(
    events: &mut broadcast::Receiver<ServerEvent<WebSocketConnection>>,
) -> std::sync::Arc<WebSocketConnection> {
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

/// Test that a client message is echoed back through binary frames
#[tokio::test]
async fn test_echo_round_trip() {
    let server = echo_server();
    assert!(!server.is_secure());
    let mut events = server.events();
    let addr = server.start().await.unwrap();

    let (engine, mut received) = client_engine();
    let client = WebSocketClient::new(engine, format!("ws://{}", addr));
    client.connect().await.unwrap();
    assert_eq!(client.state(), EntityState::Connected);
    assert_eq!(client.remote_address(), Some(addr));

    let connection = next_connection(&mut events).await;
    wait_for_state(&connection, EntityState::Connected).await;
    assert_eq!(connection.id(), 1);

    client.send(&Echo::new(1, "over websocket")).unwrap();
    client.send(&Echo::new(2, "again")).unwrap();
    assert_eq!(recv(&mut received).await, Echo::new(1, "over websocket"));
    assert_eq!(recv(&mut received).await, Echo::new(2, "again"));

    client.disconnect(DisconnectReason::Requested);
    wait_for_state(&connection, EntityState::Disconnected).await;
    assert_eq!(
        connection.disconnect_reason(),
        Some(DisconnectReason::ConnectionLost)
    );
    wait_until("connection removal", || server.connection_count() == 0).await;

    server.stop(DisconnectReason::ServerStopped).unwrap();
}

/// Test that a peer speaking something other than HTTP fails the upgrade
#[tokio::test]
async fn test_garbage_handshake_disconnects() {
    let server = echo_server();
    let mut events = server.events();
    let addr = server.start().await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"hello\r\n\r\n").await.unwrap();

    let connection = next_connection(&mut events).await;
    wait_for_state(&connection, EntityState::Disconnected).await;
    assert_eq!(
        connection.disconnect_reason(),
        Some(DisconnectReason::InvalidDataReceived)
    );
    wait_until("connection removal", || server.connection_count() == 0).await;

    server.stop(DisconnectReason::ServerStopped).unwrap();
}

/// Test that a text message carrying frame bytes is handled like a binary one
#[tokio::test]
async fn test_text_frames_are_parsed() {
    let server = echo_server();
    let addr = server.start().await.unwrap();

    let (mut socket, _response) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .unwrap();

    let frame = DefaultProtocol::new()
        .serialize(&Echo::new(1, "hi"))
        .unwrap();
    let text = String::from_utf8(frame.to_vec()).unwrap();
    socket.send(WsMessage::Text(text)).await.unwrap();

    // The echo comes back as a binary message
    let reply = tokio::time::timeout(common::TIMEOUT, socket.next())
        .await
        .expect("timed out waiting for echo")
        .expect("socket closed")
        .unwrap();
    assert_eq!(reply, WsMessage::Binary(frame.to_vec()));

    server.stop(DisconnectReason::ServerStopped).unwrap();
}

/// Test that a plain TCP peer on a TLS server fails the TLS handshake
#[tokio::test]
async fn test_plain_peer_fails_tls_handshake() {
    let acceptor = load_acceptor(&TlsConfig {
        certificate_path: PathBuf::from(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/data/identity.p12"
        )),
        certificate_password: "netframe".into(),
    })
    .unwrap();
    let server = echo_server().with_tls(acceptor);
    assert!(server.is_secure());
    let mut events = server.events();
    let addr = server.start().await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let connection = next_connection(&mut events).await;
    wait_for_state(&connection, EntityState::Disconnected).await;
    assert_eq!(
        connection.disconnect_reason(),
        Some(DisconnectReason::SslAuthenticationFailed)
    );
    wait_until("connection removal", || server.connection_count() == 0).await;

    drop(stream);
    server.stop(DisconnectReason::ServerStopped).unwrap();
}

/// Test that a connect to a closed port fails and leaves the client reusable
#[tokio::test]
async fn test_connect_failure_resets_state() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (engine, _rx) = client_engine();
    let client = WebSocketClient::new(engine, format!("ws://{}", addr));
    assert!(client.connect().await.is_err());
    assert_eq!(client.state(), EntityState::Uninitialized);
}
