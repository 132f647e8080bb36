//! Integration tests for connection groups over live TCP connections

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use common::{localhost, recv, wait_until, Echo};
use netframe::net::{
    ConnectionGroup, ServerConnection, ServerEvent, TcpClient, TcpConnection, TcpServer,
};
use netframe::{DefaultProtocol, DisconnectReason, Engine, Entity, EntityState, Registry};

/// Client engine with its own registry, so every client reports separately
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

/// Test that a broadcast reaches current members only
#[tokio::test]
async fn test_broadcast_excludes_removed_members() {
    let mut registry = Registry::new();
    registry.register_message::<Echo>().unwrap();
    let server = TcpServer::new(Engine::new(registry, DefaultProtocol::new()), localhost());
    let mut events = server.events();
    let addr = server.start().await.unwrap();

    let mut clients = Vec::new();
    let mut inboxes = Vec::new();
    for _ in 0..3 {
        let (engine, rx) = client_engine();
        let client = TcpClient::new(engine, addr);
        client.connect().await.unwrap();
        clients.push(client);
        inboxes.push(rx);
    }

    let group: ConnectionGroup<TcpConnection> = ConnectionGroup::new("lobby");
    let mut members: Vec<Arc<TcpConnection>> = Vec::new();
    while members.len() < 3 {
        if let Ok(Ok(ServerEvent::ConnectionAdded(connection))) =
            tokio::time::timeout(common::TIMEOUT, events.recv()).await
        {
            assert!(group.add(connection.clone()));
            members.push(connection);
        }
    }
    assert_eq!(group.len(), 3);

    // Connections arrive in accept order, matching client order
    let ids: Vec<u64> = members.iter().map(|member| member.id()).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    assert!(group.remove(&members[1]));
    let sent = group.broadcast_message(&Echo::new(1, "to the room")).unwrap();
    assert_eq!(sent, 2);

    assert_eq!(recv(&mut inboxes[0]).await, Echo::new(1, "to the room"));
    assert_eq!(recv(&mut inboxes[2]).await, Echo::new(1, "to the room"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(inboxes[1].try_recv().is_err());

    // A disconnected member is pruned on the next broadcast
    clients[2].disconnect(DisconnectReason::Requested);
    wait_until("server side close", || {
        members[2].state() == EntityState::Disconnected
    })
    .await;
    assert_eq!(group.broadcast_message(&Echo::new(2, "fewer")).unwrap(), 1);
    assert_eq!(recv(&mut inboxes[0]).await, Echo::new(2, "fewer"));
    assert!(!group.contains(&members[2]));

    server.stop(DisconnectReason::ServerStopped).unwrap();
}
