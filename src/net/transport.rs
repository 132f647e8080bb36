//! Transport drivers
//!
//! Reader and writer tasks that move bytes between a socket and an entity.
//! Every transport follows the same shape: the reader appends to the
//! entity's receive buffer, the writer drains the outbound channel, and
//! both stop when the entity starts disconnecting.
//!
//! WebSocket text messages are accepted as well as binary ones; their UTF-8
//! bytes go through the frame parser unchanged. Outbound frames are always
//! sent as binary messages.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, trace, warn};

use super::entity::{receive, Entity};
use super::state::DisconnectReason;

/// Outbound frames waiting for the writer task
pub(crate) type Outbound = mpsc::UnboundedReceiver<Bytes>;

/// Resolve once the shutdown flag is set or its sender is gone
pub(crate) async fn cancelled(signal: &mut watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            return;
        }
    }
}

/// Drive a byte stream (plain TCP, or TLS over TCP)
pub(crate) fn spawn_stream<E, S>(entity: &Arc<E>, stream: S, outbound: Outbound)
where
    E: Entity,
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    tokio::spawn(stream_write_loop(entity.clone(), writer, outbound));
    tokio::spawn(stream_read_loop(entity.clone(), reader));
}

async fn stream_read_loop<E, R>(entity: Arc<E>, mut reader: R)
where
    E: Entity,
    R: AsyncRead + Unpin,
{
    let mut shutdown = entity.core().shutdown_signal();
    let mut buf = vec![0u8; entity.core().engine().protocol().network_buffer_length()];

    loop {
        tokio::select! {
            _ = cancelled(&mut shutdown) => break,
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    debug!(receiver = %E::KIND, connection_id = entity.core().id(), "Peer closed stream");
                    entity.disconnect(DisconnectReason::ConnectionLost);
                    break;
                }
                Ok(n) => {
                    trace!(receiver = %E::KIND, bytes = n, "Received data");
                    receive(&entity, &buf[..n]);
                }
                Err(e) => {
                    debug!(receiver = %E::KIND, connection_id = entity.core().id(), error = %e, "Read failed");
                    entity.disconnect(DisconnectReason::ConnectionLost);
                    break;
                }
            }
        }
    }
}

async fn stream_write_loop<E, W>(entity: Arc<E>, mut writer: W, mut outbound: Outbound)
where
    E: Entity,
    W: AsyncWrite + Unpin,
{
    let mut shutdown = entity.core().shutdown_signal();

    loop {
        tokio::select! {
            biased;
            data = outbound.recv() => match data {
                Some(data) => {
                    if let Err(e) = writer.write_all(&data).await {
                        warn!(receiver = %E::KIND, connection_id = entity.core().id(), error = %e, "Write failed");
                        entity.disconnect(DisconnectReason::InvalidMessageSent);
                        break;
                    }
                }
                None => break,
            },
            _ = cancelled(&mut shutdown) => break,
        }
    }

    let _ = writer.shutdown().await;
}

/// Drive an upgraded WebSocket stream
pub(crate) fn spawn_websocket<E, S>(entity: &Arc<E>, stream: S, outbound: Outbound)
where
    E: Entity,
    S: Stream<Item = Result<WsMessage, WsError>>
        + Sink<WsMessage, Error = WsError>
        + Send
        + 'static,
{
    let (sink, stream) = stream.split();
    tokio::spawn(websocket_write_loop(entity.clone(), sink, outbound));
    tokio::spawn(websocket_read_loop(entity.clone(), stream));
}

async fn websocket_read_loop<E, S>(entity: Arc<E>, mut stream: S)
where
    E: Entity,
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let mut shutdown = entity.core().shutdown_signal();

    loop {
        tokio::select! {
            _ = cancelled(&mut shutdown) => break,
            next = stream.next() => match next {
                Some(Ok(WsMessage::Binary(data))) => {
                    trace!(receiver = %E::KIND, len = data.len(), "Received binary WebSocket message");
                    receive(&entity, &data);
                }
                Some(Ok(WsMessage::Text(text))) => {
                    trace!(receiver = %E::KIND, len = text.len(), "Received text WebSocket message");
                    receive(&entity, text.as_bytes());
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!(receiver = %E::KIND, connection_id = entity.core().id(), "WebSocket closed by peer");
                    entity.disconnect(DisconnectReason::ConnectionLost);
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite
                }
                Some(Err(e)) => {
                    debug!(receiver = %E::KIND, connection_id = entity.core().id(), error = %e, "WebSocket read failed");
                    entity.disconnect(DisconnectReason::ConnectionLost);
                    break;
                }
            }
        }
    }
}

async fn websocket_write_loop<E, S>(entity: Arc<E>, mut sink: S, mut outbound: Outbound)
where
    E: Entity,
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let mut shutdown = entity.core().shutdown_signal();

    loop {
        tokio::select! {
            biased;
            data = outbound.recv() => match data {
                Some(data) => {
                    if let Err(e) = sink.send(WsMessage::Binary(data.to_vec())).await {
                        warn!(receiver = %E::KIND, connection_id = entity.core().id(), error = %e, "WebSocket write failed");
                        entity.disconnect(DisconnectReason::InvalidMessageSent);
                        break;
                    }
                }
                None => break,
            },
            _ = cancelled(&mut shutdown) => break,
        }
    }

    let _ = sink.close().await;
}

/// Drain an entity's outbound frames onto a shared UDP socket.
///
/// `target` is `None` for a connected (client) socket.
pub(crate) fn spawn_datagram_writer<E: Entity>(
    entity: &Arc<E>,
    socket: Arc<UdpSocket>,
    target: Option<SocketAddr>,
    mut outbound: Outbound,
) {
    let entity = entity.clone();
    tokio::spawn(async move {
        let mut shutdown = entity.core().shutdown_signal();
        loop {
            tokio::select! {
                biased;
                data = outbound.recv() => match data {
                    Some(data) => {
                        let result = match target {
                            Some(address) => socket.send_to(&data, address).await,
                            None => socket.send(&data).await,
                        };
                        if let Err(e) = result {
                            warn!(receiver = %E::KIND, connection_id = entity.core().id(), error = %e, "Datagram send failed");
                            entity.disconnect(DisconnectReason::InvalidMessageSent);
                            break;
                        }
                    }
                    None => break,
                },
                _ = cancelled(&mut shutdown) => break,
            }
        }
    });
}
