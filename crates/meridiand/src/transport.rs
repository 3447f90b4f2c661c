//! Frame transport — per-connection reader and writer tasks.
//!
//! Each live connection gets a reader task (frames in, decoded events out
//! to the node's event channel) and a writer task (queued events out as
//! frames). The reader owns connection-loss cleanup: when it exits, the
//! registry entry goes away.

use std::net::SocketAddr;

use bytes::BytesMut;
use meridian_core::wire::{self, FRAME_HEADER, MAX_FRAME};
use meridian_core::Event;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::registry::{ConnectionRegistry, PeerHandle};

/// A decoded event plus the connection it arrived on.
#[derive(Debug)]
pub struct Inbound {
    pub from: SocketAddr,
    pub event: Event,
}

/// Wire up reader and writer tasks for a connection and register its handle.
/// Used for both inbound accepts and outbound connects.
pub fn spawn_connection(
    stream: TcpStream,
    registry: ConnectionRegistry,
    events_tx: mpsc::UnboundedSender<Inbound>,
) -> std::io::Result<PeerHandle> {
    let addr = stream.peer_addr()?;
    let (read_half, write_half) = stream.into_split();

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = PeerHandle::new(addr, tx);
    registry.register(handle.clone());
    tracing::debug!(peer = %addr, "connection established");

    tokio::spawn(writer_loop(write_half, rx, addr));
    tokio::spawn(async move {
        reader_loop(read_half, addr, events_tx).await;
        registry.remove(addr);
    });

    Ok(handle)
}

/// Read frames until the peer goes away, forwarding decoded events to the
/// node's event channel. Undecodable frames are logged and skipped; a
/// malformed length closes the connection.
async fn reader_loop(
    mut read: OwnedReadHalf,
    addr: SocketAddr,
    events_tx: mpsc::UnboundedSender<Inbound>,
) {
    let mut header = [0u8; FRAME_HEADER];
    loop {
        if let Err(e) = read.read_exact(&mut header).await {
            if e.kind() != std::io::ErrorKind::UnexpectedEof {
                tracing::debug!(peer = %addr, error = %e, "read failed");
            }
            break;
        }

        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME {
            tracing::warn!(peer = %addr, len, "oversized frame, closing connection");
            break;
        }

        let mut payload = BytesMut::zeroed(len);
        if read.read_exact(&mut payload[..]).await.is_err() {
            break;
        }

        match wire::decode(&payload) {
            Ok(event) => {
                if events_tx.send(Inbound { from: addr, event }).is_err() {
                    // Node is shutting down.
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "undecodable frame, ignoring");
            }
        }
    }
}

/// Drain the handle's queue onto the socket. Exits when the queue closes
/// (all handles dropped) or the peer stops accepting writes.
async fn writer_loop(
    mut write: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Event>,
    addr: SocketAddr,
) {
    while let Some(event) = rx.recv().await {
        let frame = match wire::encode(&event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "unencodable event, dropping");
                continue;
            }
        };
        if let Err(e) = write.write_all(&frame).await {
            tracing::debug!(peer = %addr, error = %e, "write failed, closing connection");
            break;
        }
    }
}
