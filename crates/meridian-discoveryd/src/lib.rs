//! meridian-discoveryd — the discovery service.
//!
//! Grants unique identifiers and names an existing member as the bootstrap
//! peer for each new node. Membership is tied to the registrant's
//! connection: an identifier is held for as long as the connection that
//! claimed it stays open, and released the moment it closes. Nothing is
//! persisted.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use meridian_core::wire::{self, FRAME_HEADER, MAX_FRAME};
use meridian_core::{Event, NodeId};
use rand::seq::SliceRandom;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Identifier → listen address of every live member.
type MemberTable = Arc<DashMap<NodeId, SocketAddr>>;

/// A running discovery service.
pub struct DiscoveryHandle {
    pub listen_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl DiscoveryHandle {
    pub fn shutdown(&self) {
        self.accept_task.abort();
    }

    pub async fn wait(self) -> Result<()> {
        match self.accept_task.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(e).context("discovery accept loop panicked"),
        }
    }
}

/// Bind the discovery listener and start serving. Failing to bind is fatal.
pub async fn spawn(listen_addr: SocketAddr) -> Result<DiscoveryHandle> {
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind discovery listener on {listen_addr}"))?;
    let listen_addr = listener
        .local_addr()
        .context("discovery listener has no local address")?;

    let members: MemberTable = Arc::new(DashMap::new());
    let accept_task = tokio::spawn(accept_loop(listener, members));

    Ok(DiscoveryHandle {
        listen_addr,
        accept_task,
    })
}

async fn accept_loop(listener: TcpListener, members: MemberTable) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!(peer = %peer, "node connected");
                tokio::spawn(serve_node(stream, members.clone()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }
}

/// Serve one node's connection: answer Register events until it goes away,
/// then release whatever identifier it held.
async fn serve_node(mut stream: TcpStream, members: MemberTable) {
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(_) => return,
    };
    let mut granted: Option<NodeId> = None;
    let (mut read, mut write) = stream.split();

    let mut header = [0u8; FRAME_HEADER];
    loop {
        if read.read_exact(&mut header).await.is_err() {
            break;
        }
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME {
            tracing::warn!(peer = %peer, len, "oversized frame, closing connection");
            break;
        }
        let mut payload = vec![0u8; len];
        if read.read_exact(&mut payload).await.is_err() {
            break;
        }

        let event = match wire::decode(&payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "undecodable frame, ignoring");
                continue;
            }
        };

        match event {
            Event::Register { listen_addr, id } => {
                let ack = register(&members, &mut granted, id, listen_addr);
                let frame = match wire::encode(&ack) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode ack");
                        continue;
                    }
                };
                if write.write_all(&frame).await.is_err() {
                    break;
                }
            }
            other => {
                tracing::warn!(peer = %peer, event = ?other, "unexpected event type, ignoring");
            }
        }
    }

    if let Some(id) = granted.take() {
        members.remove(&id);
        tracing::info!(id = %id, peer = %peer, "member departed, identifier released");
    }
}

/// Decide a registration: refuse identifiers held by live members, grant
/// everything else and name a uniformly random existing member as the
/// bootstrap peer.
fn register(
    members: &MemberTable,
    granted: &mut Option<NodeId>,
    id: NodeId,
    listen_addr: SocketAddr,
) -> Event {
    // Snapshot candidates before touching the entry: the registrant is not
    // in the table yet, so every candidate is an existing member.
    let candidates: Vec<SocketAddr> = members.iter().map(|entry| *entry.value()).collect();

    match members.entry(id) {
        dashmap::mapref::entry::Entry::Occupied(_) => {
            tracing::warn!(id = %id, "identifier already claimed, refusing");
            Event::RegisterAck {
                success: false,
                id,
                bootstrap: None,
            }
        }
        dashmap::mapref::entry::Entry::Vacant(slot) => {
            let bootstrap = candidates.choose(&mut rand::thread_rng()).copied();
            slot.insert(listen_addr);
            if let Some(previous) = granted.replace(id) {
                members.remove(&previous);
            }
            tracing::info!(
                id = %id,
                addr = %listen_addr,
                bootstrap = ?bootstrap,
                members = members.len(),
                "member registered"
            );
            Event::RegisterAck {
                success: true,
                id,
                bootstrap,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn first_member_gets_no_bootstrap() {
        let members: MemberTable = Arc::new(DashMap::new());
        let mut granted = None;

        let ack = register(&members, &mut granted, NodeId(0x00aa), addr(18081));
        assert_eq!(
            ack,
            Event::RegisterAck {
                success: true,
                id: NodeId(0x00aa),
                bootstrap: None,
            }
        );
        assert_eq!(granted, Some(NodeId(0x00aa)));
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn later_members_are_pointed_at_an_existing_one() {
        let members: MemberTable = Arc::new(DashMap::new());
        members.insert(NodeId(0x00aa), addr(1000));

        let mut granted = None;
        let ack = register(&members, &mut granted, NodeId(0x00bb), addr(2000));
        match ack {
            Event::RegisterAck {
                success: true,
                bootstrap: Some(bootstrap),
                ..
            } => assert_eq!(bootstrap, addr(1000)),
            other => panic!("expected success with bootstrap, got {other:?}"),
        }
    }

    #[test]
    fn live_identifier_is_refused() {
        let members: MemberTable = Arc::new(DashMap::new());
        members.insert(NodeId(0x00aa), addr(1000));

        let mut granted = None;
        let ack = register(&members, &mut granted, NodeId(0x00aa), addr(2000));
        assert_eq!(
            ack,
            Event::RegisterAck {
                success: false,
                id: NodeId(0x00aa),
                bootstrap: None,
            }
        );
        assert_eq!(granted, None);
        // The original holder keeps the identifier.
        assert_eq!(*members.get(&NodeId(0x00aa)).unwrap(), addr(1000));
    }

    #[test]
    fn regrant_on_one_connection_releases_the_old_identifier() {
        let members: MemberTable = Arc::new(DashMap::new());
        let mut granted = None;

        register(&members, &mut granted, NodeId(0x00aa), addr(1000));
        register(&members, &mut granted, NodeId(0x00bb), addr(1000));

        assert_eq!(granted, Some(NodeId(0x00bb)));
        assert!(members.get(&NodeId(0x00aa)).is_none());
        assert!(members.get(&NodeId(0x00bb)).is_some());
    }
}
