//! Connection registry — address-keyed cache of live peer connections,
//! deduplicated by host and shared across tasks.
//!
//! Per-connection reader tasks insert and remove entries while the event
//! loop looks peers up, so the table is a DashMap behind a narrow API. The
//! raw map is never exposed.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use meridian_core::{Event, NodeId};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;

use crate::transport::{self, Inbound};

/// The sending half of a live peer connection plus what we know about the
/// peer so far. Cheap to clone; the queue is drained by the connection's
/// writer task.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    /// Remote address of the underlying connection.
    pub addr: SocketAddr,
    /// The peer's overlay identifier, once learned.
    pub id: Option<NodeId>,
    tx: mpsc::UnboundedSender<Event>,
}

impl PeerHandle {
    pub(crate) fn new(addr: SocketAddr, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { addr, id: None, tx }
    }

    /// Queue an event for delivery. Returns false when the connection is
    /// already closed.
    pub fn send(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: SocketAddr },
}

/// Cache of active peer connections, keyed by the host portion of the
/// remote address. Two addresses on the same host share one connection
/// regardless of port.
#[derive(Clone)]
pub struct ConnectionRegistry {
    handles: Arc<DashMap<IpAddr, PeerHandle>>,
    /// Local address outbound connections bind as their source, so the
    /// host other nodes key this node's connections under is stable.
    local_ip: IpAddr,
    events_tx: mpsc::UnboundedSender<Inbound>,
    connect_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(
        local_ip: IpAddr,
        events_tx: mpsc::UnboundedSender<Inbound>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            handles: Arc::new(DashMap::new()),
            local_ip,
            events_tx,
            connect_timeout,
        }
    }

    /// Return the cached handle for `addr`'s host, connecting first if none
    /// exists. Connection failures are errors for the caller to absorb —
    /// they never tear down the node.
    pub async fn get_or_create(&self, addr: SocketAddr) -> Result<PeerHandle, RegistryError> {
        if let Some(handle) = self.handles.get(&addr.ip()) {
            return Ok(handle.clone());
        }

        let stream = self.connect(addr).await?;
        transport::spawn_connection(stream, self.clone(), self.events_tx.clone())
            .map_err(|source| RegistryError::Connect { addr, source })
    }

    /// Insert (or replace) the entry for a newly accepted connection.
    pub fn register(&self, handle: PeerHandle) {
        self.handles.insert(handle.addr.ip(), handle);
    }

    /// Record a peer's overlay identifier once it is learned.
    pub fn note_identifier(&self, addr: SocketAddr, id: NodeId) {
        if let Some(mut entry) = self.handles.get_mut(&addr.ip()) {
            entry.id = Some(id);
        }
    }

    /// Drop the entry for a lost connection. Peer loss is only reported —
    /// no protocol action is taken.
    pub fn remove(&self, addr: SocketAddr) {
        if let Some((_, handle)) = self.handles.remove(&addr.ip()) {
            tracing::info!(peer = %addr, id = ?handle.id, "lost connection to peer");
        }
    }

    /// Drop every connection. Writer tasks see their queues close and shut
    /// the sockets down.
    pub fn clear(&self) {
        self.handles.clear();
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    async fn connect(&self, addr: SocketAddr) -> Result<TcpStream, RegistryError> {
        let map_err = |source| RegistryError::Connect { addr, source };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(map_err)?;

        if self.local_ip.is_ipv4() == addr.is_ipv4() && !self.local_ip.is_unspecified() {
            socket
                .bind(SocketAddr::new(self.local_ip, 0))
                .map_err(map_err)?;
        }

        match tokio::time::timeout(self.connect_timeout, socket.connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(RegistryError::Connect { addr, source }),
            Err(_) => Err(RegistryError::ConnectTimeout { addr }),
        }
    }
}
