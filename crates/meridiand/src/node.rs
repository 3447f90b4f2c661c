//! Peer node runtime — binds the listener, registers with discovery, and
//! drives every protocol event through one serialized loop.
//!
//! The loop task is the only place leaf-set and coordinator state mutates:
//! connection tasks just decode frames onto the event channel, so no
//! locking is needed around protocol state. Failing to bind the listener or
//! to reach the discovery service is fatal; everything after that degrades
//! to logged warnings.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use meridian_core::config::MeridianConfig;
use meridian_core::{Event, NodeId, PeerRef, RouteTrace};
use meridian_overlay::{AckOutcome, Directive, JoinCoordinator, LeafSet, RegistrationClient};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::registry::{ConnectionRegistry, PeerHandle};
use crate::transport::{self, Inbound};

/// Snapshot of the node for operators and tests. Published on the status
/// watch channel after every event that changes it.
#[derive(Debug, Clone, Default)]
pub struct NodeStatus {
    pub id: Option<NodeId>,
    pub low: Option<PeerRef>,
    pub high: Option<PeerRef>,
    /// Route trace of the most recently completed join.
    pub last_route: Option<RouteTrace>,
}

/// A running node. Dropping the handle does not stop the node; call
/// [`shutdown`](Self::shutdown) or await [`wait`](Self::wait).
pub struct NodeHandle {
    pub listen_addr: SocketAddr,
    pub status: watch::Receiver<NodeStatus>,
    event_task: JoinHandle<Result<()>>,
    accept_task: JoinHandle<()>,
    registry: ConnectionRegistry,
}

impl NodeHandle {
    /// Stop the node and close its connections.
    pub fn shutdown(&self) {
        self.accept_task.abort();
        self.event_task.abort();
        // Dropping the handles closes the writer queues, which closes the
        // sockets, which lets peers observe the disconnect.
        self.registry.clear();
    }

    /// Wait for the event loop to finish. It only finishes on a fatal
    /// registration error or when the node is shut down.
    pub async fn wait(self) -> Result<()> {
        match self.event_task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(e).context("node event loop panicked"),
        }
    }
}

/// Start a node: bind the peer listener, contact discovery, send the first
/// registration, and spawn the accept and event-loop tasks.
pub async fn spawn(config: MeridianConfig, discovery_host: &str) -> Result<NodeHandle> {
    let listener = TcpListener::bind(config.network.listen_addr)
        .await
        .with_context(|| {
            format!(
                "failed to bind peer listener on {}",
                config.network.listen_addr
            )
        })?;
    let listen_addr = listener
        .local_addr()
        .context("peer listener has no local address")?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let registry = ConnectionRegistry::new(
        listen_addr.ip(),
        events_tx.clone(),
        Duration::from_millis(config.network.connect_timeout_ms),
    );

    let discovery_addr = resolve_discovery(discovery_host, config.network.discovery_port).await?;
    let discovery = registry
        .get_or_create(discovery_addr)
        .await
        .with_context(|| format!("failed to reach discovery service at {discovery_addr}"))?;

    let fixed = config
        .registration
        .fixed_identifier()
        .context("invalid configured identifier")?;
    let registration = RegistrationClient::new(
        listen_addr,
        fixed,
        config.registration.max_attempts,
        Duration::from_millis(config.registration.backoff_ms),
    );
    anyhow::ensure!(
        discovery.send(registration.request()),
        "discovery connection closed before registration"
    );

    let accept_task = tokio::spawn(accept_loop(listener, registry.clone(), events_tx));

    let (status_tx, status_rx) = watch::channel(NodeStatus::default());
    let event_task = tokio::spawn(event_loop(
        events_rx,
        registry.clone(),
        registration,
        discovery,
        status_tx,
        listen_addr,
    ));

    Ok(NodeHandle {
        listen_addr,
        status: status_rx,
        event_task,
        accept_task,
        registry,
    })
}

async fn resolve_discovery(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve discovery host {host}"))?
        .next()
        .with_context(|| format!("discovery host {host} resolved to no addresses"))
}

/// Accept inbound peer connections forever.
async fn accept_loop(
    listener: TcpListener,
    registry: ConnectionRegistry,
    events_tx: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!(peer = %peer, "inbound connection");
                if let Err(e) =
                    transport::spawn_connection(stream, registry.clone(), events_tx.clone())
                {
                    tracing::warn!(peer = %peer, error = %e, "failed to adopt inbound connection");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }
}

/// The serialized consumer of every inbound event.
async fn event_loop(
    mut events_rx: mpsc::UnboundedReceiver<Inbound>,
    registry: ConnectionRegistry,
    mut registration: RegistrationClient,
    discovery: PeerHandle,
    status_tx: watch::Sender<NodeStatus>,
    listen_addr: SocketAddr,
) -> Result<()> {
    let mut coordinator: Option<JoinCoordinator> = None;

    while let Some(Inbound { from, event }) = events_rx.recv().await {
        match event {
            Event::RegisterAck {
                success,
                id,
                bootstrap,
            } => match registration.on_ack(success, id, bootstrap) {
                Ok(AckOutcome::Registered { id, bootstrap }) => {
                    let coordinator = coordinator.insert(JoinCoordinator::new(PeerRef {
                        id,
                        addr: listen_addr,
                    }));
                    publish(&status_tx, Some(id), coordinator.leaves(), None);
                    if let Some(directive) = coordinator.initiate_join(bootstrap) {
                        deliver(&registry, directive).await;
                    }
                }
                Ok(AckOutcome::Retry { request, delay }) => {
                    let discovery = discovery.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if !discovery.send(request) {
                            tracing::warn!("discovery connection closed before retry");
                        }
                    });
                }
                Err(e) => {
                    return Err(e).context("registration with discovery failed");
                }
            },

            Event::JoinRequest {
                origin,
                target,
                trace,
            } => {
                registry.note_identifier(origin, target);
                match coordinator.as_mut() {
                    Some(coordinator) => {
                        let directive = coordinator.on_join_request(origin, target, trace);
                        // Terminating refreshes the responder's own leaves.
                        publish(
                            &status_tx,
                            Some(coordinator.local().id),
                            coordinator.leaves(),
                            None,
                        );
                        if let Some(directive) = directive {
                            deliver(&registry, directive).await;
                        }
                    }
                    None => {
                        tracing::warn!(peer = %from, "join request before registration completed, ignoring");
                    }
                }
            }

            Event::JoinResponse {
                responder,
                low,
                high,
                trace,
            } => match coordinator.as_mut() {
                Some(coordinator) => {
                    coordinator.on_join_response(responder, low, high, &trace);
                    // Installed leaves must stay reachable through the
                    // registry, so connect to any we do not hold yet.
                    for leaf in coordinator.leaves().members() {
                        match registry.get_or_create(leaf.addr).await {
                            Ok(_) => registry.note_identifier(leaf.addr, leaf.id),
                            Err(e) => {
                                tracing::warn!(leaf = %leaf.id, error = %e, "leaf unreachable");
                            }
                        }
                    }
                    publish(
                        &status_tx,
                        Some(coordinator.local().id),
                        coordinator.leaves(),
                        Some(trace),
                    );
                }
                None => {
                    tracing::warn!(peer = %from, "join response before registration completed, ignoring");
                }
            },

            Event::Register { .. } => {
                tracing::warn!(peer = %from, "unexpected event type, ignoring");
            }
        }
    }

    Ok(())
}

/// Resolve the directive's destination through the registry and queue the
/// event. Unreachable peers cost the protocol step, never the node.
async fn deliver(registry: &ConnectionRegistry, directive: Directive) {
    match registry.get_or_create(directive.to).await {
        Ok(handle) => {
            if !handle.send(directive.event) {
                tracing::warn!(peer = %directive.to, "peer connection closed before send");
            }
        }
        Err(e) => {
            tracing::warn!(peer = %directive.to, error = %e, "peer unreachable, dropping protocol step");
        }
    }
}

fn publish(
    status_tx: &watch::Sender<NodeStatus>,
    id: Option<NodeId>,
    leaves: &LeafSet,
    last_route: Option<RouteTrace>,
) {
    status_tx.send_modify(|status| {
        status.id = id;
        status.low = leaves.low().copied();
        status.high = leaves.high().copied();
        if last_route.is_some() {
            status.last_route = last_route;
        }
    });
}
