//! Swarm orchestration with tokio mpsc command/event channels.
//!
//! The swarm event loop runs in a dedicated tokio task. The engine only
//! ever sees the [`TransportCommand`] sender and the [`TransportEvent`]
//! receiver, which keeps the networking layer swappable — integration
//! tests speak the same channel protocol through [`crate::MemoryBus`].

use std::collections::HashSet;
use std::time::Duration;

use futures::StreamExt;
use libp2p::{
    gossipsub, identify, kad,
    multiaddr::Protocol,
    swarm::SwarmEvent,
    Multiaddr, PeerId,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use murmure_shared::constants::DEFAULT_QUIC_PORT;

use crate::behaviour::MurmureEvent;
use crate::discovery::bootstrap_peers;
use crate::peers::PeerTracker;
use crate::transport::build_swarm;

/// Wait before the single retry of a failed topic subscription.
const SUBSCRIBE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Commands sent *into* the transport task.
#[derive(Debug)]
pub enum TransportCommand {
    /// Publish an opaque payload on a content topic.
    Publish { topic: String, data: Vec<u8> },
    /// Subscribe to a content topic. Redundant subscriptions are no-ops.
    Subscribe(String),
    /// Unsubscribe from a content topic.
    Unsubscribe(String),
    /// Dial a remote peer at the given multiaddr.
    Dial(Multiaddr),
    /// Gracefully shut down the transport.
    Shutdown,
}

/// Events sent *from* the transport task to the engine.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A payload arrived on a subscribed content topic.
    Message { topic: String, data: Vec<u8> },
    /// A new peer connected.
    PeerConnected { peer_id: PeerId },
    /// A peer disconnected.
    PeerDisconnected { peer_id: PeerId },
}

/// Configuration for spawning the transport.
pub struct TransportConfig {
    /// QUIC listen port (defaults to `DEFAULT_QUIC_PORT`).
    pub listen_port: u16,
    /// Additional multiaddrs to dial on startup, on top of the bootstrap
    /// list resolved from the environment.
    pub extra_dials: Vec<Multiaddr>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_QUIC_PORT,
            extra_dials: Vec::new(),
        }
    }
}

/// Spawn the libp2p swarm in a background tokio task.
///
/// Returns the command sender, the event receiver and the local `PeerId`.
pub async fn spawn_swarm(
    keypair: libp2p::identity::Keypair,
    config: TransportConfig,
) -> anyhow::Result<(
    mpsc::Sender<TransportCommand>,
    mpsc::Receiver<TransportEvent>,
    PeerId,
)> {
    let mut swarm = build_swarm(keypair)?;
    let local_peer_id = *swarm.local_peer_id();

    let listen_addr_v4: Multiaddr = format!("/ip4/0.0.0.0/udp/{}/quic-v1", config.listen_port)
        .parse()
        .expect("valid multiaddr");
    let listen_addr_v6: Multiaddr = format!("/ip6/::/udp/{}/quic-v1", config.listen_port)
        .parse()
        .expect("valid multiaddr");

    swarm.listen_on(listen_addr_v4)?;
    swarm.listen_on(listen_addr_v6)?;

    info!(peer_id = %local_peer_id, port = config.listen_port, "Swarm listening");

    let bootstrap_addrs = bootstrap_peers();
    for addr in bootstrap_addrs.iter().chain(config.extra_dials.iter()) {
        if let Err(e) = swarm.dial(addr.clone()) {
            warn!(addr = %addr, error = %e, "Failed to dial bootstrap peer");
            continue;
        }
        if let Some(peer_id) = extract_peer_id(addr) {
            swarm
                .behaviour_mut()
                .kademlia
                .add_address(&peer_id, addr.clone());
        }
        debug!(addr = %addr, "Dialing bootstrap peer");
    }
    if !bootstrap_addrs.is_empty() {
        if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
            warn!(error = %e, "Kademlia bootstrap failed to start");
        }
    }

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<TransportCommand>(256);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(256);

    let retry_tx = cmd_tx.clone();
    tokio::spawn(async move {
        let mut peer_tracker = PeerTracker::new();
        // Process-wide subscription state: a topic is subscribed at most
        // once, and a failed subscribe is retried exactly once.
        let mut subscribed: HashSet<String> = HashSet::new();
        let mut retried: HashSet<String> = HashSet::new();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(TransportCommand::Publish { topic, data }) => {
                            let gossipsub_topic = gossipsub::IdentTopic::new(&topic);
                            if let Err(e) = swarm
                                .behaviour_mut()
                                .gossipsub
                                .publish(gossipsub_topic, data)
                            {
                                error!(topic = %topic, error = %e, "Publish failed");
                            }
                        }
                        Some(TransportCommand::Subscribe(topic)) => {
                            if subscribed.contains(&topic) {
                                debug!(topic = %topic, "Already subscribed, ignoring");
                                continue;
                            }
                            let gossipsub_topic = gossipsub::IdentTopic::new(&topic);
                            match swarm.behaviour_mut().gossipsub.subscribe(&gossipsub_topic) {
                                Ok(_) => {
                                    subscribed.insert(topic);
                                }
                                Err(e) => {
                                    error!(topic = %topic, error = %e, "Subscribe failed");
                                    if retried.insert(topic.clone()) {
                                        let tx = retry_tx.clone();
                                        tokio::spawn(async move {
                                            tokio::time::sleep(SUBSCRIBE_RETRY_DELAY).await;
                                            let _ = tx
                                                .send(TransportCommand::Subscribe(topic))
                                                .await;
                                        });
                                    }
                                }
                            }
                        }
                        Some(TransportCommand::Unsubscribe(topic)) => {
                            let gossipsub_topic = gossipsub::IdentTopic::new(&topic);
                            let _ = swarm.behaviour_mut().gossipsub.unsubscribe(&gossipsub_topic);
                            subscribed.remove(&topic);
                            retried.remove(&topic);
                        }
                        Some(TransportCommand::Dial(addr)) => {
                            if let Err(e) = swarm.dial(addr.clone()) {
                                error!(addr = %addr, error = %e, "Dial failed");
                            }
                        }
                        Some(TransportCommand::Shutdown) => {
                            info!("Transport shutdown requested");
                            break;
                        }
                        None => {
                            info!("Command channel closed, shutting down transport");
                            break;
                        }
                    }
                }

                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(MurmureEvent::Gossipsub(
                            gossipsub::Event::Message { message, .. },
                        )) => {
                            let topic = message.topic.to_string();
                            debug!(
                                topic = %topic,
                                source = ?message.source,
                                len = message.data.len(),
                                "GossipSub message received"
                            );
                            let _ = event_tx
                                .send(TransportEvent::Message {
                                    topic,
                                    data: message.data,
                                })
                                .await;
                        }

                        SwarmEvent::Behaviour(MurmureEvent::Kademlia(
                            kad::Event::OutboundQueryProgressed { result, .. },
                        )) => {
                            debug!(result = ?result, "Kademlia query progressed");
                        }

                        SwarmEvent::Behaviour(MurmureEvent::Identify(
                            identify::Event::Received { peer_id, info, .. },
                        )) => {
                            debug!(
                                peer = %peer_id,
                                protocol = ?info.protocol_version,
                                "Identify: received info from peer"
                            );
                            for addr in &info.listen_addrs {
                                swarm
                                    .behaviour_mut()
                                    .kademlia
                                    .add_address(&peer_id, addr.clone());
                            }
                        }

                        SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                            let addr = endpoint.get_remote_address().clone();
                            peer_tracker.on_connected(peer_id, addr.clone());
                            info!(peer = %peer_id, addr = %addr, "Peer connected");
                            let _ = event_tx
                                .send(TransportEvent::PeerConnected { peer_id })
                                .await;
                        }

                        SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                            if num_established == 0 {
                                peer_tracker.on_disconnected(&peer_id);
                                info!(peer = %peer_id, "Peer disconnected");
                                let _ = event_tx
                                    .send(TransportEvent::PeerDisconnected { peer_id })
                                    .await;
                            }
                        }

                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "Listening on new address");
                        }

                        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                            warn!(peer = ?peer_id, error = %error, "Outgoing connection error");
                        }

                        SwarmEvent::IncomingConnectionError { error, .. } => {
                            warn!(error = %error, "Incoming connection error");
                        }

                        _ => {}
                    }
                }
            }
        }

        info!("Transport event loop terminated");
    });

    Ok((cmd_tx, event_rx, local_peer_id))
}

/// Extract a `PeerId` from a multiaddr, if one is present.
fn extract_peer_id(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|p| {
        if let Protocol::P2p(peer_id) = p {
            Some(peer_id)
        } else {
            None
        }
    })
}
