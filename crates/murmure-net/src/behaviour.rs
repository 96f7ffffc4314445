//! Composed libp2p `NetworkBehaviour` for murmure nodes.
//!
//! Combines GossipSub (content-topic pub/sub), Kademlia (DHT peer
//! discovery) and Identify (protocol negotiation). All sub-behaviours are
//! driven by the single swarm event loop; construction is handled by
//! [`super::transport::build_swarm`].

use libp2p::{
    gossipsub, identify,
    kad::{self, store::MemoryStore},
    swarm::NetworkBehaviour,
};

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "MurmureEvent")]
pub struct MurmureBehaviour {
    /// Pub/sub delivery of opaque envelope payloads on content topics
    pub gossipsub: gossipsub::Behaviour,
    /// Distributed hash table for peer discovery
    pub kademlia: kad::Behaviour<MemoryStore>,
    /// Protocol identification and address exchange
    pub identify: identify::Behaviour,
}

/// Events emitted by the composed behaviour, one variant per sub-behaviour.
#[derive(Debug)]
pub enum MurmureEvent {
    Gossipsub(gossipsub::Event),
    Kademlia(kad::Event),
    Identify(identify::Event),
}

impl From<gossipsub::Event> for MurmureEvent {
    fn from(event: gossipsub::Event) -> Self {
        MurmureEvent::Gossipsub(event)
    }
}

impl From<kad::Event> for MurmureEvent {
    fn from(event: kad::Event) -> Self {
        MurmureEvent::Kademlia(event)
    }
}

impl From<identify::Event> for MurmureEvent {
    fn from(event: identify::Event) -> Self {
        MurmureEvent::Identify(event)
    }
}
