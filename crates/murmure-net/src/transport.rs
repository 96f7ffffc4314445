use libp2p::identity::Keypair;
use tracing::info;

use murmure_shared::constants::KDF_CONTEXT_NODE_KEY;

/// Derive the libp2p node keypair from the identity secret.
///
/// The x25519 identity never goes on the transport; a dedicated Ed25519
/// keypair is derived through a BLAKE3 context KDF so the same identity
/// always comes back as the same node, without reusing key material.
pub fn node_keypair(identity_secret: &[u8; 32]) -> anyhow::Result<Keypair> {
    let mut seed = blake3::derive_key(KDF_CONTEXT_NODE_KEY, identity_secret);

    Ok(Keypair::ed25519_from_bytes(&mut seed[..])?)
}

pub fn build_swarm(
    keypair: Keypair,
) -> anyhow::Result<libp2p::Swarm<super::behaviour::MurmureBehaviour>> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::time::Duration;

    use libp2p::gossipsub::{self, MessageAuthenticity, MessageId, ValidationMode};
    use libp2p::kad::{self, store::MemoryStore};
    use libp2p::{identify, SwarmBuilder};

    use murmure_shared::constants::{
        GOSSIPSUB_HEARTBEAT_SECS, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
    };

    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_behaviour(|key| -> std::result::Result<super::behaviour::MurmureBehaviour, Box<dyn std::error::Error + Send + Sync>> {
            let local_peer_id = key.public().to_peer_id();

            let message_id_fn = |message: &gossipsub::Message| {
                let mut hasher = DefaultHasher::new();
                message.data.hash(&mut hasher);
                if let Some(ref source) = message.source {
                    source.hash(&mut hasher);
                }
                MessageId::from(hasher.finish().to_string())
            };

            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(GOSSIPSUB_HEARTBEAT_SECS))
                .validation_mode(ValidationMode::Strict)
                .max_transmit_size(MAX_MESSAGE_SIZE)
                .message_id_fn(message_id_fn)
                .build()
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                    format!("GossipSub config: {e}").into()
                })?;

            let gossipsub = gossipsub::Behaviour::new(
                MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                format!("GossipSub init: {e}").into()
            })?;

            let store = MemoryStore::new(local_peer_id);
            let mut kademlia = kad::Behaviour::new(local_peer_id, store);
            kademlia.set_mode(Some(kad::Mode::Server));

            let identify_config =
                identify::Config::new(PROTOCOL_VERSION.to_string(), key.public())
                    .with_push_listen_addr_updates(true)
                    .with_interval(Duration::from_secs(60));
            let identify = identify::Behaviour::new(identify_config);

            Ok(super::behaviour::MurmureBehaviour {
                gossipsub,
                kademlia,
                identify,
            })
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    info!(
        peer_id = %swarm.local_peer_id(),
        "Built murmure swarm with QUIC transport"
    );

    Ok(swarm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_keypair_deterministic() {
        let secret = [7u8; 32];
        let a = node_keypair(&secret).unwrap();
        let b = node_keypair(&secret).unwrap();
        assert_eq!(
            a.public().to_peer_id(),
            b.public().to_peer_id()
        );
    }

    #[test]
    fn test_node_keypair_distinct_identities() {
        let a = node_keypair(&[1u8; 32]).unwrap();
        let b = node_keypair(&[2u8; 32]).unwrap();
        assert_ne!(a.public().to_peer_id(), b.public().to_peer_id());
    }
}
