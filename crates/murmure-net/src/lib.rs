// P2P transport layer: libp2p gossipsub behind command/event channels,
// plus a deterministic in-memory bus speaking the same protocol for tests.

pub mod behaviour;
pub mod discovery;
pub mod memory;
pub mod peers;
pub mod swarm;
pub mod transport;

pub use behaviour::{MurmureBehaviour, MurmureEvent};
pub use discovery::{bootstrap_peers, parse_multiaddrs};
pub use memory::{BusEndpoint, MemoryBus};
pub use peers::{ConnectionInfo, PeerTracker};
pub use swarm::{spawn_swarm, TransportCommand, TransportConfig, TransportEvent};
pub use transport::{build_swarm, node_keypair};
