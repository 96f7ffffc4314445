//! Process-local transport bus.
//!
//! Speaks the same [`TransportCommand`] channel protocol as the libp2p
//! swarm, but routes published payloads straight to every subscribed
//! endpoint's inbox — including the publisher's own, matching the echo
//! behavior of the real gossip network. Delivery is fully deterministic:
//! nothing moves until [`MemoryBus::pump`] is called, and endpoints hand
//! their pending deliveries out through [`BusEndpoint::drain`].
//!
//! The engine integration tests wire several engines to one bus and settle
//! traffic by alternating pump and drain until the network is quiet.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use crate::swarm::TransportCommand;

type Inbox = Arc<Mutex<VecDeque<(String, Vec<u8>)>>>;

struct EndpointState {
    cmd_rx: mpsc::Receiver<TransportCommand>,
    topics: HashSet<String>,
    inbox: Inbox,
    shutdown: bool,
}

#[derive(Default)]
struct BusInner {
    endpoints: Vec<EndpointState>,
}

/// The hub shared by every endpoint of a test network.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<BusInner>>,
}

/// One node's view of the bus: deliveries pile up here until drained.
pub struct BusEndpoint {
    inbox: Inbox,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new endpoint. The returned sender is what an engine uses
    /// as its transport handle.
    pub fn endpoint(&self) -> (mpsc::Sender<TransportCommand>, BusEndpoint) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let inbox: Inbox = Arc::new(Mutex::new(VecDeque::new()));

        let mut inner = self.inner.lock().expect("bus lock");
        inner.endpoints.push(EndpointState {
            cmd_rx,
            topics: HashSet::new(),
            inbox: inbox.clone(),
            shutdown: false,
        });

        (cmd_tx, BusEndpoint { inbox })
    }

    /// Process every pending command on every endpoint, routing publishes
    /// to subscribed inboxes. Returns the number of deliveries made.
    pub fn pump(&self) -> usize {
        let mut inner = self.inner.lock().expect("bus lock");
        let mut delivered = 0;

        for i in 0..inner.endpoints.len() {
            loop {
                let cmd = match inner.endpoints[i].cmd_rx.try_recv() {
                    Ok(cmd) => cmd,
                    Err(_) => break,
                };
                match cmd {
                    TransportCommand::Publish { topic, data } => {
                        for endpoint in inner.endpoints.iter() {
                            if endpoint.shutdown || !endpoint.topics.contains(&topic) {
                                continue;
                            }
                            endpoint
                                .inbox
                                .lock()
                                .expect("inbox lock")
                                .push_back((topic.clone(), data.clone()));
                            delivered += 1;
                        }
                        debug!(topic = %topic, "bus routed publish");
                    }
                    TransportCommand::Subscribe(topic) => {
                        inner.endpoints[i].topics.insert(topic);
                    }
                    TransportCommand::Unsubscribe(topic) => {
                        inner.endpoints[i].topics.remove(&topic);
                    }
                    TransportCommand::Dial(_) => {}
                    TransportCommand::Shutdown => {
                        inner.endpoints[i].shutdown = true;
                        inner.endpoints[i].topics.clear();
                    }
                }
            }
        }

        delivered
    }
}

impl BusEndpoint {
    /// Take every pending delivery, oldest first.
    pub fn drain(&self) -> Vec<(String, Vec<u8>)> {
        self.inbox.lock().expect("inbox lock").drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers_only() {
        let bus = MemoryBus::new();
        let (tx_a, _ep_a) = bus.endpoint();
        let (tx_b, ep_b) = bus.endpoint();
        let (_tx_c, ep_c) = bus.endpoint();

        tx_b.send(TransportCommand::Subscribe("t1".into()))
            .await
            .unwrap();
        bus.pump();

        tx_a.send(TransportCommand::Publish {
            topic: "t1".into(),
            data: vec![1, 2, 3],
        })
        .await
        .unwrap();
        assert_eq!(bus.pump(), 1);

        assert_eq!(ep_b.drain(), vec![("t1".to_string(), vec![1, 2, 3])]);
        assert!(ep_c.drain().is_empty());
    }

    #[tokio::test]
    async fn test_publisher_receives_own_echo() {
        let bus = MemoryBus::new();
        let (tx_a, ep_a) = bus.endpoint();

        tx_a.send(TransportCommand::Subscribe("t1".into()))
            .await
            .unwrap();
        tx_a.send(TransportCommand::Publish {
            topic: "t1".into(),
            data: vec![9],
        })
        .await
        .unwrap();
        bus.pump();

        assert_eq!(ep_a.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = MemoryBus::new();
        let (tx_a, _ep_a) = bus.endpoint();
        let (tx_b, ep_b) = bus.endpoint();

        tx_b.send(TransportCommand::Subscribe("t1".into()))
            .await
            .unwrap();
        bus.pump();
        tx_b.send(TransportCommand::Unsubscribe("t1".into()))
            .await
            .unwrap();
        bus.pump();

        tx_a.send(TransportCommand::Publish {
            topic: "t1".into(),
            data: vec![1],
        })
        .await
        .unwrap();
        assert_eq!(bus.pump(), 0);
        assert!(ep_b.drain().is_empty());
    }
}
