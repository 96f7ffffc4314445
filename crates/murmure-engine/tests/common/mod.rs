//! Test harness: engines wired to the in-memory bus and in-memory store.
//!
//! Delivery is fully deterministic — the bus moves nothing until pumped,
//! and [`settle`] alternates pump/drain rounds until the network is quiet.

#![allow(dead_code)]

use std::sync::Once;

use tokio::sync::mpsc::UnboundedReceiver;

use murmure_engine::{Engine, EngineEvent};
use murmure_net::{BusEndpoint, MemoryBus};
use murmure_shared::topics;
use murmure_store::{MemoryStore, RequestStatus};

pub struct Node {
    pub engine: Engine,
    pub endpoint: BusEndpoint,
    pub events: UnboundedReceiver<EngineEvent>,
    pub chat_key: String,
}

static TRACING: Once = Once::new();

/// An engine with no identity yet.
pub fn bare_node(bus: &MemoryBus) -> Node {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });

    let (cmd_tx, endpoint) = bus.endpoint();
    let (engine, events) = Engine::new(Box::new(MemoryStore::new()), cmd_tx);
    Node {
        engine,
        endpoint,
        events,
        chat_key: String::new(),
    }
}

/// An engine with a fresh unlocked identity.
pub async fn spawn_node(bus: &MemoryBus, passphrase: &str) -> Node {
    let mut node = bare_node(bus);
    node.chat_key = node.engine.create_identity(passphrase).await.unwrap();
    node
}

/// Pump and drain until no endpoint delivers anything new.
pub async fn settle(bus: &MemoryBus, nodes: &[&Node]) {
    loop {
        bus.pump();
        let mut delivered = false;
        for node in nodes {
            for (topic, data) in node.endpoint.drain() {
                delivered = true;
                node.engine.handle_inbound(&topic, &data).await;
            }
        }
        if !delivered {
            break;
        }
    }
}

/// Everything the node's event stream has emitted so far.
pub fn drain_events(node: &mut Node) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = node.events.try_recv() {
        out.push(event);
    }
    out
}

/// Two nodes with an accepted DM chat between them. Returns (a, b, cid);
/// `a` sent the request with intro "hi", `b` accepted it.
pub async fn dm_pair(bus: &MemoryBus) -> (Node, Node, String) {
    let a = spawn_node(bus, "pa").await;
    let b = spawn_node(bus, "pb").await;
    // Register inbox subscriptions before anything is published.
    bus.pump();

    a.engine.send_chat_request(&b.chat_key, "hi").await.unwrap();
    settle(bus, &[&a, &b]).await;

    let request_id = b.engine.requests().unwrap()[0].id.clone();
    b.engine
        .respond_to_request(&request_id, RequestStatus::Accepted)
        .await
        .unwrap();
    settle(bus, &[&a, &b]).await;

    let cid = topics::conversation_id(&a.chat_key, &b.chat_key);
    (a, b, cid)
}
