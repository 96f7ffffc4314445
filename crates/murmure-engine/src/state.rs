//! Mutable engine state.
//!
//! All mutation is sequenced through one `Mutex`-guarded holder; the lock
//! is never held across an await point. Sessions are looked up by id on
//! each use rather than handed out.

use std::collections::{HashMap, HashSet, VecDeque};

use murmure_shared::constants::{ERROR_LOG_CAPACITY, SEEN_ENVELOPES_CAPACITY};
use murmure_shared::identity::Identity;
use murmure_store::Store;

/// Envelope ids already decrypted, bounded per chat (oldest-evicted).
///
/// The mesh redelivers envelopes; a second `receive_key` lookup at an
/// already-consumed counter reads as a key mismatch, so replays must be
/// stopped before they reach the ratchet. An id is recorded only once its
/// payload actually opened.
#[derive(Debug, Default)]
pub struct SeenEnvelopes {
    by_chat: HashMap<String, (VecDeque<String>, HashSet<String>)>,
}

impl SeenEnvelopes {
    pub fn contains(&self, chat_id: &str, envelope_id: &str) -> bool {
        self.by_chat
            .get(chat_id)
            .is_some_and(|(_, set)| set.contains(envelope_id))
    }

    pub fn insert(&mut self, chat_id: &str, envelope_id: &str) {
        let (order, set) = self.by_chat.entry(chat_id.to_string()).or_default();
        if !set.insert(envelope_id.to_string()) {
            return;
        }
        order.push_back(envelope_id.to_string());
        while order.len() > SEEN_ENVELOPES_CAPACITY {
            if let Some(oldest) = order.pop_front() {
                set.remove(&oldest);
            }
        }
    }
}

pub struct EngineInner {
    pub store: Box<dyn Store>,
    /// Unsealed identity, present only between unlock and shutdown.
    pub identity: Option<Identity>,
    /// Topics this process already subscribed; redundant requests are
    /// dropped here before they reach the transport.
    pub subscribed: HashSet<String>,
    /// Transient typing indicators keyed by (chat id, peer chat-key).
    pub typing: HashMap<(String, String), bool>,
    /// Inbound envelope ids already processed, per chat.
    pub seen_envelopes: SeenEnvelopes,
    /// Chat currently on screen; its inbound messages do not bump unread.
    pub active_chat: Option<String>,
    /// Short ring of recent command failures, surfaced to the caller.
    pub error_log: VecDeque<String>,
}

impl EngineInner {
    pub fn new(store: Box<dyn Store>) -> Self {
        Self {
            store,
            identity: None,
            subscribed: HashSet::new(),
            typing: HashMap::new(),
            seen_envelopes: SeenEnvelopes::default(),
            active_chat: None,
            error_log: VecDeque::new(),
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        if self.error_log.len() == ERROR_LOG_CAPACITY {
            self.error_log.pop_front();
        }
        self.error_log.push_back(message.into());
    }

    /// Clone of the unsealed identity, or `None` while locked.
    pub fn identity(&self) -> Option<Identity> {
        self.identity.clone()
    }
}
