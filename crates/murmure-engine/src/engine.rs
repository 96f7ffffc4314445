//! Engine construction, identity lifecycle and the inbound drive loop.
//!
//! The [`Engine`] is a cheap clone handle around one state holder. Commands
//! are async methods; inbound transport deliveries go through
//! [`Engine::handle_inbound`], either driven by [`Engine::run`] against the
//! live swarm or called directly by tests against the in-memory bus.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use murmure_net::{TransportCommand, TransportEvent};
use murmure_shared::identity::Identity;
use murmure_shared::protocol::Envelope;
use murmure_shared::ratchet::{ConversationKind, Session};
use murmure_shared::{encoding, topics};
use murmure_store::{
    Attachment, Chat, Message, Peer, Reaction, Request, RequestState, Store,
};

use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::state::EngineInner;

#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<Mutex<EngineInner>>,
    pub(crate) transport: mpsc::Sender<TransportCommand>,
    pub(crate) events: mpsc::UnboundedSender<EngineEvent>,
}

impl Engine {
    /// Build an engine over a persistence port and a transport command
    /// channel. Returns the engine and the event stream for the
    /// presentation layer.
    pub fn new(
        store: Box<dyn Store>,
        transport: mpsc::Sender<TransportCommand>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let engine = Self {
            inner: Arc::new(Mutex::new(EngineInner::new(store))),
            transport,
            events,
        };
        (engine, events_rx)
    }

    /// Drive the engine from a transport event stream until it closes.
    pub async fn run(self, mut events: mpsc::Receiver<TransportEvent>) {
        info!("engine inbound loop started");
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Message { topic, data } => {
                    self.handle_inbound(&topic, &data).await;
                }
                TransportEvent::PeerConnected { peer_id } => {
                    debug!(peer = %peer_id, "transport peer connected");
                }
                TransportEvent::PeerDisconnected { peer_id } => {
                    debug!(peer = %peer_id, "transport peer disconnected");
                }
            }
        }
        info!("engine inbound loop terminated");
    }

    // -----------------------------------------------------------------
    // Identity lifecycle
    // -----------------------------------------------------------------

    /// Generate a fresh identity, seal it under the passphrase, persist it
    /// and leave it unlocked. Returns the chat-key.
    pub async fn create_identity(&self, passphrase: &str) -> Result<String> {
        let (identity, chat_key) = {
            let mut guard = self.lock()?;
            if guard.store.identity()?.is_some() {
                return Err(EngineError::IdentityExists);
            }

            let identity = Identity::generate();
            let sealed = identity.seal(passphrase)?;
            guard.store.put_identity(&sealed)?;
            guard.identity = Some(identity.clone());

            let chat_key = identity.chat_key();
            info!(chat_key = %chat_key, "created identity");
            (identity, chat_key)
        };

        self.subscribe(&topics::inbox_topic(&identity.public_key_bytes()))
            .await?;
        Ok(chat_key)
    }

    /// Unseal the stored identity. `Ok(false)` means a wrong passphrase;
    /// the sealed record is untouched. On success the inbox and every
    /// accepted chat topic get (re)subscribed.
    pub async fn unlock(&self, passphrase: &str) -> Result<bool> {
        let unlocked = {
            let mut guard = self.lock()?;
            let sealed = guard.store.identity()?.ok_or(EngineError::NoIdentity)?;
            match sealed.unseal(passphrase) {
                Ok(identity) => {
                    info!(chat_key = %identity.chat_key(), "identity unlocked");
                    guard.identity = Some(identity);
                    true
                }
                Err(murmure_shared::CryptoError::BadPassphrase) => {
                    warn!("unlock failed: wrong passphrase");
                    false
                }
                Err(e) => return Err(e.into()),
            }
        };

        if unlocked {
            self.resubscribe_all().await?;
        }
        Ok(unlocked)
    }

    /// Drop the unsealed identity from memory. Inbound processing becomes
    /// a no-op until the next unlock.
    pub fn lock_identity(&self) -> Result<()> {
        let mut guard = self.lock()?;
        guard.identity = None;
        Ok(())
    }

    pub fn is_unlocked(&self) -> bool {
        self.lock().map(|g| g.identity.is_some()).unwrap_or(false)
    }

    pub fn chat_key(&self) -> Option<String> {
        self.lock().ok()?.identity.as_ref().map(|i| i.chat_key())
    }

    /// Re-subscribe the inbox topic and every known chat topic, e.g. after
    /// unlock or restore. Requires only the public half of the identity.
    pub(crate) async fn resubscribe_all(&self) -> Result<()> {
        let (inbox, chat_topics) = {
            let guard = self.lock()?;
            let inbox = guard
                .store
                .identity()?
                .map(|sealed| topics::inbox_topic(&sealed.public_key));
            let chat_topics: Vec<String> = guard
                .store
                .chats()?
                .iter()
                .map(|chat| match chat.kind {
                    ConversationKind::Dm => topics::dm_topic(&chat.id),
                    ConversationKind::Group => topics::group_topic(&chat.id),
                })
                .collect();
            (inbox, chat_topics)
        };

        if let Some(topic) = inbox {
            self.subscribe(&topic).await?;
        }
        for topic in chat_topics {
            self.subscribe(&topic).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Shared plumbing
    // -----------------------------------------------------------------

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, EngineInner>> {
        self.inner.lock().map_err(|_| EngineError::StatePoisoned)
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        // The consumer may be gone (headless operation); that is fine.
        let _ = self.events.send(event);
    }

    /// Clone the unsealed identity or fail with `Locked`, recording the
    /// refusal in the bounded error log.
    pub(crate) fn require_identity(&self, action: &str) -> Result<Identity> {
        let mut guard = self.lock()?;
        match guard.identity() {
            Some(identity) => Ok(identity),
            None => {
                guard.push_error(format!("{action}: identity is locked"));
                Err(EngineError::Locked)
            }
        }
    }

    pub(crate) async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<()> {
        let data = envelope.encode()?;
        debug!(topic = %topic, len = data.len(), "publishing envelope");
        self.transport
            .send(TransportCommand::Publish {
                topic: topic.to_string(),
                data,
            })
            .await
            .map_err(|_| EngineError::TransportClosed)
    }

    /// Subscribe a topic at most once per process.
    pub(crate) async fn subscribe(&self, topic: &str) -> Result<()> {
        {
            let mut guard = self.lock()?;
            if !guard.subscribed.insert(topic.to_string()) {
                return Ok(());
            }
        }
        debug!(topic = %topic, "subscribing");
        self.transport
            .send(TransportCommand::Subscribe(topic.to_string()))
            .await
            .map_err(|_| EngineError::TransportClosed)
    }

    /// Publish an envelope to the inbox of the given chat-key.
    pub(crate) async fn publish_to_inbox(
        &self,
        peer_chat_key: &str,
        envelope: &Envelope,
    ) -> Result<()> {
        let peer_public = encoding::decode_chat_key(peer_chat_key)?;
        self.publish(&topics::inbox_topic(&peer_public), envelope)
            .await
    }

    // -----------------------------------------------------------------
    // Queries and small commands
    // -----------------------------------------------------------------

    pub fn requests(&self) -> Result<Vec<Request>> {
        Ok(self.lock()?.store.requests()?)
    }

    pub fn request_state(&self, request_id: &str) -> Result<Option<RequestState>> {
        Ok(self.lock()?.store.request_state(request_id)?)
    }

    pub fn chats(&self) -> Result<Vec<Chat>> {
        Ok(self.lock()?.store.chats()?)
    }

    pub fn chat(&self, chat_id: &str) -> Result<Option<Chat>> {
        Ok(self.lock()?.store.chat(chat_id)?)
    }

    pub fn messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        Ok(self.lock()?.store.messages_for_chat(chat_id)?)
    }

    pub fn reactions(&self, message_id: &str) -> Result<Vec<Reaction>> {
        Ok(self.lock()?.store.reactions_for_message(message_id)?)
    }

    pub fn attachment(&self, attachment_id: &str) -> Result<Option<Attachment>> {
        Ok(self.lock()?.store.attachment(attachment_id)?)
    }

    pub fn peers(&self) -> Result<Vec<Peer>> {
        Ok(self.lock()?.store.peers()?)
    }

    pub fn session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.lock()?.store.session(session_id)?)
    }

    /// Peers currently typing in a chat.
    pub fn typing_peers(&self, chat_id: &str) -> Result<Vec<String>> {
        let guard = self.lock()?;
        let mut peers = Vec::new();
        for ((chat, peer), is_typing) in guard.typing.iter() {
            if chat.as_str() == chat_id && *is_typing {
                peers.push(peer.clone());
            }
        }
        peers.sort();
        Ok(peers)
    }

    /// Most recent command failures, oldest first (bounded ring).
    pub fn recent_errors(&self) -> Vec<String> {
        self.lock()
            .map(|g| g.error_log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Mark a chat as on-screen; clears its unread counter.
    pub fn set_active_chat(&self, chat_id: Option<&str>) -> Result<()> {
        let mut guard = self.lock()?;
        guard.active_chat = chat_id.map(str::to_string);
        if let Some(id) = chat_id {
            if let Some(mut chat) = guard.store.chat(id)? {
                if chat.unread_count != 0 {
                    chat.unread_count = 0;
                    guard.store.put_chat(&chat)?;
                }
            }
        }
        Ok(())
    }

    /// Attach a human alias to a peer record.
    pub fn set_alias(&self, chat_key: &str, alias: Option<&str>) -> Result<()> {
        let mut guard = self.lock()?;
        let mut peer = guard.store.peer(chat_key)?.unwrap_or(Peer {
            chat_key: chat_key.to_string(),
            alias: None,
            first_seen: Utc::now(),
        });
        peer.alias = alias.map(str::to_string);
        guard.store.put_peer(&peer)?;
        Ok(())
    }

    /// Make sure a peer record exists for a correspondent.
    pub(crate) fn remember_peer(guard: &mut EngineInner, chat_key: &str) -> Result<()> {
        if guard.store.peer(chat_key)?.is_none() {
            guard.store.put_peer(&Peer {
                chat_key: chat_key.to_string(),
                alias: None,
                first_seen: Utc::now(),
            })?;
        }
        Ok(())
    }
}
