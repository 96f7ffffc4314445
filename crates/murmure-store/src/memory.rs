//! In-memory store used by tests and by the engine's integration suite.

use std::collections::BTreeMap;

use murmure_shared::identity::SealedIdentity;
use murmure_shared::ratchet::Session;

use crate::error::Result;
use crate::models::{
    Attachment, Chat, Message, Peer, Reaction, Request, RequestState,
};
use crate::store::{Snapshot, Store};

#[derive(Debug, Default)]
pub struct MemoryStore {
    identity: Option<SealedIdentity>,
    peers: BTreeMap<String, Peer>,
    requests: BTreeMap<String, Request>,
    request_states: BTreeMap<String, RequestState>,
    chats: BTreeMap<String, Chat>,
    sessions: BTreeMap<String, Session>,
    messages: BTreeMap<String, Message>,
    reactions: BTreeMap<String, Reaction>,
    attachments: BTreeMap<String, Attachment>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn identity(&self) -> Result<Option<SealedIdentity>> {
        Ok(self.identity.clone())
    }

    fn put_identity(&mut self, identity: &SealedIdentity) -> Result<()> {
        self.identity = Some(identity.clone());
        Ok(())
    }

    fn peer(&self, chat_key: &str) -> Result<Option<Peer>> {
        Ok(self.peers.get(chat_key).cloned())
    }

    fn put_peer(&mut self, peer: &Peer) -> Result<()> {
        self.peers.insert(peer.chat_key.clone(), peer.clone());
        Ok(())
    }

    fn peers(&self) -> Result<Vec<Peer>> {
        Ok(self.peers.values().cloned().collect())
    }

    fn request(&self, id: &str) -> Result<Option<Request>> {
        Ok(self.requests.get(id).cloned())
    }

    fn put_request(&mut self, request: &Request) -> Result<()> {
        self.requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    fn requests(&self) -> Result<Vec<Request>> {
        let mut all: Vec<Request> = self.requests.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    fn request_state(&self, request_id: &str) -> Result<Option<RequestState>> {
        Ok(self.request_states.get(request_id).cloned())
    }

    fn put_request_state(&mut self, state: &RequestState) -> Result<()> {
        self.request_states
            .insert(state.request_id.clone(), state.clone());
        Ok(())
    }

    fn request_states(&self) -> Result<Vec<RequestState>> {
        Ok(self.request_states.values().cloned().collect())
    }

    fn chat(&self, id: &str) -> Result<Option<Chat>> {
        Ok(self.chats.get(id).cloned())
    }

    fn put_chat(&mut self, chat: &Chat) -> Result<()> {
        self.chats.insert(chat.id.clone(), chat.clone());
        Ok(())
    }

    fn chats(&self) -> Result<Vec<Chat>> {
        Ok(self.chats.values().cloned().collect())
    }

    fn session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(id).cloned())
    }

    fn put_session(&mut self, session: &Session) -> Result<()> {
        self.sessions
            .insert(session.conversation_id.clone(), session.clone());
        Ok(())
    }

    fn sessions(&self) -> Result<Vec<Session>> {
        Ok(self.sessions.values().cloned().collect())
    }

    fn message(&self, id: &str) -> Result<Option<Message>> {
        Ok(self.messages.get(id).cloned())
    }

    fn put_message(&mut self, message: &Message) -> Result<()> {
        self.messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    fn messages_for_chat(&self, chat_id: &str) -> Result<Vec<Message>> {
        let mut all: Vec<Message> = self
            .messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    fn messages(&self) -> Result<Vec<Message>> {
        Ok(self.messages.values().cloned().collect())
    }

    fn reaction(&self, id: &str) -> Result<Option<Reaction>> {
        Ok(self.reactions.get(id).cloned())
    }

    fn put_reaction(&mut self, reaction: &Reaction) -> Result<()> {
        self.reactions.insert(reaction.id.clone(), reaction.clone());
        Ok(())
    }

    fn reactions_for_message(&self, message_id: &str) -> Result<Vec<Reaction>> {
        let mut all: Vec<Reaction> = self
            .reactions
            .values()
            .filter(|r| r.message_id == message_id)
            .cloned()
            .collect();
        all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    fn reactions(&self) -> Result<Vec<Reaction>> {
        Ok(self.reactions.values().cloned().collect())
    }

    fn attachment(&self, id: &str) -> Result<Option<Attachment>> {
        Ok(self.attachments.get(id).cloned())
    }

    fn put_attachment(&mut self, attachment: &Attachment) -> Result<()> {
        self.attachments
            .insert(attachment.id.clone(), attachment.clone());
        Ok(())
    }

    fn attachments(&self) -> Result<Vec<Attachment>> {
        Ok(self.attachments.values().cloned().collect())
    }

    fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            identity: self.identity.clone(),
            peers: self.peers()?,
            requests: self.requests()?,
            request_states: self.request_states()?,
            chats: self.chats()?,
            sessions: self.sessions()?,
            messages: self.messages()?,
            reactions: self.reactions()?,
            attachments: self.attachments()?,
        })
    }

    fn replace_all(&mut self, snapshot: Snapshot) -> Result<()> {
        *self = Self::default();
        self.identity = snapshot.identity;
        for p in &snapshot.peers {
            self.put_peer(p)?;
        }
        for r in &snapshot.requests {
            self.put_request(r)?;
        }
        for s in &snapshot.request_states {
            self.put_request_state(s)?;
        }
        for c in &snapshot.chats {
            self.put_chat(c)?;
        }
        for s in &snapshot.sessions {
            self.put_session(s)?;
        }
        for m in &snapshot.messages {
            self.put_message(m)?;
        }
        for r in &snapshot.reactions {
            self.put_reaction(r)?;
        }
        for a in &snapshot.attachments {
            self.put_attachment(a)?;
        }
        Ok(())
    }
}
