//! The persistence port consumed by the engine.
//!
//! Every record type lives in its own keyed store with `get`, `put` and
//! `get_all`; `snapshot` and `replace_all` are the single transactional
//! pair used by encrypted backup and restore. The engine only ever sees
//! this trait, so tests swap in [`crate::MemoryStore`] and production uses
//! [`crate::SqliteStore`].

use serde::{Deserialize, Serialize};

use murmure_shared::identity::SealedIdentity;
use murmure_shared::ratchet::Session;

use crate::error::Result;
use crate::models::{
    Attachment, Chat, Message, Peer, Reaction, Request, RequestState,
};

/// Complete dump of every persisted record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub identity: Option<SealedIdentity>,
    pub peers: Vec<Peer>,
    pub requests: Vec<Request>,
    pub request_states: Vec<RequestState>,
    pub chats: Vec<Chat>,
    pub sessions: Vec<Session>,
    pub messages: Vec<Message>,
    pub reactions: Vec<Reaction>,
    pub attachments: Vec<Attachment>,
}

pub trait Store: Send {
    fn identity(&self) -> Result<Option<SealedIdentity>>;
    fn put_identity(&mut self, identity: &SealedIdentity) -> Result<()>;

    fn peer(&self, chat_key: &str) -> Result<Option<Peer>>;
    fn put_peer(&mut self, peer: &Peer) -> Result<()>;
    fn peers(&self) -> Result<Vec<Peer>>;

    fn request(&self, id: &str) -> Result<Option<Request>>;
    fn put_request(&mut self, request: &Request) -> Result<()>;
    fn requests(&self) -> Result<Vec<Request>>;

    fn request_state(&self, request_id: &str) -> Result<Option<RequestState>>;
    fn put_request_state(&mut self, state: &RequestState) -> Result<()>;
    fn request_states(&self) -> Result<Vec<RequestState>>;

    fn chat(&self, id: &str) -> Result<Option<Chat>>;
    fn put_chat(&mut self, chat: &Chat) -> Result<()>;
    fn chats(&self) -> Result<Vec<Chat>>;

    /// Sessions are keyed by conversation id (DMs) or pairwise group
    /// session id.
    fn session(&self, id: &str) -> Result<Option<Session>>;
    fn put_session(&mut self, session: &Session) -> Result<()>;
    fn sessions(&self) -> Result<Vec<Session>>;

    fn message(&self, id: &str) -> Result<Option<Message>>;
    fn put_message(&mut self, message: &Message) -> Result<()>;
    /// Messages of one chat, oldest first.
    fn messages_for_chat(&self, chat_id: &str) -> Result<Vec<Message>>;
    fn messages(&self) -> Result<Vec<Message>>;

    fn reaction(&self, id: &str) -> Result<Option<Reaction>>;
    fn put_reaction(&mut self, reaction: &Reaction) -> Result<()>;
    fn reactions_for_message(&self, message_id: &str) -> Result<Vec<Reaction>>;
    fn reactions(&self) -> Result<Vec<Reaction>>;

    fn attachment(&self, id: &str) -> Result<Option<Attachment>>;
    fn put_attachment(&mut self, attachment: &Attachment) -> Result<()>;
    fn attachments(&self) -> Result<Vec<Attachment>>;

    fn snapshot(&self) -> Result<Snapshot>;
    /// Atomically replace the contents of every store. Used by restore.
    fn replace_all(&mut self, snapshot: Snapshot) -> Result<()>;
}
