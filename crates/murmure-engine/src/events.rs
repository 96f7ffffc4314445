//! Engine event stream.
//!
//! The presentation layer subscribes to one receiver and renders from
//! these; nothing in the engine ever blocks on the consumer.

use murmure_store::RequestStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// An inbound chat request or group invite was persisted.
    RequestReceived { request_id: String, from: String },
    /// A remote peer answered one of our requests, or we answered theirs.
    RequestAnswered {
        request_id: String,
        status: RequestStatus,
    },
    /// A chat came into existence (both sides agreed).
    ChatCreated { chat_id: String },
    /// A decrypted message was appended to a chat.
    MessageReceived { chat_id: String, message_id: String },
    /// A previously sent message was acknowledged by the recipient.
    MessageDelivered { chat_id: String, message_id: String },
    MessageEdited { chat_id: String, message_id: String },
    MessageDeleted { chat_id: String, message_id: String },
    ReactionAdded {
        chat_id: String,
        message_id: String,
        emoji: String,
    },
    /// Transient typing indicator; never persisted.
    Typing {
        chat_id: String,
        from: String,
        is_typing: bool,
    },
    AttachmentProgress {
        attachment_id: String,
        received: u32,
        total: u32,
    },
    AttachmentComplete { attachment_id: String },
    /// An inbound payload could not be decrypted; the chat shows a rekey
    /// affordance.
    KeyMismatch { chat_id: String },
    SessionRekeyed { chat_id: String },
}
