use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use murmure_shared::ratchet::ConversationKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Dm,
    Group,
}

/// Handshake state for one request. Transitions are monotone: `Pending` may
/// move to any terminal state, terminal states never move back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
    Blocked,
}

/// An inbound or outbound chat request / group invite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    /// Sender-generated UUID for DMs, `<groupId>:<creatorChatKey>` for
    /// group invites.
    pub id: String,
    pub kind: RequestKind,
    pub from: String,
    pub to: String,
    pub intro: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub members: Option<Vec<String>>,
}

/// Mirror of the remote answer to one of our outgoing requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestState {
    pub request_id: String,
    pub status: RequestStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub chat_key: String,
    pub alias: Option<String>,
    pub first_seen: DateTime<Utc>,
}

/// A conversation both sides have agreed to. DM chats have exactly two
/// participants; group chats at least two including self.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    /// Conversation id (DM) or group id.
    pub id: String,
    pub kind: ConversationKind,
    pub title: String,
    pub participants: BTreeSet<String>,
    pub accepted: bool,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Reaction,
    Edit,
    Delete,
    Typing,
    AttachmentMeta,
    AttachmentChunk,
    System,
    Rekey,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Failed,
}

/// A displayed message. The id is sender-chosen and survives edits and
/// deletes; only the flag fields mutate after insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub kind: MessageKind,
    pub from: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub status: Option<MessageStatus>,
    /// Ratchet counter the message was sealed under (outgoing only).
    pub n: Option<u64>,
    pub reply_to: Option<String>,
    pub edited: bool,
    pub deleted: bool,
    pub key_mismatch: bool,
    pub attachment_id: Option<String>,
}

impl Message {
    pub fn system(chat_id: &str, from: &str, body: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            kind: MessageKind::System,
            from: from.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
            status: None,
            n: None,
            reply_to: None,
            edited: false,
            deleted: false,
            key_mismatch: false,
            attachment_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub id: String,
    pub message_id: String,
    pub from: String,
    pub emoji: String,
    pub timestamp: DateTime<Utc>,
}

/// A chunked attachment being sent or reassembled. Chunks accumulate by
/// index until every one is present, then collapse into `data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub message_id: String,
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub total_chunks: u32,
    pub received_chunks: u32,
    /// index → base64 slice of the original blob.
    pub chunks: BTreeMap<u32, String>,
    pub complete: bool,
    /// Base64 of the fully assembled blob, set once complete.
    pub data: Option<String>,
}
