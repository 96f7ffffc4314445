//! Chunked attachments.
//!
//! A blob travels as one `attachment_meta` followed by fixed-size
//! `attachment_chunk` payloads, each sealed through the ratchet like any
//! other message. The receiver reassembles once every index is present;
//! until then the metadata alone is displayable.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use murmure_shared::constants::ATTACHMENT_CHUNK_SIZE;
use murmure_shared::encoding;
use murmure_shared::protocol::InnerPayload;
use murmure_store::{Attachment, Message, MessageKind, MessageStatus};

use crate::engine::Engine;
use crate::error::Result;
use crate::events::EngineEvent;

impl Engine {
    /// Send a blob to a chat. Returns the attachment id.
    pub async fn send_attachment(
        &self,
        chat_id: &str,
        name: &str,
        mime: &str,
        bytes: &[u8],
    ) -> Result<String> {
        let identity = self.require_identity("send_attachment")?;
        let chat = self
            .chat(chat_id)?
            .ok_or_else(|| crate::error::EngineError::UnknownChat(chat_id.to_string()))?;

        let attachment_id = Uuid::new_v4().to_string();
        let message_id = Uuid::new_v4().to_string();
        let total_chunks = bytes.len().div_ceil(ATTACHMENT_CHUNK_SIZE) as u32;

        let meta = InnerPayload::AttachmentMeta {
            attachment_id: attachment_id.clone(),
            name: name.to_string(),
            mime: mime.to_string(),
            size: bytes.len() as u64,
            total_chunks,
        };
        self.send_payload(&chat, &message_id, &meta).await?;

        for (index, slice) in bytes.chunks(ATTACHMENT_CHUNK_SIZE).enumerate() {
            let chunk = InnerPayload::AttachmentChunk {
                attachment_id: attachment_id.clone(),
                index: index as u32,
                total_chunks,
                data: encoding::encode_b64(slice),
            };
            let chunk_envelope_id = Uuid::new_v4().to_string();
            self.send_payload(&chat, &chunk_envelope_id, &chunk).await?;
            debug!(attachment_id = %attachment_id, index, "attachment chunk sent");
        }

        // The sender keeps the finished record right away.
        let chunks = bytes
            .chunks(ATTACHMENT_CHUNK_SIZE)
            .enumerate()
            .map(|(i, slice)| (i as u32, encoding::encode_b64(slice)))
            .collect();
        let attachment = Attachment {
            id: attachment_id.clone(),
            message_id: message_id.clone(),
            name: name.to_string(),
            mime: mime.to_string(),
            size: bytes.len() as u64,
            total_chunks,
            received_chunks: total_chunks,
            chunks,
            complete: true,
            data: Some(encoding::encode_b64(bytes)),
        };
        let message = Message {
            id: message_id.clone(),
            chat_id: chat_id.to_string(),
            kind: MessageKind::AttachmentMeta,
            from: identity.chat_key(),
            body: name.to_string(),
            timestamp: Utc::now(),
            status: Some(MessageStatus::Sent),
            n: None,
            reply_to: None,
            edited: false,
            deleted: false,
            key_mismatch: false,
            attachment_id: Some(attachment_id.clone()),
        };
        {
            let mut guard = self.lock()?;
            guard.store.put_attachment(&attachment)?;
            guard.store.put_message(&message)?;
            if let Some(mut chat) = guard.store.chat(chat_id)? {
                chat.last_message_at = Some(message.timestamp);
                guard.store.put_chat(&chat)?;
            }
        }

        info!(
            attachment_id = %attachment_id,
            chat_id = %chat_id,
            size = bytes.len(),
            chunks = total_chunks,
            "attachment sent"
        );
        Ok(attachment_id)
    }

    /// Store an inbound chunk; assemble once every index is present.
    pub(crate) fn apply_attachment_chunk(
        &self,
        attachment_id: &str,
        index: u32,
        total_chunks: u32,
        data: String,
    ) {
        let (received, total, completed) = {
            let Ok(mut guard) = self.lock() else { return };
            let Ok(Some(mut attachment)) = guard.store.attachment(attachment_id) else {
                debug!(attachment_id = %attachment_id, "chunk for unknown attachment");
                return;
            };
            if attachment.complete || index >= attachment.total_chunks {
                return;
            }
            if attachment.total_chunks != total_chunks {
                debug!(attachment_id = %attachment_id, "chunk with inconsistent total");
                return;
            }

            attachment.chunks.entry(index).or_insert(data);
            attachment.received_chunks = attachment.chunks.len() as u32;

            let completed = attachment.received_chunks == attachment.total_chunks;
            if completed {
                // Ascending index order is the map's iteration order.
                let mut assembled = Vec::with_capacity(attachment.size as usize);
                for chunk in attachment.chunks.values() {
                    match encoding::decode_b64(chunk) {
                        Ok(bytes) => assembled.extend_from_slice(&bytes),
                        Err(e) => {
                            debug!(attachment_id = %attachment_id, error = %e, "bad chunk data");
                            return;
                        }
                    }
                }
                attachment.data = Some(encoding::encode_b64(&assembled));
                attachment.complete = true;
            }

            let received = attachment.received_chunks;
            let total = attachment.total_chunks;
            if guard.store.put_attachment(&attachment).is_err() {
                return;
            }
            (received, total, completed)
        };

        if completed {
            info!(attachment_id = %attachment_id, "attachment complete");
            self.emit(EngineEvent::AttachmentComplete {
                attachment_id: attachment_id.to_string(),
            });
        } else {
            self.emit(EngineEvent::AttachmentProgress {
                attachment_id: attachment_id.to_string(),
                received,
                total,
            });
        }
    }

    /// Decoded bytes of a completed attachment.
    pub fn attachment_bytes(&self, attachment_id: &str) -> Result<Option<Vec<u8>>> {
        let attachment = self.attachment(attachment_id)?;
        match attachment.and_then(|a| a.data) {
            Some(data) => Ok(Some(encoding::decode_b64(&data)?)),
            None => Ok(None),
        }
    }
}
