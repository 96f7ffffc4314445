//! Outbound conversation traffic.
//!
//! Every payload rides the ratchet: one advance of the send chain per DM
//! envelope, one advance per recipient pair for groups (sealed fanout —
//! a single group envelope carries one independently encrypted copy per
//! member).

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use murmure_shared::protocol::{Envelope, EnvelopeBody, InnerPayload, SealedRecipient};
use murmure_shared::ratchet::ConversationKind;
use murmure_shared::{crypto, encoding, topics};
use murmure_store::{Chat, Message, MessageKind, MessageStatus, Reaction};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::sessions::other_participant;

impl Engine {
    /// Send a text message. Returns the message id.
    pub async fn send_text(
        &self,
        chat_id: &str,
        body: &str,
        reply_to: Option<&str>,
    ) -> Result<String> {
        let identity = self.require_identity("send_text")?;
        let chat = self.accepted_chat(chat_id)?;

        let message_id = Uuid::new_v4().to_string();
        let payload = InnerPayload::Text {
            body: body.to_string(),
            reply_to: reply_to.map(str::to_string),
        };
        let n = self.send_payload(&chat, &message_id, &payload).await?;

        let message = Message {
            id: message_id.clone(),
            chat_id: chat_id.to_string(),
            kind: MessageKind::Text,
            from: identity.chat_key(),
            body: body.to_string(),
            timestamp: Utc::now(),
            status: Some(MessageStatus::Sent),
            n,
            reply_to: reply_to.map(str::to_string),
            edited: false,
            deleted: false,
            key_mismatch: false,
            attachment_id: None,
        };
        {
            let mut guard = self.lock()?;
            guard.store.put_message(&message)?;
            if let Some(mut chat) = guard.store.chat(chat_id)? {
                chat.last_message_at = Some(message.timestamp);
                guard.store.put_chat(&chat)?;
            }
        }

        info!(chat_id = %chat_id, message_id = %message_id, "text sent");
        Ok(message_id)
    }

    /// React to a message. The envelope id doubles as the reaction id, so
    /// replays are idempotent on both sides.
    pub async fn send_reaction(
        &self,
        chat_id: &str,
        target_message_id: &str,
        emoji: &str,
    ) -> Result<String> {
        let identity = self.require_identity("send_reaction")?;
        let chat = self.accepted_chat(chat_id)?;

        let reaction_id = Uuid::new_v4().to_string();
        let payload = InnerPayload::Reaction {
            message_id: target_message_id.to_string(),
            emoji: emoji.to_string(),
        };
        self.send_payload(&chat, &reaction_id, &payload).await?;

        {
            let mut guard = self.lock()?;
            guard.store.put_reaction(&Reaction {
                id: reaction_id.clone(),
                message_id: target_message_id.to_string(),
                from: identity.chat_key(),
                emoji: emoji.to_string(),
                timestamp: Utc::now(),
            })?;
        }
        Ok(reaction_id)
    }

    /// Edit one of our own messages in place; the id stays stable.
    pub async fn edit_message(
        &self,
        chat_id: &str,
        target_message_id: &str,
        new_body: &str,
    ) -> Result<()> {
        let identity = self.require_identity("edit_message")?;
        let chat = self.accepted_chat(chat_id)?;

        let mut target = {
            let guard = self.lock()?;
            guard
                .store
                .message(target_message_id)?
                .ok_or_else(|| EngineError::UnknownMessage(target_message_id.to_string()))?
        };
        if target.from != identity.chat_key() {
            return Err(EngineError::UnknownMessage(target_message_id.to_string()));
        }

        let envelope_id = Uuid::new_v4().to_string();
        let payload = InnerPayload::Edit {
            message_id: target_message_id.to_string(),
            body: new_body.to_string(),
        };
        self.send_payload(&chat, &envelope_id, &payload).await?;

        target.body = new_body.to_string();
        target.edited = true;
        {
            let mut guard = self.lock()?;
            guard.store.put_message(&target)?;
        }
        self.emit(EngineEvent::MessageEdited {
            chat_id: chat_id.to_string(),
            message_id: target_message_id.to_string(),
        });
        Ok(())
    }

    /// Delete one of our own messages: body is wiped, the tombstone stays.
    pub async fn delete_message(&self, chat_id: &str, target_message_id: &str) -> Result<()> {
        let identity = self.require_identity("delete_message")?;
        let chat = self.accepted_chat(chat_id)?;

        let mut target = {
            let guard = self.lock()?;
            guard
                .store
                .message(target_message_id)?
                .ok_or_else(|| EngineError::UnknownMessage(target_message_id.to_string()))?
        };
        if target.from != identity.chat_key() {
            return Err(EngineError::UnknownMessage(target_message_id.to_string()));
        }

        let envelope_id = Uuid::new_v4().to_string();
        let payload = InnerPayload::Delete {
            message_id: target_message_id.to_string(),
        };
        self.send_payload(&chat, &envelope_id, &payload).await?;

        target.deleted = true;
        target.body = String::new();
        {
            let mut guard = self.lock()?;
            guard.store.put_message(&target)?;
        }
        self.emit(EngineEvent::MessageDeleted {
            chat_id: chat_id.to_string(),
            message_id: target_message_id.to_string(),
        });
        Ok(())
    }

    /// Broadcast a transient typing indicator. Nothing is persisted.
    pub async fn set_typing(&self, chat_id: &str, is_typing: bool) -> Result<()> {
        self.require_identity("set_typing")?;
        let chat = self.accepted_chat(chat_id)?;

        let envelope_id = Uuid::new_v4().to_string();
        self.send_payload(&chat, &envelope_id, &InnerPayload::Typing { is_typing })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Sealing
    // -----------------------------------------------------------------

    /// Seal and publish an inner payload for a chat, advancing the ratchet
    /// once per recipient. Advanced sessions are persisted with the
    /// publish. Returns the DM wire counter (groups carry one per sealed
    /// entry instead).
    pub(crate) async fn send_payload(
        &self,
        chat: &Chat,
        message_id: &str,
        payload: &InnerPayload,
    ) -> Result<Option<u64>> {
        let identity = self.require_identity("send_payload")?;
        let me = identity.chat_key();
        let plain = payload.encode()?;

        match chat.kind {
            ConversationKind::Dm => {
                let peer = other_participant(&chat.participants, &me);
                let (session, mk, n) = {
                    let mut guard = self.lock()?;
                    let mut session = Self::ensure_session(
                        &mut guard,
                        &identity,
                        &chat.id,
                        ConversationKind::Dm,
                        &peer,
                    )?;
                    let (mk, n) = session.advance_send();
                    (session, mk, n)
                };

                let nonce = crypto::random_nonce();
                let ciphertext = crypto::secretbox_seal(&plain, &nonce, &mk)?;
                let envelope = Envelope::new(EnvelopeBody::DmMessage {
                    conversation_id: chat.id.clone(),
                    message_id: message_id.to_string(),
                    from_pub_key: me,
                    n,
                    nonce: encoding::encode_b64(&nonce),
                    ciphertext: encoding::encode_b64(&ciphertext),
                });
                self.publish(&topics::dm_topic(&chat.id), &envelope).await?;

                {
                    let mut guard = self.lock()?;
                    guard.store.put_session(&session)?;
                }
                debug!(chat_id = %chat.id, n, "dm payload sealed");
                Ok(Some(n))
            }
            ConversationKind::Group => {
                let mut advanced = Vec::new();
                let mut sealed = Vec::new();
                {
                    let mut guard = self.lock()?;
                    for member in &chat.participants {
                        if member == &me {
                            continue;
                        }
                        let session_id = topics::group_session_id(&chat.id, &me, member);
                        let mut session = Self::ensure_session(
                            &mut guard,
                            &identity,
                            &session_id,
                            ConversationKind::Group,
                            member,
                        )?;
                        let (mk, n) = session.advance_send();
                        advanced.push(session);
                        sealed.push((member.clone(), mk, n));
                    }
                }

                let sealed: Vec<SealedRecipient> = sealed
                    .into_iter()
                    .map(|(member, mk, n)| {
                        let nonce = crypto::random_nonce();
                        let ciphertext = crypto::secretbox_seal(&plain, &nonce, &mk)?;
                        Ok(SealedRecipient {
                            to_pub_key: member,
                            n,
                            nonce: encoding::encode_b64(&nonce),
                            ciphertext: encoding::encode_b64(&ciphertext),
                        })
                    })
                    .collect::<Result<_>>()?;

                let envelope = Envelope::new(EnvelopeBody::GroupMessage {
                    group_id: chat.id.clone(),
                    message_id: message_id.to_string(),
                    from_pub_key: me,
                    sealed,
                });
                self.publish(&topics::group_topic(&chat.id), &envelope)
                    .await?;

                {
                    let mut guard = self.lock()?;
                    for session in &advanced {
                        guard.store.put_session(session)?;
                    }
                }
                debug!(chat_id = %chat.id, recipients = advanced.len(), "group payload sealed");
                Ok(None)
            }
        }
    }

    fn accepted_chat(&self, chat_id: &str) -> Result<Chat> {
        let chat = self
            .chat(chat_id)?
            .ok_or_else(|| EngineError::UnknownChat(chat_id.to_string()))?;
        if !chat.accepted {
            return Err(EngineError::ChatNotAccepted(chat_id.to_string()));
        }
        Ok(chat)
    }
}
