//! Inbound pipeline: parse envelope, dispatch, decrypt, apply, acknowledge.
//!
//! Nothing in here can take the engine down. Malformed payloads are
//! adversarial-plausible on a public gossip network and get dropped with a
//! debug log; decrypt failures surface as key-mismatch system messages in
//! the affected chat; everything else is absorbed locally.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use murmure_shared::protocol::{Envelope, EnvelopeBody, InnerPayload, SealedRecipient};
use murmure_shared::ratchet::ConversationKind;
use murmure_shared::{crypto, encoding, topics};
use murmure_store::{
    Attachment, Message, MessageKind, MessageStatus, Reaction, RequestStatus,
};

use crate::engine::Engine;
use crate::events::EngineEvent;

const KEY_MISMATCH_TEXT: &str = "Key mismatch. Rekey to continue.";
const PEER_REKEYED_TEXT: &str = "Session rekeyed by peer.";

impl Engine {
    /// Entry point for every transport delivery.
    pub async fn handle_inbound(&self, topic: &str, data: &[u8]) {
        let envelope = match Envelope::decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(topic = %topic, error = %e, "dropping undecodable envelope");
                return;
            }
        };

        if !self.is_unlocked() {
            debug!(topic = %topic, "identity locked, ignoring inbound envelope");
            return;
        }

        let timestamp = envelope.timestamp;
        match envelope.body {
            EnvelopeBody::ChatRequest {
                request_id,
                from_pub_key,
                nonce,
                ciphertext,
                ..
            } => {
                self.on_chat_request(request_id, from_pub_key, nonce, ciphertext)
                    .await;
            }
            EnvelopeBody::ChatAccept {
                request_id,
                from_pub_key,
                ..
            } => {
                self.on_chat_accept(request_id, from_pub_key).await;
            }
            EnvelopeBody::ChatDeclined { request_id, .. } => {
                self.on_chat_refusal(request_id, RequestStatus::Declined);
            }
            EnvelopeBody::ChatBlocked { request_id, .. } => {
                self.on_chat_refusal(request_id, RequestStatus::Blocked);
            }
            EnvelopeBody::GroupInvite {
                from_pub_key,
                nonce,
                ciphertext,
                ..
            } => {
                self.on_group_invite(from_pub_key, nonce, ciphertext);
            }
            EnvelopeBody::GroupAccepted {
                group_id,
                from_pub_key,
                ..
            } => {
                self.on_group_response(group_id, from_pub_key, RequestStatus::Accepted);
            }
            EnvelopeBody::GroupDeclined {
                group_id,
                from_pub_key,
                ..
            } => {
                self.on_group_response(group_id, from_pub_key, RequestStatus::Declined);
            }
            EnvelopeBody::GroupBlocked {
                group_id,
                from_pub_key,
                ..
            } => {
                self.on_group_response(group_id, from_pub_key, RequestStatus::Blocked);
            }
            EnvelopeBody::DmAck {
                message_id,
                conversation_id,
                ..
            } => {
                self.on_dm_ack(conversation_id, message_id);
            }
            EnvelopeBody::DmMessage {
                conversation_id,
                message_id,
                from_pub_key,
                n,
                nonce,
                ciphertext,
            } => {
                self.handle_encrypted_message(
                    conversation_id,
                    message_id,
                    from_pub_key,
                    n,
                    nonce,
                    ciphertext,
                    timestamp,
                )
                .await;
            }
            EnvelopeBody::GroupMessage {
                group_id,
                message_id,
                from_pub_key,
                sealed,
            } => {
                self.handle_group_message(group_id, message_id, from_pub_key, sealed, timestamp)
                    .await;
            }
        }
    }

    fn on_dm_ack(&self, chat_id: String, message_id: String) {
        let Ok(mut guard) = self.lock() else { return };
        let Ok(Some(mut message)) = guard.store.message(&message_id) else {
            return;
        };
        if message.status == Some(MessageStatus::Delivered) {
            return;
        }
        message.status = Some(MessageStatus::Delivered);
        if guard.store.put_message(&message).is_err() {
            return;
        }
        drop(guard);

        debug!(message_id = %message_id, "message acknowledged");
        self.emit(EngineEvent::MessageDelivered {
            chat_id,
            message_id,
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_encrypted_message(
        &self,
        conversation_id: String,
        message_id: String,
        from: String,
        n: u64,
        nonce: String,
        ciphertext: String,
        timestamp: i64,
    ) {
        let Ok(identity) = self.require_identity("handle_encrypted_message") else {
            return;
        };
        // Own envelopes echo back through the gossip mesh.
        if from == identity.chat_key() {
            return;
        }
        // The mesh also redelivers; a replayed envelope must never reach
        // the ratchet, where its consumed counter reads as a key mismatch.
        {
            let Ok(guard) = self.lock() else { return };
            if guard.seen_envelopes.contains(&conversation_id, &message_id) {
                debug!(conversation_id = %conversation_id, message_id = %message_id,
                    "dropping redelivered dm envelope");
                return;
            }
        }

        let (Ok(nonce), Ok(ciphertext)) =
            (encoding::decode_b64(&nonce), encoding::decode_b64(&ciphertext))
        else {
            debug!(conversation_id = %conversation_id, "dropping dm with malformed base64");
            return;
        };
        let Ok(nonce) = <[u8; 24]>::try_from(nonce) else {
            debug!(conversation_id = %conversation_id, "dropping dm with bad nonce length");
            return;
        };

        // Advance a copy of the session; nothing is persisted until the
        // payload actually opened.
        let session = {
            let Ok(mut guard) = self.lock() else { return };
            match Self::ensure_session(
                &mut guard,
                &identity,
                &conversation_id,
                ConversationKind::Dm,
                &from,
            ) {
                Ok(session) => session,
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "session unavailable");
                    return;
                }
            }
        };

        let mut advanced = session.clone();
        let Some(key) = advanced.receive_key(n) else {
            info!(conversation_id = %conversation_id, n, "no receive key, surfacing key mismatch");
            self.key_mismatch(&conversation_id, &from);
            return;
        };

        let plain = match crypto::secretbox_open(&ciphertext, &nonce, &key) {
            Ok(plain) => plain,
            Err(_) => {
                info!(conversation_id = %conversation_id, n, "secretbox open failed");
                self.key_mismatch(&conversation_id, &from);
                return;
            }
        };
        let payload = match InnerPayload::decode(&plain) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(conversation_id = %conversation_id, error = %e, "undecodable inner payload");
                return;
            }
        };

        {
            let Ok(mut guard) = self.lock() else { return };
            if guard.store.put_session(&advanced).is_err() {
                return;
            }
            guard.seen_envelopes.insert(&conversation_id, &message_id);
        }

        let ack = Envelope::new(EnvelopeBody::DmAck {
            conversation_id: conversation_id.clone(),
            message_id: message_id.clone(),
            from_pub_key: identity.chat_key(),
            to_pub_key: from.clone(),
        });
        if let Err(e) = self.publish_to_inbox(&from, &ack).await {
            warn!(conversation_id = %conversation_id, error = %e, "failed to emit ack");
        }

        self.apply_inner(&conversation_id, &message_id, &from, payload, timestamp)
            .await;
    }

    async fn handle_group_message(
        &self,
        group_id: String,
        message_id: String,
        from: String,
        sealed: Vec<SealedRecipient>,
        timestamp: i64,
    ) {
        let Ok(identity) = self.require_identity("handle_group_message") else {
            return;
        };
        let me = identity.chat_key();
        if from == me {
            return;
        }
        // The mesh may deliver the same envelope more than once. Keyed on
        // the envelope id itself: a messages-table lookup would only cover
        // payload kinds that store a row under that id.
        {
            let Ok(guard) = self.lock() else { return };
            if guard.seen_envelopes.contains(&group_id, &message_id) {
                debug!(group_id = %group_id, message_id = %message_id,
                    "dropping redelivered group envelope");
                return;
            }
        }

        let Some(entry) = sealed.into_iter().find(|s| s.to_pub_key == me) else {
            debug!(group_id = %group_id, "no sealed entry addressed to us");
            return;
        };

        let (Ok(nonce), Ok(ciphertext)) = (
            encoding::decode_b64(&entry.nonce),
            encoding::decode_b64(&entry.ciphertext),
        ) else {
            debug!(group_id = %group_id, "dropping group message with malformed base64");
            return;
        };
        let Ok(nonce) = <[u8; 24]>::try_from(nonce) else {
            return;
        };

        let session_id = topics::group_session_id(&group_id, &me, &from);
        let session = {
            let Ok(mut guard) = self.lock() else { return };
            match Self::ensure_session(
                &mut guard,
                &identity,
                &session_id,
                ConversationKind::Group,
                &from,
            ) {
                Ok(session) => session,
                Err(e) => {
                    warn!(group_id = %group_id, error = %e, "pairwise session unavailable");
                    return;
                }
            }
        };

        let mut advanced = session.clone();
        let Some(key) = advanced.receive_key(entry.n) else {
            info!(group_id = %group_id, n = entry.n, "no receive key for group message");
            self.key_mismatch(&group_id, &from);
            return;
        };

        let plain = match crypto::secretbox_open(&ciphertext, &nonce, &key) {
            Ok(plain) => plain,
            Err(_) => {
                info!(group_id = %group_id, n = entry.n, "group secretbox open failed");
                self.key_mismatch(&group_id, &from);
                return;
            }
        };
        let payload = match InnerPayload::decode(&plain) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(group_id = %group_id, error = %e, "undecodable group inner payload");
                return;
            }
        };

        {
            let Ok(mut guard) = self.lock() else { return };
            if guard.store.put_session(&advanced).is_err() {
                return;
            }
            guard.seen_envelopes.insert(&group_id, &message_id);
        }

        // No acks for groups.
        self.apply_inner(&group_id, &message_id, &from, payload, timestamp)
            .await;
    }

    /// Apply a decrypted inner payload against a chat.
    async fn apply_inner(
        &self,
        chat_id: &str,
        message_id: &str,
        from: &str,
        payload: InnerPayload,
        timestamp: i64,
    ) {
        let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp).unwrap_or_else(Utc::now);

        match payload {
            InnerPayload::Text { body, reply_to } => {
                let message = Message {
                    id: message_id.to_string(),
                    chat_id: chat_id.to_string(),
                    kind: MessageKind::Text,
                    from: from.to_string(),
                    body,
                    timestamp,
                    status: Some(MessageStatus::Delivered),
                    n: None,
                    reply_to,
                    edited: false,
                    deleted: false,
                    key_mismatch: false,
                    attachment_id: None,
                };
                {
                    let Ok(mut guard) = self.lock() else { return };
                    if matches!(guard.store.message(message_id), Ok(Some(_))) {
                        return;
                    }
                    if guard.store.put_message(&message).is_err() {
                        return;
                    }
                    let _ = Self::touch_chat(&mut guard, chat_id, timestamp);
                }
                self.emit(EngineEvent::MessageReceived {
                    chat_id: chat_id.to_string(),
                    message_id: message_id.to_string(),
                });
            }

            InnerPayload::Reaction {
                message_id: target,
                emoji,
            } => {
                {
                    let Ok(mut guard) = self.lock() else { return };
                    // The envelope id is the reaction id; replays no-op.
                    if matches!(guard.store.reaction(message_id), Ok(Some(_))) {
                        return;
                    }
                    let reaction = Reaction {
                        id: message_id.to_string(),
                        message_id: target.clone(),
                        from: from.to_string(),
                        emoji: emoji.clone(),
                        timestamp,
                    };
                    if guard.store.put_reaction(&reaction).is_err() {
                        return;
                    }
                }
                self.emit(EngineEvent::ReactionAdded {
                    chat_id: chat_id.to_string(),
                    message_id: target,
                    emoji,
                });
            }

            InnerPayload::Edit {
                message_id: target,
                body,
            } => {
                let Ok(mut guard) = self.lock() else { return };
                // Edits for not-yet-seen targets are dropped.
                let Ok(Some(mut message)) = guard.store.message(&target) else {
                    return;
                };
                if message.from != from || message.deleted {
                    return;
                }
                message.body = body;
                message.edited = true;
                if guard.store.put_message(&message).is_err() {
                    return;
                }
                drop(guard);
                self.emit(EngineEvent::MessageEdited {
                    chat_id: chat_id.to_string(),
                    message_id: target,
                });
            }

            InnerPayload::Delete { message_id: target } => {
                let Ok(mut guard) = self.lock() else { return };
                let Ok(Some(mut message)) = guard.store.message(&target) else {
                    return;
                };
                if message.from != from {
                    return;
                }
                message.deleted = true;
                message.body = String::new();
                if guard.store.put_message(&message).is_err() {
                    return;
                }
                drop(guard);
                self.emit(EngineEvent::MessageDeleted {
                    chat_id: chat_id.to_string(),
                    message_id: target,
                });
            }

            InnerPayload::Typing { is_typing } => {
                {
                    let Ok(mut guard) = self.lock() else { return };
                    guard
                        .typing
                        .insert((chat_id.to_string(), from.to_string()), is_typing);
                }
                self.emit(EngineEvent::Typing {
                    chat_id: chat_id.to_string(),
                    from: from.to_string(),
                    is_typing,
                });
            }

            InnerPayload::AttachmentMeta {
                attachment_id,
                name,
                mime,
                size,
                total_chunks,
            } => {
                let attachment = Attachment {
                    id: attachment_id.clone(),
                    message_id: message_id.to_string(),
                    name: name.clone(),
                    mime,
                    size,
                    total_chunks,
                    received_chunks: 0,
                    chunks: Default::default(),
                    complete: false,
                    data: None,
                };
                let message = Message {
                    id: message_id.to_string(),
                    chat_id: chat_id.to_string(),
                    kind: MessageKind::AttachmentMeta,
                    from: from.to_string(),
                    body: name,
                    timestamp,
                    status: Some(MessageStatus::Delivered),
                    n: None,
                    reply_to: None,
                    edited: false,
                    deleted: false,
                    key_mismatch: false,
                    attachment_id: Some(attachment_id.clone()),
                };
                {
                    let Ok(mut guard) = self.lock() else { return };
                    if matches!(guard.store.attachment(&attachment_id), Ok(Some(_))) {
                        return;
                    }
                    if guard.store.put_attachment(&attachment).is_err() {
                        return;
                    }
                    let _ = guard.store.put_message(&message);
                    let _ = Self::touch_chat(&mut guard, chat_id, timestamp);
                }
                self.emit(EngineEvent::MessageReceived {
                    chat_id: chat_id.to_string(),
                    message_id: message_id.to_string(),
                });
                self.emit(EngineEvent::AttachmentProgress {
                    attachment_id,
                    received: 0,
                    total: total_chunks,
                });
            }

            InnerPayload::AttachmentChunk {
                attachment_id,
                index,
                total_chunks,
                data,
            } => {
                self.apply_attachment_chunk(&attachment_id, index, total_chunks, data);
            }

            InnerPayload::Rekey => {
                let Ok(identity) = self.require_identity("apply_rekey") else {
                    return;
                };
                {
                    let Ok(mut guard) = self.lock() else { return };
                    let kind = guard
                        .store
                        .chat(chat_id)
                        .ok()
                        .flatten()
                        .map(|c| c.kind)
                        .unwrap_or(ConversationKind::Dm);
                    let session_id = match kind {
                        ConversationKind::Dm => chat_id.to_string(),
                        ConversationKind::Group => {
                            topics::group_session_id(chat_id, &identity.chat_key(), from)
                        }
                    };
                    if Self::reset_session(&mut guard, &identity, &session_id, kind, from).is_err()
                    {
                        return;
                    }
                    let _ = guard
                        .store
                        .put_message(&Message::system(chat_id, from, PEER_REKEYED_TEXT));
                }
                info!(chat_id = %chat_id, from = %from, "peer rekeyed session");
                self.emit(EngineEvent::SessionRekeyed {
                    chat_id: chat_id.to_string(),
                });
            }
        }
    }

    /// Append the "key mismatch" system message and surface the event. The
    /// failed envelope is not acked and the ratchet is left untouched.
    fn key_mismatch(&self, chat_id: &str, from: &str) {
        {
            let Ok(mut guard) = self.lock() else { return };
            let mut message = Message::system(chat_id, from, KEY_MISMATCH_TEXT);
            message.key_mismatch = true;
            if guard.store.put_message(&message).is_err() {
                return;
            }
        }
        self.emit(EngineEvent::KeyMismatch {
            chat_id: chat_id.to_string(),
        });
    }

    fn touch_chat(
        guard: &mut crate::state::EngineInner,
        chat_id: &str,
        timestamp: DateTime<Utc>,
    ) -> crate::error::Result<()> {
        if let Some(mut chat) = guard.store.chat(chat_id)? {
            chat.last_message_at = Some(timestamp);
            if guard.active_chat.as_deref() != Some(chat_id) {
                chat.unread_count += 1;
            }
            guard.store.put_chat(&chat)?;
        }
        Ok(())
    }
}
