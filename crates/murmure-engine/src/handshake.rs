//! Request/accept handshake state machine.
//!
//! Per remote peer the local Request record walks
//! `none → pending → accepted | declined | blocked`; declined and blocked
//! are terminal, accepted brings a Chat into existence on both sides.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use murmure_shared::protocol::{Envelope, EnvelopeBody};
use murmure_shared::ratchet::ConversationKind;
use murmure_shared::{crypto, encoding, topics};
use murmure_store::{
    Chat, Message, Request, RequestKind, RequestState, RequestStatus,
};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;

/// Shown in place of an intro that failed to open.
pub(crate) const UNREADABLE_INTRO: &str = "[déchiffrement impossible]";

impl Engine {
    /// Send a chat request with a sealed intro to a peer's inbox. Returns
    /// the generated request id.
    pub async fn send_chat_request(&self, peer_chat_key: &str, intro: &str) -> Result<String> {
        let identity = self.require_identity("send_chat_request")?;
        let peer_public = encoding::decode_chat_key(peer_chat_key)?;

        let request_id = Uuid::new_v4().to_string();
        let nonce = crypto::random_nonce();
        let ciphertext = crypto::box_seal(
            intro.as_bytes(),
            &nonce,
            &peer_public,
            identity.secret_bytes(),
        )?;

        let envelope = Envelope::new(EnvelopeBody::ChatRequest {
            request_id: request_id.clone(),
            from_pub_key: identity.chat_key(),
            to_pub_key: peer_chat_key.to_string(),
            nonce: encoding::encode_b64(&nonce),
            ciphertext: encoding::encode_b64(&ciphertext),
        });
        self.publish_to_inbox(peer_chat_key, &envelope).await?;

        let request = Request {
            id: request_id.clone(),
            kind: RequestKind::Dm,
            from: identity.chat_key(),
            to: peer_chat_key.to_string(),
            intro: intro.to_string(),
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            group_id: None,
            group_name: None,
            members: None,
        };

        {
            let mut guard = self.lock()?;
            guard.store.put_request(&request)?;
            guard.store.put_request_state(&RequestState {
                request_id: request_id.clone(),
                status: RequestStatus::Pending,
                updated_at: Utc::now(),
            })?;
            Self::remember_peer(&mut guard, peer_chat_key)?;
        }

        info!(request_id = %request_id, to = %peer_chat_key, "chat request sent");
        Ok(request_id)
    }

    /// Answer a pending inbound request. On accept the chat is created, its
    /// topic subscribed and the session seeded.
    pub async fn respond_to_request(
        &self,
        request_id: &str,
        status: RequestStatus,
    ) -> Result<()> {
        if status == RequestStatus::Pending {
            return Err(EngineError::RequestAnswered(request_id.to_string()));
        }
        let identity = self.require_identity("respond_to_request")?;

        let mut request = {
            let guard = self.lock()?;
            guard
                .store
                .request(request_id)?
                .ok_or_else(|| EngineError::UnknownRequest(request_id.to_string()))?
        };
        if request.status != RequestStatus::Pending {
            return Err(EngineError::RequestAnswered(request_id.to_string()));
        }

        let peer = request.from.clone();
        let cid = topics::conversation_id(&identity.chat_key(), &peer);

        let body = match status {
            RequestStatus::Accepted => EnvelopeBody::ChatAccept {
                request_id: request_id.to_string(),
                from_pub_key: identity.chat_key(),
                to_pub_key: peer.clone(),
                conversation_id: cid.clone(),
            },
            RequestStatus::Declined => EnvelopeBody::ChatDeclined {
                request_id: request_id.to_string(),
                from_pub_key: identity.chat_key(),
                to_pub_key: peer.clone(),
                conversation_id: cid.clone(),
            },
            RequestStatus::Blocked => EnvelopeBody::ChatBlocked {
                request_id: request_id.to_string(),
                from_pub_key: identity.chat_key(),
                to_pub_key: peer.clone(),
                conversation_id: cid.clone(),
            },
            RequestStatus::Pending => unreachable!("rejected above"),
        };
        self.publish_to_inbox(&peer, &Envelope::new(body)).await?;

        request.status = status;
        {
            let mut guard = self.lock()?;
            guard.store.put_request(&request)?;
        }

        if status == RequestStatus::Accepted {
            self.create_dm_chat(&identity.chat_key(), &peer, &cid)?;
            self.subscribe(&topics::dm_topic(&cid)).await?;
            {
                let mut guard = self.lock()?;
                Self::ensure_session(
                    &mut guard,
                    &identity,
                    &cid,
                    ConversationKind::Dm,
                    &peer,
                )?;
                guard
                    .store
                    .put_message(&Message::system(&cid, &peer, &request.intro))?;
            }
            self.emit(EngineEvent::ChatCreated {
                chat_id: cid.clone(),
            });
        }

        self.emit(EngineEvent::RequestAnswered {
            request_id: request_id.to_string(),
            status,
        });
        info!(request_id = %request_id, status = ?status, "request answered");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Inbound side
    // -----------------------------------------------------------------

    pub(crate) async fn on_chat_request(
        &self,
        request_id: String,
        from: String,
        nonce: String,
        ciphertext: String,
    ) {
        let Ok(identity) = self.require_identity("on_chat_request") else {
            return;
        };
        if from == identity.chat_key() {
            return;
        }
        let cid = topics::conversation_id(&identity.chat_key(), &from);

        // An accepted chat already covering this pair means our original
        // accept was probably missed; re-emit it instead of re-pending.
        let (accepted_chat, blocked, duplicate) = {
            let guard = match self.lock() {
                Ok(g) => g,
                Err(_) => return,
            };
            let accepted = matches!(guard.store.chat(&cid), Ok(Some(ref c)) if c.accepted);
            let blocked = guard
                .store
                .requests()
                .map(|all| {
                    all.iter()
                        .any(|r| r.from == from && r.status == RequestStatus::Blocked)
                })
                .unwrap_or(false);
            let duplicate = matches!(guard.store.request(&request_id), Ok(Some(_)));
            (accepted, blocked, duplicate)
        };

        if accepted_chat {
            debug!(from = %from, "duplicate chat request for accepted chat, re-emitting accept");
            let envelope = Envelope::new(EnvelopeBody::ChatAccept {
                request_id,
                from_pub_key: identity.chat_key(),
                to_pub_key: from.clone(),
                conversation_id: cid,
            });
            let _ = self.publish_to_inbox(&from, &envelope).await;
            return;
        }

        if blocked {
            debug!(from = %from, "chat request from blocked peer");
            let envelope = Envelope::new(EnvelopeBody::ChatBlocked {
                request_id,
                from_pub_key: identity.chat_key(),
                to_pub_key: from.clone(),
                conversation_id: cid,
            });
            let _ = self.publish_to_inbox(&from, &envelope).await;
            return;
        }

        if duplicate {
            return;
        }

        let intro = encoding::decode_chat_key(&from)
            .ok()
            .and_then(|peer_public| {
                let nonce: [u8; 24] = encoding::decode_b64(&nonce).ok()?.try_into().ok()?;
                let ciphertext = encoding::decode_b64(&ciphertext).ok()?;
                crypto::box_open(&ciphertext, &nonce, &peer_public, identity.secret_bytes()).ok()
            })
            .and_then(|plain| String::from_utf8(plain).ok())
            .unwrap_or_else(|| UNREADABLE_INTRO.to_string());

        let request = Request {
            id: request_id.clone(),
            kind: RequestKind::Dm,
            from: from.clone(),
            to: identity.chat_key(),
            intro,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            group_id: None,
            group_name: None,
            members: None,
        };
        {
            let Ok(mut guard) = self.lock() else { return };
            if guard.store.put_request(&request).is_err() {
                return;
            }
            let _ = Self::remember_peer(&mut guard, &from);
        }

        info!(request_id = %request_id, from = %from, "chat request received");
        self.emit(EngineEvent::RequestReceived { request_id, from });
    }

    pub(crate) async fn on_chat_accept(&self, request_id: String, from: String) {
        let Ok(identity) = self.require_identity("on_chat_accept") else {
            return;
        };
        let cid = topics::conversation_id(&identity.chat_key(), &from);

        let chat_existed = matches!(self.chat(&cid), Ok(Some(_)));
        if self.create_dm_chat(&identity.chat_key(), &from, &cid).is_err() {
            return;
        }
        let _ = self.subscribe(&topics::dm_topic(&cid)).await;

        {
            let Ok(mut guard) = self.lock() else { return };
            if Self::ensure_session(&mut guard, &identity, &cid, ConversationKind::Dm, &from)
                .is_err()
            {
                return;
            }
            if let Ok(Some(mut request)) = guard.store.request(&request_id) {
                if request.status == RequestStatus::Pending {
                    request.status = RequestStatus::Accepted;
                    let _ = guard.store.put_request(&request);
                }
            }
            let _ = guard.store.put_request_state(&RequestState {
                request_id: request_id.clone(),
                status: RequestStatus::Accepted,
                updated_at: Utc::now(),
            });
            if !chat_existed {
                let _ = guard
                    .store
                    .put_message(&Message::system(&cid, &from, "Chat request accepted."));
            }
        }

        info!(request_id = %request_id, from = %from, "chat request accepted by peer");
        if !chat_existed {
            self.emit(EngineEvent::ChatCreated { chat_id: cid });
        }
        self.emit(EngineEvent::RequestAnswered {
            request_id,
            status: RequestStatus::Accepted,
        });
    }

    pub(crate) fn on_chat_refusal(&self, request_id: String, status: RequestStatus) {
        let Ok(mut guard) = self.lock() else { return };
        if let Ok(Some(mut request)) = guard.store.request(&request_id) {
            if request.status == RequestStatus::Pending {
                request.status = status;
                let _ = guard.store.put_request(&request);
            }
        }
        let _ = guard.store.put_request_state(&RequestState {
            request_id: request_id.clone(),
            status,
            updated_at: Utc::now(),
        });
        drop(guard);

        info!(request_id = %request_id, status = ?status, "request refused by peer");
        self.emit(EngineEvent::RequestAnswered { request_id, status });
    }

    /// Create (or keep) the DM chat for a conversation pair.
    fn create_dm_chat(&self, me: &str, peer: &str, cid: &str) -> Result<()> {
        let mut guard = self.lock()?;
        if guard.store.chat(cid)?.is_some() {
            return Ok(());
        }
        let chat = Chat {
            id: cid.to_string(),
            kind: ConversationKind::Dm,
            title: peer.to_string(),
            participants: [me.to_string(), peer.to_string()].into_iter().collect(),
            accepted: true,
            created_at: Utc::now(),
            last_message_at: None,
            unread_count: 0,
        };
        guard.store.put_chat(&chat)?;
        Self::remember_peer(&mut guard, peer)?;
        Ok(())
    }
}
