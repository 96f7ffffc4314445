//! Group creation and invite handshake.
//!
//! A group is a chat whose id is a fresh UUID. The creator seals one
//! `group_invite` per member to that member's inbox; acceptance creates the
//! group chat locally and subscribes the shared group topic. Membership is
//! fixed at invite time; answers are mirrored onto the creator's
//! per-member request-state records.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use murmure_shared::protocol::{Envelope, EnvelopeBody, GroupInviteInfo};
use murmure_shared::ratchet::ConversationKind;
use murmure_shared::{crypto, encoding, topics};
use murmure_store::{Chat, Request, RequestKind, RequestState, RequestStatus};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::handshake::UNREADABLE_INTRO;

impl Engine {
    /// Create a group and invite every listed member. Returns the group id.
    pub async fn create_group(&self, name: &str, members: &[String]) -> Result<String> {
        let identity = self.require_identity("create_group")?;
        let me = identity.chat_key();

        let group_id = Uuid::new_v4().to_string();
        let mut participants: std::collections::BTreeSet<String> =
            members.iter().cloned().collect();
        participants.insert(me.clone());

        let chat = Chat {
            id: group_id.clone(),
            kind: ConversationKind::Group,
            title: name.to_string(),
            participants: participants.clone(),
            accepted: true,
            created_at: Utc::now(),
            last_message_at: None,
            unread_count: 0,
        };
        {
            let mut guard = self.lock()?;
            guard.store.put_chat(&chat)?;
        }
        self.subscribe(&topics::group_topic(&group_id)).await?;

        let info = GroupInviteInfo {
            group_id: group_id.clone(),
            name: name.to_string(),
            members: participants.iter().cloned().collect(),
        };
        let plain = serde_json::to_vec(&info)
            .map_err(murmure_shared::CodecError::from)
            .map_err(EngineError::Codec)?;

        for member in &participants {
            if member == &me {
                continue;
            }
            let member_public = encoding::decode_chat_key(member)?;
            let nonce = crypto::random_nonce();
            let ciphertext =
                crypto::box_seal(&plain, &nonce, &member_public, identity.secret_bytes())?;

            let envelope = Envelope::new(EnvelopeBody::GroupInvite {
                from_pub_key: me.clone(),
                to_pub_key: member.clone(),
                nonce: encoding::encode_b64(&nonce),
                ciphertext: encoding::encode_b64(&ciphertext),
            });
            self.publish_to_inbox(member, &envelope).await?;

            let mut guard = self.lock()?;
            guard.store.put_request_state(&RequestState {
                request_id: format!("{group_id}:{member}"),
                status: RequestStatus::Pending,
                updated_at: Utc::now(),
            })?;
            Self::remember_peer(&mut guard, member)?;
        }

        info!(group_id = %group_id, members = participants.len(), "group created");
        self.emit(EngineEvent::ChatCreated {
            chat_id: group_id.clone(),
        });
        Ok(group_id)
    }

    /// Answer a pending group invite. On accept the group chat is created
    /// and its topic subscribed; pairwise sessions seed lazily on first
    /// message.
    pub async fn respond_to_group_invite(
        &self,
        request_id: &str,
        status: RequestStatus,
    ) -> Result<()> {
        if status == RequestStatus::Pending {
            return Err(EngineError::RequestAnswered(request_id.to_string()));
        }
        let identity = self.require_identity("respond_to_group_invite")?;

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
        let group_id = request
            .group_id
            .clone()
            .ok_or_else(|| EngineError::UnknownRequest(request_id.to_string()))?;

        let creator = request.from.clone();
        let body = match status {
            RequestStatus::Accepted => EnvelopeBody::GroupAccepted {
                request_id: request_id.to_string(),
                group_id: group_id.clone(),
                from_pub_key: identity.chat_key(),
                to_pub_key: creator.clone(),
            },
            RequestStatus::Declined => EnvelopeBody::GroupDeclined {
                request_id: request_id.to_string(),
                group_id: group_id.clone(),
                from_pub_key: identity.chat_key(),
                to_pub_key: creator.clone(),
            },
            RequestStatus::Blocked => EnvelopeBody::GroupBlocked {
                request_id: request_id.to_string(),
                group_id: group_id.clone(),
                from_pub_key: identity.chat_key(),
                to_pub_key: creator.clone(),
            },
            RequestStatus::Pending => unreachable!("rejected above"),
        };
        self.publish_to_inbox(&creator, &Envelope::new(body)).await?;

        request.status = status;
        {
            let mut guard = self.lock()?;
            guard.store.put_request(&request)?;
        }

        if status == RequestStatus::Accepted {
            let chat = Chat {
                id: group_id.clone(),
                kind: ConversationKind::Group,
                title: request.group_name.clone().unwrap_or_default(),
                participants: request
                    .members
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .collect(),
                accepted: true,
                created_at: Utc::now(),
                last_message_at: None,
                unread_count: 0,
            };
            {
                let mut guard = self.lock()?;
                guard.store.put_chat(&chat)?;
            }
            self.subscribe(&topics::group_topic(&group_id)).await?;
            self.emit(EngineEvent::ChatCreated { chat_id: group_id });
        }

        self.emit(EngineEvent::RequestAnswered {
            request_id: request_id.to_string(),
            status,
        });
        Ok(())
    }

    // -----------------------------------------------------------------
    // Inbound side
    // -----------------------------------------------------------------

    pub(crate) fn on_group_invite(&self, from: String, nonce: String, ciphertext: String) {
        let Ok(identity) = self.require_identity("on_group_invite") else {
            return;
        };
        if from == identity.chat_key() {
            return;
        }

        let info = encoding::decode_chat_key(&from)
            .ok()
            .and_then(|peer_public| {
                let nonce: [u8; 24] = encoding::decode_b64(&nonce).ok()?.try_into().ok()?;
                let ciphertext = encoding::decode_b64(&ciphertext).ok()?;
                crypto::box_open(&ciphertext, &nonce, &peer_public, identity.secret_bytes()).ok()
            })
            .and_then(|plain| serde_json::from_slice::<GroupInviteInfo>(&plain).ok());

        // Sealed-box failure still persists a (useless but visible)
        // request so the user sees something arrived.
        let request = match info {
            Some(info) => Request {
                id: format!("{}:{from}", info.group_id),
                kind: RequestKind::Group,
                from: from.clone(),
                to: identity.chat_key(),
                intro: info.name.clone(),
                status: RequestStatus::Pending,
                created_at: Utc::now(),
                group_id: Some(info.group_id),
                group_name: Some(info.name),
                members: Some(info.members),
            },
            None => Request {
                id: Uuid::new_v4().to_string(),
                kind: RequestKind::Group,
                from: from.clone(),
                to: identity.chat_key(),
                intro: UNREADABLE_INTRO.to_string(),
                status: RequestStatus::Pending,
                created_at: Utc::now(),
                group_id: None,
                group_name: None,
                members: None,
            },
        };

        {
            let Ok(mut guard) = self.lock() else { return };
            if matches!(guard.store.request(&request.id), Ok(Some(_))) {
                return;
            }
            if guard.store.put_request(&request).is_err() {
                return;
            }
            let _ = Self::remember_peer(&mut guard, &from);
        }

        info!(request_id = %request.id, from = %from, "group invite received");
        self.emit(EngineEvent::RequestReceived {
            request_id: request.id,
            from,
        });
    }

    /// A member answered one of our invites. Recorded per member; an
    /// accept changes nothing else since membership is fixed at invite
    /// time.
    pub(crate) fn on_group_response(
        &self,
        group_id: String,
        from: String,
        status: RequestStatus,
    ) {
        let key = format!("{group_id}:{from}");
        {
            let Ok(mut guard) = self.lock() else { return };
            let _ = guard.store.put_request_state(&RequestState {
                request_id: key.clone(),
                status,
                updated_at: Utc::now(),
            });
        }
        debug!(group_id = %group_id, from = %from, status = ?status, "group invite answered");
        self.emit(EngineEvent::RequestAnswered {
            request_id: key,
            status,
        });
    }
}
