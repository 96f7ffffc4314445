//! Session lookup, seeding and rekey.

use tracing::info;
use uuid::Uuid;

use murmure_shared::identity::Identity;
use murmure_shared::protocol::InnerPayload;
use murmure_shared::ratchet::{ConversationKind, Session};
use murmure_shared::topics;
use murmure_store::Message;

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::state::EngineInner;

impl Engine {
    /// Fetch the session for `session_id`, seeding it from the long-term DH
    /// agreement when absent. Sessions are created lazily on first use.
    pub(crate) fn ensure_session(
        guard: &mut EngineInner,
        identity: &Identity,
        session_id: &str,
        kind: ConversationKind,
        peer: &str,
    ) -> Result<Session> {
        if let Some(session) = guard.store.session(session_id)? {
            return Ok(session);
        }
        let session = Session::seed(
            session_id,
            kind,
            identity.secret_bytes(),
            &identity.chat_key(),
            peer,
        )?;
        guard.store.put_session(&session)?;
        Ok(session)
    }

    /// Overwrite a session with a fresh DH-seeded state: counters back to
    /// zero, skipped-key cache cleared.
    pub(crate) fn reset_session(
        guard: &mut EngineInner,
        identity: &Identity,
        session_id: &str,
        kind: ConversationKind,
        peer: &str,
    ) -> Result<Session> {
        let session = Session::seed(
            session_id,
            kind,
            identity.secret_bytes(),
            &identity.chat_key(),
            peer,
        )?;
        guard.store.put_session(&session)?;
        Ok(session)
    }

    /// User-triggered rekey after a key mismatch.
    ///
    /// The `rekey` payload goes out sealed under the old send chain — one
    /// last advance the peer can still decrypt — and only then is the local
    /// session rebuilt from the DH seed. The peer resets on apply, after
    /// which both chains are aligned at counter zero.
    pub async fn rekey_session(&self, chat_id: &str) -> Result<()> {
        let identity = self.require_identity("rekey_session")?;
        let chat = self
            .chat(chat_id)?
            .ok_or_else(|| EngineError::UnknownChat(chat_id.to_string()))?;

        let message_id = Uuid::new_v4().to_string();
        self.send_payload(&chat, &message_id, &InnerPayload::Rekey)
            .await?;

        {
            let mut guard = self.lock()?;
            match chat.kind {
                ConversationKind::Dm => {
                    let peer = other_participant(&chat.participants, &identity.chat_key());
                    Self::reset_session(
                        &mut guard,
                        &identity,
                        chat_id,
                        ConversationKind::Dm,
                        &peer,
                    )?;
                }
                ConversationKind::Group => {
                    for member in &chat.participants {
                        if member == &identity.chat_key() {
                            continue;
                        }
                        let session_id =
                            topics::group_session_id(chat_id, &identity.chat_key(), member);
                        Self::reset_session(
                            &mut guard,
                            &identity,
                            &session_id,
                            ConversationKind::Group,
                            member,
                        )?;
                    }
                }
            }
            guard
                .store
                .put_message(&Message::system(chat_id, &identity.chat_key(), "Session rekeyed."))?;
        }

        info!(chat_id = %chat_id, "session rekeyed");
        self.emit(EngineEvent::SessionRekeyed {
            chat_id: chat_id.to_string(),
        });
        Ok(())
    }
}

/// The peer side of a two-participant chat.
pub(crate) fn other_participant(
    participants: &std::collections::BTreeSet<String>,
    me: &str,
) -> String {
    participants
        .iter()
        .find(|p| p.as_str() != me)
        .cloned()
        .unwrap_or_default()
}
