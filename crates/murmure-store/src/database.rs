//! SQLite-backed implementation of the persistence port.
//!
//! Records are kept as JSON documents in per-store tables so the schema
//! follows the models without per-field migrations; the handful of columns
//! next to the JSON are the keys the engine queries by.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use murmure_shared::identity::SealedIdentity;
use murmure_shared::ratchet::Session;

use crate::error::{Result, StoreError};
use crate::migrations;
use crate::models::{
    Attachment, Chat, Message, Peer, Reaction, Request, RequestState,
};
use crate::store::{Snapshot, Store};

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the default application database in the platform
    /// data directory.
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("org", "murmure", "murmure").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("murmure.db");
        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path. Used by tests and
    /// custom directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    fn get_one<T: DeserializeOwned>(&self, table: &str, key_col: &str, key: &str) -> Result<Option<T>> {
        let sql = format!("SELECT json FROM {table} WHERE {key_col} = ?1");
        let json: Option<String> = self
            .conn
            .query_row(&sql, params![key], |row| row.get(0))
            .optional()?;
        match json {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn get_all<T: DeserializeOwned>(&self, table: &str, order: Option<&str>) -> Result<Vec<T>> {
        let sql = match order {
            Some(clause) => format!("SELECT json FROM {table} ORDER BY {clause}"),
            None => format!("SELECT json FROM {table}"),
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    fn put_keyed<T: Serialize>(&self, table: &str, key_col: &str, key: &str, record: &T) -> Result<()> {
        let sql =
            format!("INSERT OR REPLACE INTO {table} ({key_col}, json) VALUES (?1, ?2)");
        self.conn
            .execute(&sql, params![key, serde_json::to_string(record)?])?;
        Ok(())
    }
}

impl Store for SqliteStore {
    fn identity(&self) -> Result<Option<SealedIdentity>> {
        let json: Option<String> = self
            .conn
            .query_row("SELECT json FROM identity WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        match json {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn put_identity(&mut self, identity: &SealedIdentity) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO identity (id, json) VALUES (1, ?1)",
            params![serde_json::to_string(identity)?],
        )?;
        Ok(())
    }

    fn peer(&self, chat_key: &str) -> Result<Option<Peer>> {
        self.get_one("peers", "chat_key", chat_key)
    }

    fn put_peer(&mut self, peer: &Peer) -> Result<()> {
        self.put_keyed("peers", "chat_key", &peer.chat_key, peer)
    }

    fn peers(&self) -> Result<Vec<Peer>> {
        self.get_all("peers", Some("chat_key ASC"))
    }

    fn request(&self, id: &str) -> Result<Option<Request>> {
        self.get_one("requests", "id", id)
    }

    fn put_request(&mut self, request: &Request) -> Result<()> {
        self.put_keyed("requests", "id", &request.id, request)
    }

    fn requests(&self) -> Result<Vec<Request>> {
        let mut all: Vec<Request> = self.get_all("requests", None)?;
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    fn request_state(&self, request_id: &str) -> Result<Option<RequestState>> {
        self.get_one("request_states", "request_id", request_id)
    }

    fn put_request_state(&mut self, state: &RequestState) -> Result<()> {
        self.put_keyed("request_states", "request_id", &state.request_id, state)
    }

    fn request_states(&self) -> Result<Vec<RequestState>> {
        self.get_all("request_states", Some("request_id ASC"))
    }

    fn chat(&self, id: &str) -> Result<Option<Chat>> {
        self.get_one("chats", "id", id)
    }

    fn put_chat(&mut self, chat: &Chat) -> Result<()> {
        self.put_keyed("chats", "id", &chat.id, chat)
    }

    fn chats(&self) -> Result<Vec<Chat>> {
        self.get_all("chats", Some("id ASC"))
    }

    fn session(&self, id: &str) -> Result<Option<Session>> {
        self.get_one("sessions", "id", id)
    }

    fn put_session(&mut self, session: &Session) -> Result<()> {
        self.put_keyed("sessions", "id", &session.conversation_id, session)
    }

    fn sessions(&self) -> Result<Vec<Session>> {
        self.get_all("sessions", Some("id ASC"))
    }

    fn message(&self, id: &str) -> Result<Option<Message>> {
        self.get_one("messages", "id", id)
    }

    fn put_message(&mut self, message: &Message) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO messages (id, chat_id, timestamp, json)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                message.id,
                message.chat_id,
                message.timestamp.to_rfc3339(),
                serde_json::to_string(message)?,
            ],
        )?;
        Ok(())
    }

    fn messages_for_chat(&self, chat_id: &str) -> Result<Vec<Message>> {
        let mut stmt = self.conn.prepare(
            "SELECT json FROM messages WHERE chat_id = ?1 ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![chat_id], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    fn messages(&self) -> Result<Vec<Message>> {
        self.get_all("messages", Some("id ASC"))
    }

    fn reaction(&self, id: &str) -> Result<Option<Reaction>> {
        self.get_one("reactions", "id", id)
    }

    fn put_reaction(&mut self, reaction: &Reaction) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO reactions (id, message_id, json) VALUES (?1, ?2, ?3)",
            params![
                reaction.id,
                reaction.message_id,
                serde_json::to_string(reaction)?,
            ],
        )?;
        Ok(())
    }

    fn reactions_for_message(&self, message_id: &str) -> Result<Vec<Reaction>> {
        let mut stmt = self
            .conn
            .prepare("SELECT json FROM reactions WHERE message_id = ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![message_id], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    fn reactions(&self) -> Result<Vec<Reaction>> {
        self.get_all("reactions", Some("id ASC"))
    }

    fn attachment(&self, id: &str) -> Result<Option<Attachment>> {
        self.get_one("attachments", "id", id)
    }

    fn put_attachment(&mut self, attachment: &Attachment) -> Result<()> {
        self.put_keyed("attachments", "id", &attachment.id, attachment)
    }

    fn attachments(&self) -> Result<Vec<Attachment>> {
        self.get_all("attachments", Some("id ASC"))
    }

    fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            identity: self.identity()?,
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
        let tx = self.conn.transaction()?;

        for table in [
            "identity",
            "peers",
            "requests",
            "request_states",
            "chats",
            "sessions",
            "messages",
            "reactions",
            "attachments",
        ] {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }

        if let Some(ref identity) = snapshot.identity {
            tx.execute(
                "INSERT INTO identity (id, json) VALUES (1, ?1)",
                params![serde_json::to_string(identity)?],
            )?;
        }
        for p in &snapshot.peers {
            tx.execute(
                "INSERT INTO peers (chat_key, json) VALUES (?1, ?2)",
                params![p.chat_key, serde_json::to_string(p)?],
            )?;
        }
        for r in &snapshot.requests {
            tx.execute(
                "INSERT INTO requests (id, json) VALUES (?1, ?2)",
                params![r.id, serde_json::to_string(r)?],
            )?;
        }
        for s in &snapshot.request_states {
            tx.execute(
                "INSERT INTO request_states (request_id, json) VALUES (?1, ?2)",
                params![s.request_id, serde_json::to_string(s)?],
            )?;
        }
        for c in &snapshot.chats {
            tx.execute(
                "INSERT INTO chats (id, json) VALUES (?1, ?2)",
                params![c.id, serde_json::to_string(c)?],
            )?;
        }
        for s in &snapshot.sessions {
            tx.execute(
                "INSERT INTO sessions (id, json) VALUES (?1, ?2)",
                params![s.conversation_id, serde_json::to_string(s)?],
            )?;
        }
        for m in &snapshot.messages {
            tx.execute(
                "INSERT INTO messages (id, chat_id, timestamp, json) VALUES (?1, ?2, ?3, ?4)",
                params![
                    m.id,
                    m.chat_id,
                    m.timestamp.to_rfc3339(),
                    serde_json::to_string(m)?
                ],
            )?;
        }
        for r in &snapshot.reactions {
            tx.execute(
                "INSERT INTO reactions (id, message_id, json) VALUES (?1, ?2, ?3)",
                params![r.id, r.message_id, serde_json::to_string(r)?],
            )?;
        }
        for a in &snapshot.attachments {
            tx.execute(
                "INSERT INTO attachments (id, json) VALUES (?1, ?2)",
                params![a.id, serde_json::to_string(a)?],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use murmure_shared::identity::Identity;

    fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_at(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_runs_migrations() {
        let (_dir, store) = open_temp();
        assert!(store.path().is_some());
        assert!(store.chats().unwrap().is_empty());
    }

    #[test]
    fn test_identity_roundtrip() {
        let (_dir, mut store) = open_temp();
        assert!(store.identity().unwrap().is_none());

        let sealed = Identity::generate().seal("pw").unwrap();
        store.put_identity(&sealed).unwrap();
        assert_eq!(store.identity().unwrap(), Some(sealed));
    }

    #[test]
    fn test_chat_roundtrip() {
        let (_dir, mut store) = open_temp();
        let chat = Chat {
            id: "cid-1".into(),
            kind: murmure_shared::ratchet::ConversationKind::Dm,
            title: "kB".into(),
            participants: ["kA".to_string(), "kB".to_string()].into_iter().collect(),
            accepted: true,
            created_at: Utc::now(),
            last_message_at: None,
            unread_count: 0,
        };
        store.put_chat(&chat).unwrap();
        assert_eq!(store.chat("cid-1").unwrap(), Some(chat));
    }

    #[test]
    fn test_replace_all_is_transactional_swap() {
        let (_dir, mut store) = open_temp();
        let peer = Peer {
            chat_key: "kB".into(),
            alias: Some("Brigitte".into()),
            first_seen: Utc::now(),
        };
        store.put_peer(&peer).unwrap();

        let snap = store.snapshot().unwrap();
        store.replace_all(Snapshot::default()).unwrap();
        assert!(store.peers().unwrap().is_empty());

        store.replace_all(snap.clone()).unwrap();
        assert_eq!(store.snapshot().unwrap(), snap);
    }
}
