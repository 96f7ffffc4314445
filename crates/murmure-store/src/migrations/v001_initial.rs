//! v001 -- Initial schema creation.
//!
//! One table per keyed store. Records are stored as JSON documents; the only
//! extra columns are the lookup keys the engine actually queries by.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS identity (
    id   INTEGER PRIMARY KEY CHECK (id = 1),
    json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS peers (
    chat_key TEXT PRIMARY KEY NOT NULL,       -- base58 chat-key
    json     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS requests (
    id   TEXT PRIMARY KEY NOT NULL,
    json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS request_states (
    request_id TEXT PRIMARY KEY NOT NULL,
    json       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chats (
    id   TEXT PRIMARY KEY NOT NULL,           -- conversation id or group id
    json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id   TEXT PRIMARY KEY NOT NULL,           -- conversation / pairwise session id
    json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id        TEXT PRIMARY KEY NOT NULL,
    chat_id   TEXT NOT NULL,
    timestamp TEXT NOT NULL,                  -- RFC 3339, for ordering
    json      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, timestamp ASC);

CREATE TABLE IF NOT EXISTS reactions (
    id         TEXT PRIMARY KEY NOT NULL,
    message_id TEXT NOT NULL,
    json       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reactions_message ON reactions(message_id);

CREATE TABLE IF NOT EXISTS attachments (
    id   TEXT PRIMARY KEY NOT NULL,
    json TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
