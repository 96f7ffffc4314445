//! Deterministic content-topic and conversation-id derivation.
//!
//! Everything here is a pure function of chat-keys or raw key bytes, so both
//! sides of a conversation land on the same topics without negotiation.

use sha3::{Digest, Keccak256};

use crate::constants::TOPIC_PREFIX;

fn keccak_hex(data: &[u8]) -> String {
    hex::encode(Keccak256::digest(data))
}

/// Conversation id for a DM: keccak-256 over the lexicographically sorted
/// pair of chat-keys joined with `:`. Symmetric in its arguments.
pub fn conversation_id(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    keccak_hex(format!("{lo}:{hi}").as_bytes())
}

/// Session id for a pair of members inside a group: every pair holds an
/// independent ratchet keyed by this id. Symmetric in (a, b).
pub fn group_session_id(group_id: &str, a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    keccak_hex(format!("{group_id}:{lo}:{hi}").as_bytes())
}

/// Per-identity inbox topic, derived from the raw public-key bytes (not the
/// base58 chat-key string). Carries requests, accepts, invites and acks.
pub fn inbox_topic(public_key: &[u8; 32]) -> String {
    format!("{TOPIC_PREFIX}/inbox/{}", keccak_hex(public_key))
}

pub fn dm_topic(conversation_id: &str) -> String {
    format!("{TOPIC_PREFIX}/dm/{conversation_id}")
}

pub fn group_topic(group_id: &str) -> String {
    format!("{TOPIC_PREFIX}/group/{group_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_id_symmetric() {
        let a = "4uQeVj5tqViQh7yWWGStvkEG1Zmhx6uasJtWmJUFRhY5";
        let b = "8sSfWk2pxLmRu3xNNHTuwlED2Aoiy9vbtKuXnKVGSiZ7";
        assert_eq!(conversation_id(a, b), conversation_id(b, a));
    }

    #[test]
    fn test_conversation_id_distinct_pairs() {
        assert_ne!(conversation_id("aa", "bb"), conversation_id("aa", "cc"));
    }

    #[test]
    fn test_conversation_id_shape() {
        let cid = conversation_id("aa", "bb");
        assert_eq!(cid.len(), 64);
        assert!(!cid.starts_with("0x"));
        assert!(cid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_group_session_id_symmetric() {
        let gid = "groupe-1";
        assert_eq!(
            group_session_id(gid, "aa", "bb"),
            group_session_id(gid, "bb", "aa")
        );
        assert_ne!(
            group_session_id(gid, "aa", "bb"),
            group_session_id("groupe-2", "aa", "bb")
        );
    }

    #[test]
    fn test_topic_prefixes() {
        let key = [7u8; 32];
        assert!(inbox_topic(&key).starts_with("/app/1/inbox/"));
        assert!(dm_topic("abc").starts_with("/app/1/dm/"));
        assert!(group_topic("g").starts_with("/app/1/group/"));
    }

    #[test]
    fn test_inbox_topic_hashes_raw_bytes() {
        let key = [7u8; 32];
        let expected = hex::encode(Keccak256::digest(key));
        assert_eq!(inbox_topic(&key), format!("/app/1/inbox/{expected}"));
    }
}
