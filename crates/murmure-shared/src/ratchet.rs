//! Forward-secure symmetric ratchet.
//!
//! Each conversation pair holds two HMAC-SHA256 chains seeded once from the
//! x25519 agreement of the long-term identity keys. The chains are split so
//! that one party's send chain is the other's receive chain, which removes
//! any need for negotiation:
//!
//! - `root = HKDF(shared, salt = conversation id, info = "root")`
//! - `send_ck = HMAC(root, "send:" + own chat-key)`
//! - `recv_ck = HMAC(root, "send:" + peer chat-key)`
//!
//! Advancing a chain derives a one-shot message key and replaces the chain
//! key, so a compromised chain key never reveals past message keys. Receive
//! keys derived ahead of an out-of-order arrival are parked in a bounded
//! skipped-key cache.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_SKIPPED_KEYS;
use crate::crypto;
use crate::encoding;
use crate::error::MurmureError;

const MSG_LABEL: &[u8] = b"msg";
const CK_LABEL: &[u8] = b"ck";
const ROOT_INFO: &[u8] = b"root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Dm,
    Group,
}

/// Ratchet state for one conversation with one peer. For groups there is one
/// session per member pair, keyed by the pairwise session id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub conversation_id: String,
    pub kind: ConversationKind,
    /// Peer chat-key (base58).
    pub peer: String,
    pub send_ck: [u8; 32],
    pub recv_ck: [u8; 32],
    /// Number of send keys already derived.
    pub send_n: u64,
    /// Smallest receive counter not yet consumed.
    pub recv_n: u64,
    /// Pre-derived receive keys awaiting out-of-order arrivals.
    pub skipped: BTreeMap<u64, [u8; 32]>,
}

impl Session {
    /// Seed (or re-seed) a session from the long-term DH agreement. Both
    /// sides calling this with mirrored arguments end up with
    /// `a.send_ck == b.recv_ck` and vice versa.
    pub fn seed(
        conversation_id: &str,
        kind: ConversationKind,
        my_secret: &[u8; 32],
        my_chat_key: &str,
        peer_chat_key: &str,
    ) -> Result<Self, MurmureError> {
        let peer_public = encoding::decode_chat_key(peer_chat_key)?;
        let shared = crypto::x25519_shared(my_secret, &peer_public);
        let root = crypto::hkdf_sha256(&shared, conversation_id.as_bytes(), ROOT_INFO, 32)?;

        let send_ck = crypto::hmac_sha256(&root, format!("send:{my_chat_key}").as_bytes());
        let recv_ck = crypto::hmac_sha256(&root, format!("send:{peer_chat_key}").as_bytes());

        Ok(Self {
            conversation_id: conversation_id.to_string(),
            kind,
            peer: peer_chat_key.to_string(),
            send_ck,
            recv_ck,
            send_n: 0,
            recv_n: 0,
            skipped: BTreeMap::new(),
        })
    }

    /// Derive the next send key and advance the chain. Returns the message
    /// key together with the wire counter to transmit (the index of the key
    /// just consumed).
    pub fn advance_send(&mut self) -> ([u8; 32], u64) {
        let mk = crypto::hmac_sha256(&self.send_ck, MSG_LABEL);
        self.send_ck = crypto::hmac_sha256(&self.send_ck, CK_LABEL);
        let n = self.send_n;
        self.send_n += 1;
        (mk, n)
    }

    /// Derive (or fetch from the cache) the receive key for counter `n`.
    ///
    /// `None` means the key is unrecoverable: either a replayed counter or
    /// an arrival more than [`MAX_SKIPPED_KEYS`] slots behind the chain.
    /// The caller surfaces that as a key mismatch.
    pub fn receive_key(&mut self, n: u64) -> Option<[u8; 32]> {
        if n < self.recv_n {
            return self.skipped.remove(&n);
        }

        let mut mk = [0u8; 32];
        for i in self.recv_n..=n {
            mk = crypto::hmac_sha256(&self.recv_ck, MSG_LABEL);
            self.recv_ck = crypto::hmac_sha256(&self.recv_ck, CK_LABEL);
            if i < n {
                self.skipped.insert(i, mk);
            }
        }
        self.recv_n = n + 1;

        // Newer-biased eviction: very late arrivals become permanently
        // undecryptable, and both peers must agree on which ones.
        while self.skipped.len() > MAX_SKIPPED_KEYS {
            let oldest = *self.skipped.keys().next().expect("non-empty map");
            self.skipped.remove(&oldest);
        }

        Some(mk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::topics;

    fn pair() -> (Identity, Identity, Session, Session) {
        let a = Identity::generate();
        let b = Identity::generate();
        let cid = topics::conversation_id(&a.chat_key(), &b.chat_key());

        let sa = Session::seed(
            &cid,
            ConversationKind::Dm,
            a.secret_bytes(),
            &a.chat_key(),
            &b.chat_key(),
        )
        .unwrap();
        let sb = Session::seed(
            &cid,
            ConversationKind::Dm,
            b.secret_bytes(),
            &b.chat_key(),
            &a.chat_key(),
        )
        .unwrap();
        (a, b, sa, sb)
    }

    #[test]
    fn test_chains_mirror() {
        let (_, _, sa, sb) = pair();
        assert_eq!(sa.send_ck, sb.recv_ck);
        assert_eq!(sa.recv_ck, sb.send_ck);
    }

    #[test]
    fn test_send_counter_tracks_derivations() {
        let (_, _, mut sa, _) = pair();
        let ck0 = sa.send_ck;
        for expected in 0..5u64 {
            let (_, n) = sa.advance_send();
            assert_eq!(n, expected);
        }
        assert_eq!(sa.send_n, 5);
        assert_ne!(sa.send_ck, ck0);
    }

    #[test]
    fn test_in_order_delivery() {
        let (_, _, mut sa, mut sb) = pair();
        for _ in 0..4 {
            let (mk, n) = sa.advance_send();
            assert_eq!(sb.receive_key(n), Some(mk));
        }
        assert_eq!(sb.recv_n, 4);
        assert!(sb.skipped.is_empty());
    }

    #[test]
    fn test_out_of_order_within_window() {
        let (_, _, mut sa, mut sb) = pair();
        let sent: Vec<([u8; 32], u64)> = (0..4).map(|_| sa.advance_send()).collect();

        // Arrival order 2, 0, 3, 1.
        for idx in [2usize, 0, 3, 1] {
            let (mk, n) = sent[idx];
            assert_eq!(sb.receive_key(n), Some(mk), "counter {n}");
        }
        assert_eq!(sb.recv_n, 4);
        assert!(sb.skipped.is_empty());
    }

    #[test]
    fn test_duplicate_counter_unrecoverable() {
        let (_, _, mut sa, mut sb) = pair();
        let (mk, n) = sa.advance_send();
        assert_eq!(sb.receive_key(n), Some(mk));
        assert_eq!(sb.receive_key(n), None);
    }

    #[test]
    fn test_eviction_is_newer_biased() {
        let (_, _, mut sa, mut sb) = pair();
        let sent: Vec<([u8; 32], u64)> = (0..60).map(|_| sa.advance_send()).collect();

        // Counter 59 lands first: 0..58 get derived into the cache, which
        // then trims back down to the newest 50 (9..58).
        let (mk59, _) = sent[59];
        assert_eq!(sb.receive_key(59), Some(mk59));
        assert_eq!(sb.skipped.len(), MAX_SKIPPED_KEYS);
        assert_eq!(*sb.skipped.keys().next().unwrap(), 9);

        for n in 0..9u64 {
            assert_eq!(sb.receive_key(n), None, "counter {n} should be evicted");
        }
        for n in 9..59u64 {
            let (mk, _) = sent[n as usize];
            assert_eq!(sb.receive_key(n), Some(mk), "counter {n}");
        }
        assert!(sb.skipped.is_empty());
    }

    #[test]
    fn test_skipped_indices_below_recv_n() {
        let (_, _, mut sa, mut sb) = pair();
        for _ in 0..10 {
            sa.advance_send();
        }
        sb.receive_key(9);
        assert!(sb.skipped.keys().all(|&k| k < sb.recv_n));
        assert_eq!(sb.skipped.len(), 9);
    }

    #[test]
    fn test_reseed_resets_counters() {
        let (a, b, mut sa, _) = pair();
        for _ in 0..7 {
            sa.advance_send();
        }
        let fresh = Session::seed(
            &sa.conversation_id,
            ConversationKind::Dm,
            a.secret_bytes(),
            &a.chat_key(),
            &b.chat_key(),
        )
        .unwrap();
        assert_eq!(fresh.send_n, 0);
        assert_eq!(fresh.recv_n, 0);
        assert!(fresh.skipped.is_empty());
        // Deterministic: same seed inputs, same chains.
        let again = Session::seed(
            &sa.conversation_id,
            ConversationKind::Dm,
            a.secret_bytes(),
            &a.chat_key(),
            &b.chat_key(),
        )
        .unwrap();
        assert_eq!(fresh, again);
    }
}
