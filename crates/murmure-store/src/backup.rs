//! Passphrase-encrypted backup envelope.
//!
//! The whole persisted state is serialized to one JSON snapshot, sealed with
//! the passphrase AEAD and emitted as a `{ciphertext, iv, salt}` JSON text.
//! Restore is the exact inverse; a wrong passphrase leaves the current state
//! untouched.

use serde::{Deserialize, Serialize};

use murmure_shared::crypto::{self, PassphraseSealed};
use murmure_shared::encoding;
use murmure_shared::CryptoError;

use crate::error::{Result, StoreError};
use crate::store::Snapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEnvelope {
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
}

/// Serialize and seal a snapshot. Returns the JSON text of the envelope.
pub fn seal_snapshot(snapshot: &Snapshot, passphrase: &str) -> Result<String> {
    let plain = serde_json::to_vec(snapshot)?;
    let sealed = crypto::encrypt_with_passphrase(&plain, passphrase)?;

    let envelope = BackupEnvelope {
        ciphertext: encoding::encode_b64(&sealed.ciphertext),
        iv: encoding::encode_b64(&sealed.iv),
        salt: encoding::encode_b64(&sealed.salt),
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Open a backup envelope. `BadPassphrase` on a wrong passphrase or a
/// tampered payload; malformed envelope JSON is a serialization error.
pub fn open_snapshot(payload: &str, passphrase: &str) -> Result<Snapshot> {
    let envelope: BackupEnvelope = serde_json::from_str(payload)?;

    let bad = |_| StoreError::Crypto(CryptoError::BadPassphrase);
    let ciphertext = encoding::decode_b64(&envelope.ciphertext).map_err(bad)?;
    let iv: [u8; 12] = encoding::decode_b64(&envelope.iv)
        .map_err(bad)?
        .try_into()
        .map_err(|_| StoreError::Crypto(CryptoError::BadPassphrase))?;
    let salt: [u8; 16] = encoding::decode_b64(&envelope.salt)
        .map_err(bad)?
        .try_into()
        .map_err(|_| StoreError::Crypto(CryptoError::BadPassphrase))?;

    let sealed = PassphraseSealed {
        ciphertext,
        iv,
        salt,
    };
    let plain = crypto::decrypt_with_passphrase(&sealed, passphrase)?;
    Ok(serde_json::from_slice(&plain)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Peer;
    use chrono::Utc;

    fn sample() -> Snapshot {
        Snapshot {
            peers: vec![Peer {
                chat_key: "kB".into(),
                alias: None,
                first_seen: Utc::now(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_backup_roundtrip() {
        let snapshot = sample();
        let payload = seal_snapshot(&snapshot, "pw").unwrap();
        let restored = open_snapshot(&payload, "pw").unwrap();
        assert_eq!(restored, snapshot);
    }

    #[test]
    fn test_wrong_passphrase() {
        let payload = seal_snapshot(&sample(), "pw").unwrap();
        assert!(matches!(
            open_snapshot(&payload, "wrong"),
            Err(StoreError::Crypto(CryptoError::BadPassphrase))
        ));
    }

    #[test]
    fn test_envelope_is_json_with_base64_fields() {
        let payload = seal_snapshot(&sample(), "pw").unwrap();
        let envelope: BackupEnvelope = serde_json::from_str(&payload).unwrap();
        assert!(encoding::decode_b64(&envelope.ciphertext).is_ok());
        assert_eq!(encoding::decode_b64(&envelope.iv).unwrap().len(), 12);
        assert_eq!(encoding::decode_b64(&envelope.salt).unwrap().len(), 16);
    }
}
