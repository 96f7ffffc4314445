use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, PassphraseSealed};
use crate::encoding;
use crate::error::CryptoError;

// Curve25519-based identity. The base58 chat-key is the only identifier
// users ever exchange; there is no account, email or phone number.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Identity {
    secret: [u8; 32],
    #[zeroize(skip)]
    public: [u8; 32],
}

/// Persisted form of the identity: public key in the clear, secret key
/// sealed under the user's passphrase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealedIdentity {
    pub public_key: [u8; 32],
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub salt: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn generate() -> Self {
        let secret: [u8; 32] = crypto::random_bytes(32)
            .try_into()
            .expect("random_bytes returns the requested length");
        Self::from_secret_bytes(secret)
    }

    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        let public =
            *x25519_dalek::PublicKey::from(&x25519_dalek::StaticSecret::from(secret)).as_bytes();
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    /// The shareable base58 form of the public key.
    pub fn chat_key(&self) -> String {
        encoding::encode_b58(&self.public)
    }

    /// Seal the secret key under a passphrase for persistence.
    pub fn seal(&self, passphrase: &str) -> Result<SealedIdentity, CryptoError> {
        let PassphraseSealed {
            ciphertext,
            iv,
            salt,
        } = crypto::encrypt_with_passphrase(&self.secret, passphrase)?;

        Ok(SealedIdentity {
            public_key: self.public,
            ciphertext,
            iv: iv.to_vec(),
            salt: salt.to_vec(),
            created_at: Utc::now(),
        })
    }
}

impl SealedIdentity {
    /// Unseal the secret key. Fails with [`CryptoError::BadPassphrase`] on a
    /// wrong passphrase; the sealed record is untouched either way.
    pub fn unseal(&self, passphrase: &str) -> Result<Identity, CryptoError> {
        let iv: [u8; 12] = self
            .iv
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        let salt: [u8; 16] = self
            .salt
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength)?;

        let sealed = PassphraseSealed {
            ciphertext: self.ciphertext.clone(),
            iv,
            salt,
        };
        let mut plain = crypto::decrypt_with_passphrase(&sealed, passphrase)?;
        let secret: [u8; 32] = plain
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        plain.zeroize();

        let identity = Identity::from_secret_bytes(secret);
        if identity.public == self.public_key {
            Ok(identity)
        } else {
            Err(CryptoError::BadPassphrase)
        }
    }

    pub fn chat_key(&self) -> String {
        encoding::encode_b58(&self.public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_key_is_base58_of_public() {
        let id = Identity::generate();
        let decoded = encoding::decode_chat_key(&id.chat_key()).unwrap();
        assert_eq!(decoded, id.public_key_bytes());
    }

    #[test]
    fn test_seal_unseal_roundtrip() {
        let id = Identity::generate();
        let sealed = id.seal("pa").unwrap();
        let restored = sealed.unseal("pa").unwrap();
        assert_eq!(restored.public_key_bytes(), id.public_key_bytes());
        assert_eq!(restored.secret_bytes(), id.secret_bytes());
    }

    #[test]
    fn test_unseal_wrong_passphrase() {
        let id = Identity::generate();
        let sealed = id.seal("pa").unwrap();
        assert!(matches!(
            sealed.unseal("pb"),
            Err(CryptoError::BadPassphrase)
        ));
    }
}
