//! Cryptographic primitives.
//!
//! Long-term secrets are sealed with a passphrase-derived AES-256-GCM key
//! (PBKDF2-SHA256). Out-of-session envelopes (requests, invites) use the
//! curve25519-xsalsa20-poly1305 box; in-session envelopes use the
//! xsalsa20-poly1305 secretbox under ratchet-derived message keys.

use aes_gcm::aead::{Aead as GcmAead, KeyInit as GcmKeyInit};
use aes_gcm::{Aes256Gcm, Nonce as GcmNonce};
use crypto_box::aead::Aead as BoxAead;
use crypto_box::SalsaBox;
use crypto_secretbox::aead::KeyInit as SecretboxKeyInit;
use crypto_secretbox::{Key as SecretboxKey, Nonce as SecretboxNonce, XSalsa20Poly1305};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::constants::{GCM_IV_SIZE, NONCE_SIZE, PBKDF2_ITERATIONS, SALT_SIZE};
use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut out);
    out
}

pub fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Passphrase-sealed blob: AES-256-GCM ciphertext plus the iv and the
/// PBKDF2 salt needed to re-derive the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassphraseSealed {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; GCM_IV_SIZE],
    pub salt: [u8; SALT_SIZE],
}

fn passphrase_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

pub fn encrypt_with_passphrase(
    plaintext: &[u8],
    passphrase: &str,
) -> Result<PassphraseSealed, CryptoError> {
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; GCM_IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let key = passphrase_key(passphrase, &salt);
    let cipher = Aes256Gcm::new((&key).into());
    let ciphertext = cipher
        .encrypt(GcmNonce::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::EncryptFailed)?;

    Ok(PassphraseSealed {
        ciphertext,
        iv,
        salt,
    })
}

pub fn decrypt_with_passphrase(
    sealed: &PassphraseSealed,
    passphrase: &str,
) -> Result<Vec<u8>, CryptoError> {
    let key = passphrase_key(passphrase, &sealed.salt);
    let cipher = Aes256Gcm::new((&key).into());
    cipher
        .decrypt(GcmNonce::from_slice(&sealed.iv), sealed.ciphertext.as_ref())
        .map_err(|_| CryptoError::BadPassphrase)
}

/// HKDF-SHA256 expand over (ikm, salt, info).
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    Ok(okm)
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Seal a message to `peer_public` using the curve25519 box.
pub fn box_seal(
    msg: &[u8],
    nonce: &[u8; NONCE_SIZE],
    peer_public: &[u8; 32],
    my_secret: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    let secret = crypto_box::SecretKey::from(*my_secret);
    let public = crypto_box::PublicKey::from(*peer_public);
    let nonce = crypto_box::Nonce::from(*nonce);
    SalsaBox::new(&public, &secret)
        .encrypt(&nonce, msg)
        .map_err(|_| CryptoError::EncryptFailed)
}

pub fn box_open(
    ciphertext: &[u8],
    nonce: &[u8; NONCE_SIZE],
    peer_public: &[u8; 32],
    my_secret: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    let secret = crypto_box::SecretKey::from(*my_secret);
    let public = crypto_box::PublicKey::from(*peer_public);
    let nonce = crypto_box::Nonce::from(*nonce);
    SalsaBox::new(&public, &secret)
        .decrypt(&nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

/// Seal a message under a symmetric 32-byte key (ratchet message key).
pub fn secretbox_seal(
    msg: &[u8],
    nonce: &[u8; NONCE_SIZE],
    key: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XSalsa20Poly1305::new(SecretboxKey::from_slice(key));
    crypto_secretbox::aead::Aead::encrypt(&cipher, SecretboxNonce::from_slice(nonce), msg)
        .map_err(|_| CryptoError::EncryptFailed)
}

pub fn secretbox_open(
    ciphertext: &[u8],
    nonce: &[u8; NONCE_SIZE],
    key: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XSalsa20Poly1305::new(SecretboxKey::from_slice(key));
    crypto_secretbox::aead::Aead::decrypt(&cipher, SecretboxNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

/// Raw x25519 Diffie-Hellman between our secret and the peer's public key.
pub fn x25519_shared(my_secret: &[u8; 32], peer_public: &[u8; 32]) -> [u8; 32] {
    let secret = x25519_dalek::StaticSecret::from(*my_secret);
    let public = x25519_dalek::PublicKey::from(*peer_public);
    *secret.diffie_hellman(&public).as_bytes()
}
