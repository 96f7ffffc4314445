use thiserror::Error;

#[derive(Error, Debug)]
pub enum MurmureError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Identity is locked")]
    Locked,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptFailed,

    #[error("Wrong passphrase")]
    BadPassphrase,

    #[error("Invalid key length")]
    InvalidKeyLength,
}

/// Malformed external input. Envelopes failing with this are dropped
/// silently by the inbound pipeline; hostile bytes are expected on a
/// public gossip network.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Bad input: {0}")]
    BadInput(String),

    #[error("Unsupported envelope version {0}")]
    BadVersion(u8),
}

impl CodecError {
    pub fn bad_input(what: impl Into<String>) -> Self {
        Self::BadInput(what.into())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        Self::BadInput(e.to_string())
    }
}

impl From<bs58::decode::Error> for CodecError {
    fn from(e: bs58::decode::Error) -> Self {
        Self::BadInput(e.to_string())
    }
}

impl From<base64::DecodeError> for CodecError {
    fn from(e: base64::DecodeError) -> Self {
        Self::BadInput(e.to_string())
    }
}
