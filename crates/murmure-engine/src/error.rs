use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Identity is locked")]
    Locked,

    #[error("Identity already exists")]
    IdentityExists,

    #[error("No identity to unlock")]
    NoIdentity,

    #[error("Unknown chat: {0}")]
    UnknownChat(String),

    #[error("Chat is not accepted yet: {0}")]
    ChatNotAccepted(String),

    #[error("Unknown request: {0}")]
    UnknownRequest(String),

    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("Request already answered: {0}")]
    RequestAnswered(String),

    #[error("Store error: {0}")]
    Store(#[from] murmure_store::StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] murmure_shared::CryptoError),

    #[error("Codec error: {0}")]
    Codec(#[from] murmure_shared::CodecError),

    #[error("Transport unavailable")]
    TransportClosed,

    #[error("Engine state poisoned")]
    StatePoisoned,
}

impl From<murmure_shared::MurmureError> for EngineError {
    fn from(e: murmure_shared::MurmureError) -> Self {
        use murmure_shared::MurmureError;
        match e {
            MurmureError::Crypto(c) => EngineError::Crypto(c),
            MurmureError::Codec(c) => EngineError::Codec(c),
            MurmureError::Locked => EngineError::Locked,
            MurmureError::Protocol(s) => {
                EngineError::Codec(murmure_shared::CodecError::BadInput(s))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
