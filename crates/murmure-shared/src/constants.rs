/// Content-topic prefix shared by every node on the network
pub const TOPIC_PREFIX: &str = "/app/1";

/// XSalsa20-Poly1305 nonce size in bytes (box and secretbox)
pub const NONCE_SIZE: usize = 24;

/// AES-256-GCM nonce size in bytes (passphrase sealing)
pub const GCM_IV_SIZE: usize = 12;

/// PBKDF2 salt size in bytes
pub const SALT_SIZE: usize = 16;

/// PBKDF2-SHA256 iteration count for passphrase-derived keys
pub const PBKDF2_ITERATIONS: u32 = 120_000;

/// Curve25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Symmetric key size in bytes (chain keys, message keys, AEAD keys)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Upper bound on cached out-of-order receive keys per session
pub const MAX_SKIPPED_KEYS: usize = 50;

/// Attachment chunk size in bytes (pre-encryption plaintext slice)
pub const ATTACHMENT_CHUNK_SIZE: usize = 20_000;

/// Wire envelope version accepted by the inbound pipeline
pub const ENVELOPE_VERSION: u8 = 1;

/// Bound on the in-memory error log kept while outbound commands fail
pub const ERROR_LOG_CAPACITY: usize = 5;

/// Per-chat bound on remembered inbound envelope ids. The gossip mesh
/// redelivers envelopes on a seconds scale; a consumed ratchet counter
/// must not be looked up twice for the same envelope.
pub const SEEN_ENVELOPES_CAPACITY: usize = 256;

/// Protocol version string for libp2p identify
pub const PROTOCOL_VERSION: &str = "/murmure/1.0.0";

/// Maximum gossip message size in bytes (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// GossipSub heartbeat interval in seconds
pub const GOSSIPSUB_HEARTBEAT_SECS: u64 = 1;

/// Default QUIC listen port
pub const DEFAULT_QUIC_PORT: u16 = 4001;

/// Key derivation context for the libp2p node keypair (BLAKE3)
pub const KDF_CONTEXT_NODE_KEY: &str = "murmure-node-key-v1";

/// Environment variable holding comma-separated bootstrap multiaddrs
pub const BOOTSTRAP_ENV: &str = "MURMURE_BOOTSTRAP";

/// Compiled-in bootstrap nodes used when `MURMURE_BOOTSTRAP` is unset
pub const DEFAULT_BOOTSTRAP: &[&str] = &[
    "/ip4/51.158.191.43/udp/4001/quic-v1",
    "/ip4/163.172.151.88/udp/4001/quic-v1",
];
