//! Cryptographic session and messaging engine.
//!
//! Glues the shared protocol core to the persistence and transport ports:
//! handshake state machine, per-peer ratchet sessions, group fanout, the
//! inbound decrypt → apply → ack pipeline, attachments, rekey and the
//! encrypted backup envelope. See [`Engine`] for the command surface and
//! [`EngineEvent`] for the stream the presentation layer consumes.

mod attachments;
mod backup;
mod engine;
mod error;
mod events;
mod groups;
mod handshake;
mod inbound;
mod messaging;
mod sessions;
mod state;

pub use engine::Engine;
pub use error::EngineError;
pub use events::EngineEvent;
