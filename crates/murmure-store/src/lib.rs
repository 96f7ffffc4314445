pub mod backup;
pub mod database;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod store;

mod error;

pub use database::SqliteStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use models::*;
pub use store::{Snapshot, Store};
