//! Encrypted backup and restore commands.

use tracing::info;

use murmure_store::backup as store_backup;

use crate::engine::Engine;
use crate::error::Result;

impl Engine {
    /// Dump every persisted record into a passphrase-sealed envelope.
    /// Returns the envelope as JSON text.
    pub fn backup(&self, passphrase: &str) -> Result<String> {
        let snapshot = {
            let guard = self.lock()?;
            guard.store.snapshot()?
        };
        let payload = store_backup::seal_snapshot(&snapshot, passphrase)?;
        info!(
            chats = snapshot.chats.len(),
            messages = snapshot.messages.len(),
            "backup sealed"
        );
        Ok(payload)
    }

    /// Replace the entire local state with a decrypted backup. A wrong
    /// passphrase fails before anything is touched. Topics are
    /// re-subscribed from the restored records; the identity stays locked
    /// until the next unlock.
    pub async fn restore(&self, payload: &str, passphrase: &str) -> Result<()> {
        let snapshot = store_backup::open_snapshot(payload, passphrase)?;

        {
            let mut guard = self.lock()?;
            guard.store.replace_all(snapshot)?;
            guard.identity = None;
            guard.typing.clear();
            guard.seen_envelopes = Default::default();
            guard.active_chat = None;
        }

        self.resubscribe_all().await?;
        info!("backup restored");
        Ok(())
    }
}
