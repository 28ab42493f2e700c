//! A running vault: the persisted database, the in-memory store and the save
//! scheduler, with an explicit open/close lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::config::AppConfig;
use crate::crypto::keys::VaultKey;
use crate::error::VaultResult;
use crate::scheduler::SaveScheduler;
use crate::storage::{BlobStore, Database, FileBlobStore};
use crate::store::VaultStore;

#[derive(Debug)]
pub struct Session {
    database: Arc<Database>,
    store: VaultStore,
    scheduler: SaveScheduler,
    debounce: Duration,
}

impl Session {
    /// Loads the vault from `blobs` under `key`. A wrong key surfaces as
    /// `AuthenticationFailed` so the caller can ask for a passphrase.
    pub fn open(
        blobs: impl BlobStore + 'static,
        key: VaultKey,
        runtime: Handle,
        debounce: Duration,
    ) -> VaultResult<Self> {
        let database = Arc::new(Database::with_key(blobs, key));
        let store = VaultStore::from_records(database.load()?)?;
        let scheduler = SaveScheduler::new(Arc::clone(&database), runtime);
        Ok(Self {
            database,
            store,
            scheduler,
            debounce,
        })
    }

    /// Opens the database file named by `config`.
    pub fn open_with_config(config: &AppConfig, key: VaultKey, runtime: Handle) -> VaultResult<Self> {
        let blobs = FileBlobStore::new(config.database_path());
        log::info!("opening vault at {}", blobs.path().display());
        Self::open(blobs, key, runtime, config.save_debounce())
    }

    pub fn store(&self) -> &VaultStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut VaultStore {
        &mut self.store
    }

    pub fn scheduler(&self) -> &SaveScheduler {
        &self.scheduler
    }

    /// Schedules a save of the current records with the configured debounce.
    pub fn save(&self) -> VaultResult<()> {
        self.save_after(self.debounce)
    }

    pub fn save_after(&self, delay: Duration) -> VaultResult<()> {
        self.scheduler.request_save(self.store.snapshot(), delay)
    }

    /// Flushes pending saves, then re-encrypts the database under `new_key`.
    pub async fn rekey(&self, old_key: &VaultKey, new_key: VaultKey) -> VaultResult<()> {
        self.scheduler.flush().await?;
        let database = Arc::clone(&self.database);
        let old_key = old_key.clone();
        tokio::task::spawn_blocking(move || database.rekey(&old_key, new_key))
            .await
            .map_err(|err| std::io::Error::other(err.to_string()))?
    }

    /// Final flush. Nothing scheduled before this call is lost.
    pub async fn close(self) -> VaultResult<()> {
        self.scheduler.flush().await?;
        log::info!("vault closed after {} writes", self.scheduler.write_count());
        Ok(())
    }
}
