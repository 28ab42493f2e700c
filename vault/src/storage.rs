//! Persistence of the database blob.
//!
//! [`Database`] owns the active key and a write gate. Every read or write of
//! the persisted blob (load, scheduled flush, rekey) holds the gate, so at most
//! one of them touches the blob at any time.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::codec::{decode_vault, encode_vault};
use crate::crypto::keys::VaultKey;
use crate::error::{VaultError, VaultResult};
use crate::model::AccountRecord;

/// Backing medium for one encrypted blob.
pub trait BlobStore: Send + Sync {
    /// Returns `None` when nothing has been persisted yet.
    fn read(&self) -> VaultResult<Option<Vec<u8>>>;
    /// Replaces the blob. Readers must observe either the old or the new blob,
    /// never a mix.
    fn write(&self, blob: &[u8]) -> VaultResult<()>;
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn read(&self) -> VaultResult<Option<Vec<u8>>> {
        (**self).read()
    }

    fn write(&self, blob: &[u8]) -> VaultResult<()> {
        (**self).write(blob)
    }
}

/// File-backed blob with temp-file + rename replacement.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    path: PathBuf,
}

impl FileBlobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlobStore for FileBlobStore {
    fn read(&self) -> VaultResult<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(VaultError::Io(err)),
        }
    }

    fn write(&self, blob: &[u8]) -> VaultResult<()> {
        write_atomic(&self.path, blob)
    }
}

/// Writes `data` next to `path` and renames it into place.
pub fn write_atomic(path: &Path, data: &[u8]) -> VaultResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension("tmp");
    let written = fs::File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp_path, path));
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(VaultError::Io(err));
    }
    Ok(())
}

/// In-memory blob, used by tests and dry runs. Counts physical writes.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blob: Mutex<Option<Vec<u8>>>,
    writes: AtomicU64,
    fail_writes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: Vec<u8>) -> Self {
        Self {
            blob: Mutex::new(Some(blob)),
            ..Self::default()
        }
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        lock(&self.blob).clone()
    }

    /// Makes subsequent writes fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self) -> VaultResult<Option<Vec<u8>>> {
        Ok(lock(&self.blob).clone())
    }

    fn write(&self, blob: &[u8]) -> VaultResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(VaultError::Io(std::io::Error::other("simulated write failure")));
        }
        *lock(&self.blob) = Some(blob.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The persisted database: blob medium, active key and write gate.
pub struct Database {
    blobs: Box<dyn BlobStore>,
    key: RwLock<Option<VaultKey>>,
    gate: Mutex<()>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("key_set", &self.has_key())
            .finish()
    }
}

impl Database {
    pub fn new(blobs: impl BlobStore + 'static) -> Self {
        Self {
            blobs: Box::new(blobs),
            key: RwLock::new(None),
            gate: Mutex::new(()),
        }
    }

    pub fn with_key(blobs: impl BlobStore + 'static, key: VaultKey) -> Self {
        let database = Self::new(blobs);
        database.set_key(key);
        database
    }

    pub fn set_key(&self, key: VaultKey) {
        let mut slot = self.key.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(key);
    }

    pub fn has_key(&self) -> bool {
        self.current_key().is_some()
    }

    fn current_key(&self) -> Option<VaultKey> {
        self.key
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Reads and decodes the persisted vault. A missing blob is an empty vault.
    pub fn load(&self) -> VaultResult<Vec<AccountRecord>> {
        let _gate = lock(&self.gate);
        let key = self.current_key().ok_or(VaultError::KeyNotSet)?;
        match self.blobs.read()? {
            None => {
                log::info!("no database blob yet, starting with an empty vault");
                Ok(Vec::new())
            }
            Some(blob) => {
                let records = decode_vault(&blob, &key)?;
                log::info!("loaded {} accounts", records.len());
                Ok(records)
            }
        }
    }

    /// Encodes `records` under the active key and replaces the persisted blob.
    pub fn persist(&self, records: &[AccountRecord]) -> VaultResult<()> {
        let _gate = lock(&self.gate);
        let key = self.current_key().ok_or(VaultError::KeyNotSet)?;
        let blob = encode_vault(records, &key)?;
        self.blobs.write(&blob)?;
        log::debug!("persisted {} accounts ({} bytes)", records.len(), blob.len());
        Ok(())
    }

    /// Re-encrypts the persisted blob from `old_key` to `new_key`.
    ///
    /// The new blob is trial-decoded and compared with the old content before
    /// it replaces anything. On failure neither the blob nor the active key
    /// changes.
    pub fn rekey(&self, old_key: &VaultKey, new_key: VaultKey) -> VaultResult<()> {
        let _gate = lock(&self.gate);
        if let Some(blob) = self.blobs.read()? {
            let records = decode_vault(&blob, old_key)?;
            let reencrypted = encode_vault(&records, &new_key)?;
            let verified = decode_vault(&reencrypted, &new_key)?;
            if verified != records {
                return Err(VaultError::CorruptData("re-encrypted vault does not match".to_string()));
            }
            self.blobs.write(&reencrypted)?;
            log::info!("re-encrypted {} accounts under a new key", records.len());
        } else {
            log::info!("no database blob yet, switching key only");
        }
        self.set_key(new_key);
        Ok(())
    }
}
