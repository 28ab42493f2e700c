//! Vault key material. A key is either bound to the local machine (derived
//! from its stable identifier) or derived from a user passphrase. Keys live only
//! in process memory and are zeroed when dropped.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::crypto::integrity::hkdf_expand;
use crate::error::{VaultError, VaultResult};

pub const KEY_LEN: usize = 32;

/// Fixed application salt mixed into both derivation paths.
const APP_SALT: &[u8] = b"account-vault/v1/9c41e2d07a";
const DEVICE_KEY_INFO: &[u8] = b"device-key";

/// Argon2id parameters for passphrase keys: 19 MiB, 3 passes, 1 lane.
const MEMORY_COST_KIB: u32 = 19 * 1024;
const TIME_COST: u32 = 3;
const PARALLELISM: u32 = 1;

const MACHINE_ID_PATHS: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Where the key in use came from. Stored next to the key so callers can tell
/// whether a passphrase prompt makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    Device,
    Passphrase,
    Raw,
}

/// 32-byte symmetric key for the vault codec. Equality compares the key
/// bytes only, in constant time.
#[derive(Clone)]
pub struct VaultKey {
    bytes: [u8; KEY_LEN],
    origin: KeyOrigin,
}

impl VaultKey {
    /// Builds a key from raw bytes; anything but exactly 32 bytes is rejected.
    pub fn from_bytes(bytes: &[u8]) -> VaultResult<Self> {
        if bytes.len() != KEY_LEN {
            return Err(VaultError::InvalidKeyLength(bytes.len()));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self {
            bytes: key,
            origin: KeyOrigin::Raw,
        })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    fn with_origin(mut self, origin: KeyOrigin) -> Self {
        self.origin = origin;
        self
    }
}

impl PartialEq for VaultKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes[..].ct_eq(&other.bytes[..]).into()
    }
}

impl Eq for VaultKey {}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultKey")
            .field("origin", &self.origin)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

impl Drop for VaultKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// Reads the local machine identifier, either from `override_path` or from the
/// usual systemd/dbus locations.
pub fn read_machine_id(override_path: Option<&Path>) -> VaultResult<String> {
    let candidates: Vec<PathBuf> = match override_path {
        Some(path) => vec![path.to_path_buf()],
        None => MACHINE_ID_PATHS.iter().map(PathBuf::from).collect(),
    };

    let mut last_err = None;
    for path in candidates {
        match fs::read_to_string(&path) {
            Ok(content) => {
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    log::warn!("machine id at {} is empty", path.display());
                    continue;
                }
                return Ok(trimmed.to_string());
            }
            Err(err) => last_err = Some(err),
        }
    }

    Err(match last_err {
        Some(err) => VaultError::Io(err),
        None => VaultError::KeyDerivation("no usable machine identifier".to_string()),
    })
}

/// Derives the device-bound key from a machine identifier. Deterministic for a
/// given identifier.
pub fn derive_device_key(machine_id: &str) -> VaultResult<VaultKey> {
    let machine_id = machine_id.trim();
    if machine_id.is_empty() {
        return Err(VaultError::KeyDerivation("machine identifier is empty".to_string()));
    }
    let mut okm = hkdf_expand(machine_id.as_bytes(), APP_SALT, DEVICE_KEY_INFO, KEY_LEN)
        .map_err(|e| VaultError::KeyDerivation(format!("{e}")))?;
    let key = VaultKey::from_bytes(&okm)?.with_origin(KeyOrigin::Device);
    okm.zeroize();
    Ok(key)
}

/// Reads the machine identifier and derives the device key from it.
pub fn device_key(machine_id_path: Option<&Path>) -> VaultResult<VaultKey> {
    let machine_id = read_machine_id(machine_id_path)?;
    derive_device_key(&machine_id)
}

/// Derives a key from a user passphrase with Argon2id and the application salt.
pub fn derive_user_key(passphrase: &str) -> VaultResult<VaultKey> {
    if passphrase.is_empty() {
        return Err(VaultError::KeyDerivation("passphrase is empty".to_string()));
    }
    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, Some(KEY_LEN))
        .map_err(|e| VaultError::KeyDerivation(format!("{e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase.as_bytes(), APP_SALT, &mut output)
        .map_err(|e| VaultError::KeyDerivation(format!("{e}")))?;

    let key = VaultKey::from_bytes(&output)?.with_origin(KeyOrigin::Passphrase);
    output.zeroize();
    Ok(key)
}

/// Produces a random passphrase suggestion: 32 bytes from the OS RNG, base64.
pub fn generate_passphrase() -> String {
    let mut raw = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut raw);
    let encoded = STANDARD.encode(raw);
    raw.zeroize();
    encoded
}
