//! Application settings, persisted as an encrypted settings document under
//! the device key.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::codec::{decode_document, encode_document, DocumentKind};
use crate::crypto::keys::{VaultKey, KEY_LEN};
use crate::error::{VaultError, VaultResult};
use crate::storage::write_atomic;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SidebarState {
    Hidden,
    Open,
    #[default]
    Expanded,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub minimize_on_start: bool,
    pub minimize_to_tray: bool,
    pub api_key: Option<String>,
    pub sidebar: SidebarState,
    pub corner_radius: f64,
    remembered_key: Option<Zeroizing<Vec<u8>>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            minimize_on_start: false,
            minimize_to_tray: false,
            api_key: None,
            sidebar: SidebarState::default(),
            corner_radius: 9.0,
            remembered_key: None,
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("minimize_on_start", &self.minimize_on_start)
            .field("minimize_to_tray", &self.minimize_to_tray)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("sidebar", &self.sidebar)
            .field("corner_radius", &self.corner_radius)
            .field("remembered_key", &self.remembered_key.is_some())
            .finish()
    }
}

impl Settings {
    /// The remembered database key, if one was stored.
    pub fn remembered_key(&self) -> VaultResult<Option<VaultKey>> {
        self.remembered_key
            .as_ref()
            .map(|bytes| VaultKey::from_bytes(bytes))
            .transpose()
    }

    pub fn remember_key(&mut self, key: Option<&VaultKey>) {
        self.remembered_key = key.map(|key| Zeroizing::new(key.as_bytes().to_vec()));
    }

    fn validate(&self) -> VaultResult<()> {
        if let Some(bytes) = &self.remembered_key {
            if bytes.len() != KEY_LEN {
                return Err(VaultError::CorruptData(format!(
                    "remembered key has {} bytes",
                    bytes.len()
                )));
            }
        }
        if !self.corner_radius.is_finite() || self.corner_radius < 0.0 {
            return Err(VaultError::CorruptData("corner radius out of range".to_string()));
        }
        Ok(())
    }
}

/// The settings blob on disk.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file yields defaults; anything unreadable is an error.
    pub fn load(&self, device_key: &VaultKey) -> VaultResult<Settings> {
        let blob = match fs::read(&self.path) {
            Ok(blob) => blob,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no settings file at {}, using defaults", self.path.display());
                return Ok(Settings::default());
            }
            Err(err) => return Err(VaultError::Io(err)),
        };
        let settings: Settings = decode_document(DocumentKind::Settings, &blob, device_key)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, settings: &Settings, device_key: &VaultKey) -> VaultResult<()> {
        settings.validate()?;
        let blob = encode_document(DocumentKind::Settings, settings, device_key)?;
        write_atomic(&self.path, &blob)?;
        log::debug!("settings saved to {}", self.path.display());
        Ok(())
    }
}
