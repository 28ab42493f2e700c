//! Versioned document schema on top of the blob cipher.
//!
//! Plaintext layout before sealing:
//!
//! ```text
//! [magic: 4][schema version: u16 LE][bincode body]
//! ```
//!
//! The body is the serde field list of the document type, encoded with the
//! bincode standard configuration. Fields are written in declaration order, so
//! adding or reordering a field requires a schema version bump.

use bincode::config;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::crypto::cipher;
use crate::crypto::keys::VaultKey;
use crate::error::{VaultError, VaultResult};
use crate::model::AccountRecord;
use crate::store::is_pinned_prefix;

pub const SCHEMA_VERSION: u16 = 1;
const HEADER_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Database,
    Settings,
}

impl DocumentKind {
    fn magic(self) -> &'static [u8; 4] {
        match self {
            DocumentKind::Database => b"AVDB",
            DocumentKind::Settings => b"AVCF",
        }
    }
}

#[derive(Serialize)]
struct VaultDocumentRef<'a> {
    accounts: &'a [AccountRecord],
}

#[derive(Deserialize)]
struct VaultDocument {
    accounts: Vec<AccountRecord>,
}

/// Serializes `body` as a `kind` document and seals it under `key`.
pub fn encode_document<T: Serialize>(kind: DocumentKind, body: &T, key: &VaultKey) -> VaultResult<Vec<u8>> {
    let encoded = bincode::serde::encode_to_vec(body, config::standard())
        .map_err(|e| VaultError::CorruptData(format!("serialization failed: {e}")))?;
    let mut plaintext = Vec::with_capacity(HEADER_LEN + encoded.len());
    plaintext.extend_from_slice(kind.magic());
    plaintext.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    plaintext.extend_from_slice(&encoded);
    cipher::seal(key, &plaintext)
}

/// Opens a sealed `kind` document. Anything that is not exactly one body of
/// the current schema is rejected.
pub fn decode_document<T: DeserializeOwned>(kind: DocumentKind, blob: &[u8], key: &VaultKey) -> VaultResult<T> {
    let plaintext = cipher::open(key, blob)?;
    if plaintext.len() < HEADER_LEN {
        return Err(VaultError::CorruptData("document header missing".to_string()));
    }
    let (header, body) = plaintext.split_at(HEADER_LEN);
    if &header[..4] != kind.magic() {
        return Err(VaultError::CorruptData(format!("not a {kind:?} document")));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != SCHEMA_VERSION {
        return Err(VaultError::CorruptData(format!("unsupported schema version {version}")));
    }

    let (value, consumed) = bincode::serde::decode_from_slice::<T, _>(body, config::standard())
        .map_err(|e| VaultError::CorruptData(format!("malformed body: {e}")))?;
    if consumed != body.len() {
        return Err(VaultError::CorruptData(format!(
            "{} trailing bytes after body",
            body.len() - consumed
        )));
    }
    Ok(value)
}

/// Encodes a vault snapshot.
pub fn encode_vault(records: &[AccountRecord], key: &VaultKey) -> VaultResult<Vec<u8>> {
    encode_document(DocumentKind::Database, &VaultDocumentRef { accounts: records }, key)
}

/// Decodes a vault snapshot and validates every record and the pinned prefix.
pub fn decode_vault(blob: &[u8], key: &VaultKey) -> VaultResult<Vec<AccountRecord>> {
    let document: VaultDocument = decode_document(DocumentKind::Database, blob, key)?;
    for record in &document.accounts {
        record.validate()?;
    }
    if !is_pinned_prefix(&document.accounts) {
        return Err(VaultError::CorruptData("pinned records are not a contiguous prefix".to_string()));
    }
    Ok(document.accounts)
}
