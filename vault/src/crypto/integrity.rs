//! HMAC and HKDF helpers. Both the blob codec (encrypt-then-MAC subkeys) and the
//! device key derivation go through here so there is a single place that owns
//! the SHA-256 constructions.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

pub const TAG_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("hkdf expansion failed: {0}")]
    HkdfFailed(String),
    #[error("hmac failed: {0}")]
    HmacFailed(String),
}

type HmacSha256 = Hmac<Sha256>;

/// Generates an HMAC-SHA256 tag over the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; TAG_LEN], IntegrityError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| IntegrityError::HmacFailed(format!("{e}")))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Checks `tag` against the HMAC of `parts` in constant time.
pub fn verify_hmac_sha256(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<bool, IntegrityError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| IntegrityError::HmacFailed(format!("{e}")))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.verify_slice(tag).is_ok())
}

/// Derives key material using HKDF-SHA256.
pub fn hkdf_expand(input_key_material: &[u8], salt: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>, IntegrityError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), input_key_material);
    let mut okm = vec![0u8; length];
    hk.expand(info, &mut okm)
        .map_err(|e| IntegrityError::HkdfFailed(format!("{e}")))?;
    Ok(okm)
}
