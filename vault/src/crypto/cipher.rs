//! Blob sealing: AES-256-CBC with a fresh random IV per call, authenticated with
//! HMAC-SHA256 over IV and ciphertext (encrypt-then-MAC).
//!
//! ```text
//! [iv: 16][ciphertext: n * 16][tag: 32]
//! ```
//!
//! Encryption and MAC keys are separate HKDF expansions of the vault key, so
//! the raw vault key is never used directly by either primitive.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::crypto::integrity::{hkdf_expand, hmac_sha256, verify_hmac_sha256, TAG_LEN};
use crate::crypto::keys::{VaultKey, KEY_LEN};
use crate::error::{VaultError, VaultResult};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;
const SUBKEY_SALT: &[u8] = b"account-vault/blob";
const SUBKEY_INFO: &[u8] = b"aes-256-cbc+hmac-sha256";

struct Subkeys {
    enc: [u8; KEY_LEN],
    mac: [u8; KEY_LEN],
}

impl Subkeys {
    fn derive(key: &VaultKey) -> VaultResult<Self> {
        let mut okm = hkdf_expand(key.as_bytes(), SUBKEY_SALT, SUBKEY_INFO, KEY_LEN * 2)
            .map_err(|e| VaultError::KeyDerivation(format!("{e}")))?;
        let mut enc = [0u8; KEY_LEN];
        let mut mac = [0u8; KEY_LEN];
        enc.copy_from_slice(&okm[..KEY_LEN]);
        mac.copy_from_slice(&okm[KEY_LEN..]);
        okm.zeroize();
        Ok(Self { enc, mac })
    }
}

impl Drop for Subkeys {
    fn drop(&mut self) {
        self.enc.zeroize();
        self.mac.zeroize();
    }
}

/// Encrypts `plaintext` under `key`. Every call draws a new IV.
pub fn seal(key: &VaultKey, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
    let subkeys = Subkeys::derive(key)?;
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new_from_slices(&subkeys.enc, &iv)
        .map_err(|e| VaultError::KeyDerivation(format!("{e}")))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let tag = hmac_sha256(&subkeys.mac, &[&iv, &ciphertext])
        .map_err(|e| VaultError::KeyDerivation(format!("{e}")))?;

    let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len() + TAG_LEN);
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    blob.extend_from_slice(&tag);
    Ok(blob)
}

/// Authenticates and decrypts a blob produced by [`seal`].
pub fn open(key: &VaultKey, blob: &[u8]) -> VaultResult<Vec<u8>> {
    if blob.len() < IV_LEN {
        return Err(VaultError::TruncatedStream {
            expected: IV_LEN,
            actual: blob.len(),
        });
    }
    let (iv, rest) = blob.split_at(IV_LEN);
    if rest.len() < BLOCK_LEN + TAG_LEN || (rest.len() - TAG_LEN) % BLOCK_LEN != 0 {
        return Err(VaultError::AuthenticationFailed);
    }
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

    let subkeys = Subkeys::derive(key)?;
    let authentic = verify_hmac_sha256(&subkeys.mac, &[iv, ciphertext], tag)
        .map_err(|e| VaultError::KeyDerivation(format!("{e}")))?;
    if !authentic {
        return Err(VaultError::AuthenticationFailed);
    }

    Aes256CbcDec::new_from_slices(&subkeys.enc, iv)
        .map_err(|e| VaultError::KeyDerivation(format!("{e}")))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| VaultError::CorruptData("invalid block padding".to_string()))
}

#[cfg(test)]
mod tests {
    use super::{open, seal, IV_LEN};
    use crate::crypto::integrity::TAG_LEN;
    use crate::crypto::keys::VaultKey;
    use crate::error::VaultError;

    fn key(byte: u8) -> VaultKey {
        VaultKey::from_bytes(&[byte; 32]).expect("valid key")
    }

    #[test]
    fn seals_and_opens() {
        let blob = seal(&key(42), b"secret-token").expect("seal");
        assert_eq!(blob.len(), IV_LEN + 16 + TAG_LEN);
        assert_eq!(open(&key(42), &blob).expect("open"), b"secret-token");
    }

    #[test]
    fn empty_plaintext_still_pads_to_a_block() {
        let blob = seal(&key(1), b"").expect("seal");
        assert_eq!(blob.len(), IV_LEN + 16 + TAG_LEN);
        assert!(open(&key(1), &blob).expect("open").is_empty());
    }

    #[test]
    fn fresh_iv_per_call() {
        let a = seal(&key(7), b"payload").expect("seal");
        let b = seal(&key(7), b"payload").expect("seal");
        assert_ne!(a, b);
        assert_ne!(a[..IV_LEN], b[..IV_LEN]);
    }

    #[test]
    fn wrong_key_is_an_authentication_failure() {
        let blob = seal(&key(7), b"payload").expect("seal");
        assert!(matches!(open(&key(8), &blob), Err(VaultError::AuthenticationFailed)));
    }

    #[test]
    fn tampering_is_an_authentication_failure() {
        let mut blob = seal(&key(7), b"a somewhat longer payload").expect("seal");
        blob[IV_LEN + 3] ^= 0x01;
        assert!(matches!(open(&key(7), &blob), Err(VaultError::AuthenticationFailed)));

        let mut blob = seal(&key(7), b"payload").expect("seal");
        blob[0] ^= 0x80;
        assert!(matches!(open(&key(7), &blob), Err(VaultError::AuthenticationFailed)));
    }

    #[test]
    fn short_inputs() {
        let err = open(&key(7), &[0u8; 5]).unwrap_err();
        assert!(matches!(err, VaultError::TruncatedStream { expected: 16, actual: 5 }));

        let blob = seal(&key(7), b"payload").expect("seal");
        let cut = &blob[..blob.len() - 1];
        assert!(matches!(open(&key(7), cut), Err(VaultError::AuthenticationFailed)));
        assert!(matches!(open(&key(7), &blob[..IV_LEN]), Err(VaultError::AuthenticationFailed)));
    }
}
