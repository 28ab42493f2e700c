//! Cryptography for the vault: key derivation, blob sealing, and the HMAC/HKDF
//! helpers both build on. Each submodule owns one concern so the security model
//! stays easy to audit.

pub mod cipher;
pub mod integrity;
pub mod keys;
