//! Encrypted local credential vault.
//!
//! Account records live in an ordered [`store::VaultStore`] with a pinned
//! prefix. Snapshots are sealed by [`codec`] (AES-256-CBC with an HMAC-SHA256
//! tag) and written through [`storage::Database`], either immediately or
//! through the debounced [`scheduler::SaveScheduler`]. [`session::Session`]
//! ties these together for one open vault.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod search;
pub mod session;
pub mod settings;
pub mod storage;
pub mod store;

pub use crypto::keys::VaultKey;
pub use error::{VaultError, VaultResult};
pub use model::AccountRecord;
pub use session::Session;
pub use store::VaultStore;
