//! User repository
//!
//! Provides storage for:
//! - **Credentials** and the WebAuthn user handle: persisted by [`FileUserStore`]
//!   (one JSON file per user) or kept in memory by [`MemoryUserStore`].
//! - **Pending challenges**: always in memory. They are short-lived and never
//!   written to disk.
//!
//! All access to a user's state goes through [`UserRepository::with_user`], which
//! runs a closure under that user's lock. Different users never contend.

mod file;
mod memory;

pub use file::FileUserStore;
pub use memory::MemoryUserStore;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::challenge::PendingChallenges;
use crate::registry::CredentialSet;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lock for user '{0}' was poisoned by a panicking thread")]
    Poisoned(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Everything the relying party knows about one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    /// WebAuthn user handle, created on the first WebAuthn registration request.
    #[serde(default, with = "crate::encoding::b64_opt_array16")]
    pub user_handle: Option<[u8; 16]>,
    #[serde(default)]
    pub credentials: CredentialSet,
    #[serde(skip)]
    pub challenges: PendingChallenges,
}

impl UserRecord {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            user_handle: None,
            credentials: CredentialSet::default(),
            challenges: PendingChallenges::default(),
        }
    }
}

/// Per-user locked access to [`UserRecord`]s.
///
/// Unknown usernames get a fresh record on first access. Implementations must
/// hold the user's lock for the whole closure and release it afterwards; the
/// closure must not block on hardware.
pub trait UserRepository: Send + Sync {
    fn with_user<T>(
        &self,
        username: &str,
        f: impl FnOnce(&mut UserRecord) -> T,
    ) -> StorageResult<T>;
}

/// Repository backend picked at startup.
pub enum UserStore {
    /// JSON files on disk
    File(FileUserStore),
    /// In-memory storage (lost on exit)
    Memory(MemoryUserStore),
}

impl UserStore {
    /// Open a file-backed store rooted at `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        Ok(Self::File(FileUserStore::open(dir)?))
    }

    /// Create storage with in-memory backend
    pub fn in_memory() -> Self {
        tracing::warn!("Using in-memory user storage - credentials will be lost on exit!");
        Self::Memory(MemoryUserStore::new())
    }

    /// Create storage from environment
    ///
    /// Uses `KEYBRIDGE_STORE_DIR` if set, otherwise falls back to in-memory.
    pub fn from_env() -> StorageResult<Self> {
        match std::env::var("KEYBRIDGE_STORE_DIR") {
            Ok(dir) if !dir.is_empty() => {
                tracing::info!(dir = %dir, "Using file-backed user storage");
                Self::open(dir)
            }
            _ => Ok(Self::in_memory()),
        }
    }

    /// Check if using persistent storage
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

impl UserRepository for UserStore {
    fn with_user<T>(
        &self,
        username: &str,
        f: impl FnOnce(&mut UserRecord) -> T,
    ) -> StorageResult<T> {
        match self {
            Self::File(store) => store.with_user(username, f),
            Self::Memory(store) => store.with_user(username, f),
        }
    }
}

impl std::fmt::Debug for UserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(store) => store.fmt(f),
            Self::Memory(store) => store.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_is_not_persistent() {
        let store = UserStore::in_memory();
        assert!(!store.is_persistent());

        let name = store
            .with_user("alice", |record| record.username.clone())
            .unwrap();
        assert_eq!(name, "alice");
    }

    #[test]
    fn test_record_serialization_skips_challenges() {
        let mut record = UserRecord::new("alice");
        record.user_handle = Some([9u8; 16]);

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"username\":\"alice\""));
        assert!(!json.contains("challenges"));

        let back: UserRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.user_handle, Some([9u8; 16]));
    }
}
