//! File-backed user storage
//!
//! One pretty-printed JSON file per user, named after the hex-encoded username
//! so arbitrary usernames map to safe file names. Usernames too long for that
//! are named by their SHA-256 instead. Records are loaded on first access and
//! cached; the file is rewritten (tmp + rename) only when the credentials or
//! the user handle changed, and the cache only takes the change once the file
//! is written. Pending challenges stay in memory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::memory::MemoryUserStore;
use super::{StorageError, StorageResult, UserRecord, UserRepository};

/// Longest username (in bytes) stored under its hex encoding. Keeps
/// `<hex>.json.tmp` within the usual 255-byte file name limit.
const MAX_HEX_NAME_BYTES: usize = 100;

/// File stem for a user. Hashed stems carry a non-hex prefix so they never
/// collide with hex-encoded ones.
fn file_stem(username: &str) -> String {
    if username.len() <= MAX_HEX_NAME_BYTES {
        hex::encode(username)
    } else {
        format!(
            "sha256-{}",
            hex::encode(openssl::sha::sha256(username.as_bytes()))
        )
    }
}

pub struct FileUserStore {
    dir: PathBuf,
    cache: MemoryUserStore,
}

impl FileUserStore {
    /// Open (and create if missing) a store directory.
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            cache: MemoryUserStore::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, username: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(username)))
    }

    fn load(&self, username: &str) -> StorageResult<UserRecord> {
        let path = self.path_for(username);
        match fs::read(&path) {
            Ok(bytes) => {
                let mut record: UserRecord = serde_json::from_slice(&bytes)?;
                record.username = username.to_string();
                tracing::debug!(username, path = %path.display(), "Loaded user record");
                Ok(record)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(UserRecord::new(username)),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, record: &UserRecord) -> StorageResult<()> {
        let path = self.path_for(&record.username);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!(
            username = %record.username,
            credentials = record.credentials.len(),
            "Persisted user record"
        );
        Ok(())
    }
}

impl UserRepository for FileUserStore {
    fn with_user<T>(
        &self,
        username: &str,
        f: impl FnOnce(&mut UserRecord) -> T,
    ) -> StorageResult<T> {
        let slot = self
            .cache
            .slot_or_try_insert_with(username, || self.load(username))?;
        let mut record = slot
            .lock()
            .map_err(|_| StorageError::Poisoned(username.to_string()))?;

        // A failed write must leave the cached record (challenges included) as it was
        let mut staged = record.clone();
        let out = f(&mut staged);
        if staged.user_handle != record.user_handle || staged.credentials != record.credentials {
            self.persist(&staged)?;
        }
        *record = staged;
        Ok(out)
    }
}

impl std::fmt::Debug for FileUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileUserStore")
            .field("dir", &self.dir)
            .field("cached_users", &self.cache.user_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unchanged_record_is_not_written() {
        let dir = TempDir::new().unwrap();
        let store = FileUserStore::open(dir.path()).unwrap();

        store.with_user("alice", |_| ()).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_user_handle_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileUserStore::open(dir.path()).unwrap();
            store
                .with_user("alice@example.com", |record| {
                    record.user_handle = Some([0xAB; 16])
                })
                .unwrap();
        }

        let reopened = FileUserStore::open(dir.path()).unwrap();
        let handle = reopened
            .with_user("alice@example.com", |record| record.user_handle)
            .unwrap();
        assert_eq!(handle, Some([0xAB; 16]));
    }

    #[test]
    fn test_file_name_is_hex_username() {
        let dir = TempDir::new().unwrap();
        let store = FileUserStore::open(dir.path()).unwrap();
        store
            .with_user("../evil", |record| record.user_handle = Some([1; 16]))
            .unwrap();

        let expected = dir.path().join(format!("{}.json", hex::encode("../evil")));
        assert!(expected.exists());
    }

    #[test]
    fn test_failed_write_keeps_cached_record() {
        let dir = TempDir::new().unwrap();
        let store_dir = dir.path().join("users");
        let store = FileUserStore::open(&store_dir).unwrap();
        store
            .with_user("alice", |record| record.user_handle = Some([1; 16]))
            .unwrap();

        fs::remove_dir_all(&store_dir).unwrap();
        let err = store
            .with_user("alice", |record| record.user_handle = Some([2; 16]))
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));

        let handle = store.with_user("alice", |record| record.user_handle).unwrap();
        assert_eq!(handle, Some([1; 16]));
    }

    #[test]
    fn test_long_username_gets_hashed_file_name() {
        let dir = TempDir::new().unwrap();
        let username = "a".repeat(130);
        {
            let store = FileUserStore::open(dir.path()).unwrap();
            store
                .with_user(&username, |record| record.user_handle = Some([7; 16]))
                .unwrap();
        }

        let name = fs::read_dir(dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .file_name()
            .into_string()
            .unwrap();
        assert!(name.starts_with("sha256-"));
        assert!(name.len() < 255);

        let reopened = FileUserStore::open(dir.path()).unwrap();
        let handle = reopened
            .with_user(&username, |record| record.user_handle)
            .unwrap();
        assert_eq!(handle, Some([7; 16]));
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(format!("{}.json", hex::encode("bob"))),
            b"not json",
        )
        .unwrap();

        let store = FileUserStore::open(dir.path()).unwrap();
        let err = store.with_user("bob", |_| ()).unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
