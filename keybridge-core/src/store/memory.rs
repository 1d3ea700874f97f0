//! In-memory user storage
//!
//! Each user sits behind its own mutex inside a `DashMap`, so locking one user
//! never blocks another.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use super::{StorageError, StorageResult, UserRecord, UserRepository};

type Slot = Arc<Mutex<UserRecord>>;

#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<String, Slot>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the user's slot, building it with `load` if it does not exist yet.
    ///
    /// The map shard guard is released before the slot is returned, so the
    /// caller can lock the user without holding any map lock.
    pub(crate) fn slot_or_try_insert_with(
        &self,
        username: &str,
        load: impl FnOnce() -> StorageResult<UserRecord>,
    ) -> StorageResult<Slot> {
        if let Some(existing) = self.users.get(username) {
            return Ok(Arc::clone(existing.value()));
        }
        let entry = self
            .users
            .entry(username.to_string())
            .or_try_insert_with(|| load().map(|record| Arc::new(Mutex::new(record))))?;
        Ok(Arc::clone(entry.value()))
    }

    /// Whether a record exists for `username`.
    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    /// Get number of known users
    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl UserRepository for MemoryUserStore {
    fn with_user<T>(
        &self,
        username: &str,
        f: impl FnOnce(&mut UserRecord) -> T,
    ) -> StorageResult<T> {
        let slot = self.slot_or_try_insert_with(username, || Ok(UserRecord::new(username)))?;
        let mut record = slot
            .lock()
            .map_err(|_| StorageError::Poisoned(username.to_string()))?;
        Ok(f(&mut record))
    }
}

impl std::fmt::Debug for MemoryUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryUserStore")
            .field("users", &self.users.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_users_created_lazily() {
        let store = MemoryUserStore::new();
        assert_eq!(store.user_count(), 0);
        assert!(!store.contains("alice"));

        store.with_user("alice", |_| ()).unwrap();
        assert!(store.contains("alice"));
        assert_eq!(store.user_count(), 1);
    }

    #[test]
    fn test_changes_persist_between_calls() {
        let store = MemoryUserStore::new();
        store
            .with_user("bob", |record| record.user_handle = Some([1u8; 16]))
            .unwrap();
        let handle = store.with_user("bob", |record| record.user_handle).unwrap();
        assert_eq!(handle, Some([1u8; 16]));
    }

    #[test]
    fn test_concurrent_updates_serialize_per_user() {
        let store = MemoryUserStore::new();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        store
                            .with_user("counter", |record| {
                                let mut handle = record.user_handle.unwrap_or([0u8; 16]);
                                handle[0] = handle[0].wrapping_add(1);
                                handle[1] = handle[1].wrapping_add(u8::from(handle[0] == 0));
                                record.user_handle = Some(handle);
                            })
                            .unwrap();
                    }
                });
            }
        });

        let handle = store
            .with_user("counter", |record| record.user_handle)
            .unwrap()
            .unwrap();
        let total = u16::from(handle[0]) + u16::from(handle[1]) * 256;
        assert_eq!(total, 800);
    }
}
