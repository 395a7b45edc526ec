//! Per-room async locks.
//!
//! Every read-modify-write of a room, and every broadcast it triggers,
//! happens under that room's lock. This serializes operations on one room
//! (so broadcasts keep acceptance order) while unrelated rooms proceed in
//! parallel. The retention sweeper takes the same locks before purging.
//!
//! The same table also serializes connect and disconnect of one user, and
//! direct-room creation for one pair of users. Entries are removed once the
//! last holder or waiter lets go.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Guard held for the duration of a room operation.
#[derive(Debug)]
pub struct RoomGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    table: Arc<LockTable>,
}

impl Drop for RoomGuard {
    fn drop(&mut self) {
        // Release first so our own reference no longer counts.
        self.guard.take();
        self.table
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Lazily created lock per key.
#[derive(Debug, Default)]
pub struct RoomLocks {
    table: Arc<LockTable>,
}

impl RoomLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting for any operation in progress.
    pub async fn lock(&self, key: &str) -> RoomGuard {
        // Cloned under the shard lock, so a concurrent drop never removes
        // an entry someone is about to wait on.
        let lock = self
            .table
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        RoomGuard {
            guard: Some(guard),
            key: key.to_string(),
            table: Arc::clone(&self.table),
        }
    }

    /// Lock key for the direct room of two users, independent of order.
    #[must_use]
    pub fn direct_key(a: &str, b: &str) -> String {
        if a <= b {
            format!("direct:{a}:{b}")
        } else {
            format!("direct:{b}:{a}")
        }
    }

    /// Lock key for one user's connection lifecycle.
    #[must_use]
    pub fn user_key(user_id: &str) -> String {
        format!("user:{user_id}")
    }

    /// Number of keys currently held or waited on.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
