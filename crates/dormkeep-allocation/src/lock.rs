//! Per-entity lock table.
//!
//! Each mutating operation names the keys it touches and acquires all of
//! them before reading state it will act on. Keys are taken in the
//! `Ord` order of [`LockKey`], so two operations that share keys always
//! contend on the same first key and can't deadlock.
//!
//! Slots are created on demand and pruned when the last holder lets go,
//! so the table only ever holds entries for keys someone is using.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use dormkeep_protocol::{RoomId, StudentId};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::AllocationError;

/// Something an operation needs exclusive use of.
///
/// The namespace keys (`RoomNumber`, `Email`) serialise uniqueness
/// checks: two creations claiming the same room number queue behind one
/// another instead of both seeing it free.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum LockKey {
    RoomNumber(String),
    Email(String),
    Room(RoomId),
    Student(StudentId),
}

type Slot = Arc<AsyncMutex<()>>;

/// The set of lock slots currently in use.
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    slots: Mutex<HashMap<LockKey, Slot>>,
}

impl LockTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Acquires every key in `keys`, in order, giving up at `deadline`.
    ///
    /// On timeout, keys acquired so far are released and
    /// [`AllocationError::Busy`] is returned.
    pub(crate) async fn acquire(
        &self,
        operation: &'static str,
        keys: BTreeSet<LockKey>,
        deadline: Instant,
    ) -> Result<LockGuard<'_>, AllocationError> {
        let mut guard = LockGuard {
            table: self,
            held: Vec::with_capacity(keys.len()),
        };

        for key in keys {
            let waited =
                tokio::time::timeout_at(deadline, self.slot(&key).lock_owned()).await;
            match waited {
                Ok(held) => guard.held.push((key, held)),
                Err(_) => {
                    tracing::warn!(operation, ?key, "lock wait timed out");
                    self.prune([key]);
                    return Err(AllocationError::Busy { operation });
                }
            }
        }

        Ok(guard)
    }

    /// Number of live slots.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.table().len()
    }

    fn slot(&self, key: &LockKey) -> Slot {
        Arc::clone(self.table().entry(key.clone()).or_default())
    }

    /// Drops slots for `keys` that nobody else references.
    fn prune(&self, keys: impl IntoIterator<Item = LockKey>) {
        let mut slots = self.table();
        for key in keys {
            if slots.get(&key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
                slots.remove(&key);
            }
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<LockKey, Slot>> {
        // The map is only touched in short, panic-free sections; a poisoned
        // lock still holds a usable map.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds a set of acquired keys. Dropping it releases them all.
pub(crate) struct LockGuard<'a> {
    table: &'a LockTable,
    held: Vec<(LockKey, OwnedMutexGuard<()>)>,
}

impl LockGuard<'_> {
    pub(crate) fn holds(&self, key: &LockKey) -> bool {
        self.held.iter().any(|(k, _)| k == key)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let keys: Vec<LockKey> = self
            .held
            .drain(..)
            .map(|(key, guard)| {
                drop(guard);
                key
            })
            .collect();
        self.table.prune(keys);
    }
}
