//! Keyed asynchronous mutual exclusion.
//!
//! A [`KeyedLock`] hands out one binary lock per key, created on demand:
//! callers acquiring the same key are serialized, callers on different keys
//! proceed concurrently, and the per-key state is evicted from the internal
//! table at the exact moment nobody holds or awaits that key.
//!
//! Waiting suspends the task on a 1-permit `tokio::sync::Semaphore`; it never
//! blocks a thread. A pending wait can be abandoned at any point, either by
//! dropping the `acquire` future or through a [`CancellationToken`], and the
//! bookkeeping is rolled back without disturbing the current holder.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use latchkey::KeyedLock;
//!
//! let lock = KeyedLock::<String>::new();
//! let guard = lock.acquire("user:42".to_owned()).await.unwrap();
//! // ... exclusive per-key section ...
//! drop(guard);
//! assert!(!lock.is_in_use(&"user:42".to_owned()));
//! # }
//! ```
//!
//! ## Lifecycle protocol
//!
//! Each entry carries a reference count (holders plus waiters) and a dead
//! flag under an entry-local `parking_lot::Mutex`. The count reaching zero,
//! the dead mark, and removal from the table happen as one indivisible step;
//! a dead entry is never revived, and an acquirer that loses that race simply
//! inserts a fresh entry. See `table.rs` for the retry loop.
//!
//! Key comparison is a per-instance configuration point; see
//! [`policy`] for case-sensitive and case-insensitive string policies.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tracing::trace;

mod entry;
mod error;
mod guard;
pub mod policy;
mod table;

use entry::Entry;
use table::Table;

pub use error::AcquireError;
pub use guard::KeyGuard;
pub use policy::{CaseInsensitive, CaseSensitive, KeyPolicy, Verbatim};
pub use tokio_util::sync::CancellationToken;

/// Async lock partitioned by key.
///
/// Cheap to clone; clones share the same lock table. The policy `P` fixes the
/// key equality rule for the lifetime of the instance.
pub struct KeyedLock<K, P = Verbatim> {
    table: Arc<Table<K>>,
    policy: P,
}

impl<K> KeyedLock<K, Verbatim>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// A keyed lock comparing keys verbatim.
    pub fn new() -> Self {
        Self::with_policy(Verbatim)
    }
}

impl<K> Default for KeyedLock<K, Verbatim>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> KeyedLock<K, P>
where
    K: Eq + Hash + Clone + fmt::Debug,
    P: KeyPolicy<K>,
{
    /// A keyed lock with an explicit key policy, e.g.
    /// [`CaseInsensitive`] for string keys.
    pub fn with_policy(policy: P) -> Self {
        Self {
            table: Arc::new(Table::new()),
            policy,
        }
    }

    /// Acquires the lock for `key`, suspending until it is free.
    ///
    /// Cancel-safe: dropping the returned future before it resolves abandons
    /// the wait and rolls the reference count back; the current holder and
    /// other waiters are unaffected.
    ///
    /// # Errors
    ///
    /// [`AcquireError::InvalidKey`] if the key policy rejects `key` (checked
    /// before any table mutation); [`AcquireError::Closed`] if the lock was
    /// closed before or while waiting.
    pub async fn acquire(&self, key: K) -> Result<KeyGuard<K>, AcquireError> {
        let entry = self.register(&key)?;
        let mut rollback = Rollback::arm(&self.table, &entry);
        // Forget the permit as soon as it is granted; the guard returns it
        // explicitly on release. On failure the rollback guard undoes the
        // registration.
        entry
            .sem()
            .acquire()
            .await
            .map(|permit| permit.forget())
            .map_err(|_| AcquireError::Closed)?;
        rollback.disarm();
        Ok(self.guard(entry))
    }

    /// Like [`acquire`](Self::acquire), but also gives up when `cancel`
    /// fires, returning [`AcquireError::Cancelled`].
    ///
    /// Cancellation before the permit is granted never consumes or releases
    /// a permit and never evicts an entry that still has holders or waiters.
    pub async fn acquire_with_cancel(
        &self,
        key: K,
        cancel: &CancellationToken,
    ) -> Result<KeyGuard<K>, AcquireError> {
        if cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }
        let entry = self.register(&key)?;
        let mut rollback = Rollback::arm(&self.table, &entry);
        let outcome = tokio::select! {
            res = entry.sem().acquire() => res
                .map(|permit| permit.forget())
                .map_err(|_| AcquireError::Closed),
            _ = cancel.cancelled() => Err(AcquireError::Cancelled),
        };
        outcome?;
        rollback.disarm();
        Ok(self.guard(entry))
    }

    /// Best-effort probe: is some caller currently holding or awaiting `key`?
    pub fn is_in_use(&self, key: &K) -> bool {
        self.policy.validate(key) && self.table.is_in_use(&self.policy.canonical(key))
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// Tears the lock down: pending waiters wake with
    /// [`AcquireError::Closed`], subsequent acquires fail fast, and the table
    /// is cleared. Outstanding guards stay valid and release normally.
    pub fn close(&self) {
        self.table.close();
    }

    fn register(&self, key: &K) -> Result<Arc<Entry<K>>, AcquireError> {
        if !self.policy.validate(key) {
            return Err(AcquireError::InvalidKey);
        }
        if self.table.is_closed() {
            return Err(AcquireError::Closed);
        }
        Ok(self.table.get_or_create(self.policy.canonical(key)))
    }

    fn guard(&self, entry: Arc<Entry<K>>) -> KeyGuard<K> {
        KeyGuard::new(entry.key().clone(), Arc::clone(&self.table), entry)
    }
}

impl<K, P: Clone> Clone for KeyedLock<K, P> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            policy: self.policy.clone(),
        }
    }
}

impl<K, P> fmt::Debug for KeyedLock<K, P>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLock")
            .field("keys", &self.table.len())
            .finish_non_exhaustive()
    }
}

/// Undoes a registered-but-unserved wait exactly once.
///
/// Armed between `get_or_create` and the permit being secured. Whatever ends
/// the wait early (explicit cancellation, semaphore closure, or the acquire
/// future being dropped), the drop of this guard decrements the reference
/// count without signalling, since no permit was ever consumed.
struct Rollback<'t, K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    table: &'t Table<K>,
    entry: Option<Arc<Entry<K>>>,
}

impl<'t, K> Rollback<'t, K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn arm(table: &'t Table<K>, entry: &Arc<Entry<K>>) -> Self {
        Self {
            table,
            entry: Some(Arc::clone(entry)),
        }
    }

    fn disarm(&mut self) {
        self.entry = None;
    }
}

impl<K> Drop for Rollback<'_, K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            trace!(key = ?entry.key(), "wait abandoned, rolling back");
            self.table.release_no_signal(&entry);
        }
    }
}
