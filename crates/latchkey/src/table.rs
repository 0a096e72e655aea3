use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tracing::{debug, trace};

use crate::entry::Entry;

/// Concurrent key → entry map plus the lifecycle protocol that keeps entries
/// consistent under arbitrary acquire/release traffic.
///
/// Lock order: an entry's meta lock may be taken while no map shard is held,
/// and a map shard may be taken while an entry's meta lock is held (eviction),
/// never the other way around. `get_or_create` therefore always drops its
/// shard guard before touching entry bookkeeping.
pub(crate) struct Table<K> {
    entries: DashMap<K, Arc<Entry<K>>>,
    closed: AtomicBool,
}

impl<K> Table<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Looks up the entry for `key`, creating it if absent. Never fails and
    /// never suspends.
    ///
    /// The loop exists because eviction and insertion race freely: a looked-up
    /// entry may die before we can retain it, and an insert may lose to a
    /// concurrent creator whose entry may in turn already be dying. We keep
    /// going until we either retain a live entry or win an insert.
    pub(crate) fn get_or_create(&self, key: K) -> Arc<Entry<K>> {
        loop {
            if let Some(found) = self.entries.get(&key) {
                let entry = Arc::clone(found.value());
                drop(found);
                if entry.try_retain() {
                    return entry;
                }
                // Found it mid-eviction; fall through and replace it.
            }

            let fresh = Arc::new(Entry::new(key.clone()));
            match self.entries.entry(key.clone()) {
                MapEntry::Vacant(slot) => {
                    slot.insert(Arc::clone(&fresh));
                    trace!(key = ?fresh.key(), "created lock entry");
                    return fresh;
                }
                MapEntry::Occupied(slot) => {
                    let winner = Arc::clone(slot.get());
                    drop(slot);
                    if winner.try_retain() {
                        return winner;
                    }
                    // The winner died before we could retain it; retry.
                }
            }
        }
    }

    /// Drops one reference and returns the held permit to the semaphore.
    pub(crate) fn release(&self, entry: &Arc<Entry<K>>) {
        self.unref(entry, true);
    }

    /// Drops one reference without signalling: the caller registered interest
    /// but never consumed a permit (cancelled or failed while waiting).
    pub(crate) fn release_no_signal(&self, entry: &Arc<Entry<K>>) {
        self.unref(entry, false);
    }

    fn unref(&self, entry: &Arc<Entry<K>>, signal: bool) {
        let evicted = entry.with_meta(|refs, dead| {
            if *refs == 1 {
                // Last reference: evict, mark dead, and zero the count as one
                // indivisible step. The map may already hold a newer entry for
                // this key, so only remove our exact instance.
                self.entries
                    .remove_if(entry.key(), |_, current| Arc::ptr_eq(current, entry));
                *refs = 0;
                *dead = true;
                true
            } else {
                *refs -= 1;
                false
            }
        });
        if evicted {
            trace!(key = ?entry.key(), "evicted lock entry");
        }
        // Signal outside the meta lock: a woken waiter must never contend on
        // entry bookkeeping just to get going.
        if signal {
            entry.sem().add_permits(1);
        }
    }

    /// Best-effort probe: is some caller currently holding or awaiting `key`?
    pub(crate) fn is_in_use(&self, key: &K) -> bool {
        match self.entries.get(key) {
            Some(found) => {
                let entry = Arc::clone(found.value());
                drop(found);
                !entry.is_dead()
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Teardown: wake every pending waiter with a closed error and drop the
    /// table's references. Best-effort by design; outstanding guards keep
    /// their entries alive through their own `Arc`s and release normally.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for item in self.entries.iter() {
            item.value().sem().close();
        }
        self.entries.clear();
        debug!("keyed lock closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_retain_counts_references() {
        let table: Table<String> = Table::new();
        let first = table.get_or_create("a".to_owned());
        assert_eq!(first.refs(), 1);
        let second = table.get_or_create("a".to_owned());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.refs(), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn last_release_evicts_and_kills() {
        let table: Table<String> = Table::new();
        let entry = table.get_or_create("a".to_owned());
        let again = table.get_or_create("a".to_owned());
        table.release_no_signal(&again);
        assert_eq!(table.len(), 1);
        assert!(!entry.is_dead());
        table.release_no_signal(&entry);
        assert_eq!(table.len(), 0);
        assert!(entry.is_dead());
        assert!(!entry.try_retain());
    }

    #[test]
    fn dead_entry_is_replaced_not_revived() {
        let table: Table<String> = Table::new();
        let old = table.get_or_create("a".to_owned());
        table.release_no_signal(&old);
        let fresh = table.get_or_create("a".to_owned());
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert!(!fresh.is_dead());
        assert_eq!(fresh.refs(), 1);
    }

    #[test]
    fn release_returns_the_permit_and_no_signal_does_not() {
        let table: Table<String> = Table::new();
        let entry = table.get_or_create("a".to_owned());
        let waiter = table.get_or_create("a".to_owned());

        let permit = entry.sem().try_acquire().expect("permit available");
        permit.forget();
        assert_eq!(entry.sem().available_permits(), 0);

        // Cancelled waiter: reference goes away, permit count untouched.
        table.release_no_signal(&waiter);
        assert_eq!(entry.sem().available_permits(), 0);

        // Holder release: permit comes back.
        table.release(&entry);
        assert_eq!(entry.sem().available_permits(), 1);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn stale_release_does_not_remove_newer_entry() {
        let table: Table<String> = Table::new();
        let old = table.get_or_create("a".to_owned());
        table.release_no_signal(&old);
        let fresh = table.get_or_create("a".to_owned());
        // A second release of a reference to the dead entry must not touch
        // the fresh mapping.
        old.with_meta(|refs, _| *refs = 1);
        table.release_no_signal(&old);
        assert_eq!(table.len(), 1);
        assert!(table.is_in_use(&"a".to_owned()));
        table.release_no_signal(&fresh);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn is_in_use_tracks_presence() {
        let table: Table<String> = Table::new();
        assert!(!table.is_in_use(&"a".to_owned()));
        let entry = table.get_or_create("a".to_owned());
        assert!(table.is_in_use(&"a".to_owned()));
        table.release_no_signal(&entry);
        assert!(!table.is_in_use(&"a".to_owned()));
    }

    #[test]
    fn close_is_idempotent_and_clears() {
        let table: Table<String> = Table::new();
        let entry = table.get_or_create("a".to_owned());
        table.close();
        assert!(table.is_closed());
        assert_eq!(table.len(), 0);
        table.close();
        // Outstanding references still release without panicking.
        table.release(&entry);
    }
}
