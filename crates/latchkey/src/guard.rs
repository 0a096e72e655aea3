use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::entry::Entry;
use crate::table::Table;

/// Ownership of one key's lock: one consumed permit plus one reference on the
/// table entry.
///
/// Dropping the guard releases the lock. [`release`](KeyGuard::release) does
/// the same thing with a name; internally the entry reference is taken
/// exactly once, so the drop that follows an explicit release is a no-op.
pub struct KeyGuard<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    key: K,
    table: Arc<Table<K>>,
    entry: Option<Arc<Entry<K>>>,
}

impl<K> KeyGuard<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    pub(crate) fn new(key: K, table: Arc<Table<K>>, entry: Arc<Entry<K>>) -> Self {
        Self {
            key,
            table,
            entry: Some(entry),
        }
    }

    /// The canonical key this guard holds.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Releases the lock now instead of at end of scope.
    pub fn release(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.table.release(&entry);
        }
    }
}

impl<K> Drop for KeyGuard<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn drop(&mut self) {
        self.finish();
    }
}

impl<K> fmt::Debug for KeyGuard<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGuard")
            .field("key", &self.key)
            .field("released", &self.entry.is_none())
            .finish()
    }
}
