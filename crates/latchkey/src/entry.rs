use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// Per-key lock record.
///
/// Bundles the wait primitive (a 1-permit semaphore) with the bookkeeping the
/// table needs to decide when the record can be evicted: how many callers
/// hold or await it, and whether it has already been evicted.
///
/// The `meta` mutex serializes bookkeeping only. It is never held across an
/// `.await` and never while returning a permit to the semaphore.
pub(crate) struct Entry<K> {
    key: K,
    sem: Semaphore,
    meta: Mutex<Meta>,
}

struct Meta {
    /// Callers currently holding the permit or waiting for it, including
    /// callers that have registered interest but not yet started waiting.
    refs: usize,
    /// Set when the entry is evicted from the table. A dead entry is never
    /// revived; the same key gets a fresh entry on its next acquisition.
    dead: bool,
}

impl<K> Entry<K> {
    /// A fresh entry starts with one reference (its creator) and an
    /// available permit.
    pub(crate) fn new(key: K) -> Self {
        Self {
            key,
            sem: Semaphore::new(1),
            meta: Mutex::new(Meta {
                refs: 1,
                dead: false,
            }),
        }
    }

    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    pub(crate) fn sem(&self) -> &Semaphore {
        &self.sem
    }

    /// Registers another caller, unless the entry has already been evicted.
    ///
    /// The dead-check and the increment are one atomic step; a caller can
    /// never end up holding a reference it was not allowed to take.
    pub(crate) fn try_retain(&self) -> bool {
        let mut meta = self.meta.lock();
        if meta.dead {
            false
        } else {
            meta.refs += 1;
            true
        }
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.meta.lock().dead
    }

    /// Runs `f` with the bookkeeping locked. Used by the table so that
    /// decrement, eviction, and the dead mark happen as one step.
    pub(crate) fn with_meta<R>(&self, f: impl FnOnce(&mut usize, &mut bool) -> R) -> R {
        let mut meta = self.meta.lock();
        let Meta { refs, dead } = &mut *meta;
        f(refs, dead)
    }

    #[cfg(test)]
    pub(crate) fn refs(&self) -> usize {
        self.meta.lock().refs
    }
}
