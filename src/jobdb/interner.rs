//! String interning for queue names, priority-class names, pool names,
//! node-selector keys/values, and tolerations (spec.md §4.2).
//!
//! Grounded on the teacher's `LruCache` shape (`src/caching/advanced.rs`),
//! adapted to intern `Arc<str>` handles instead of caching values: eviction
//! only drops the interner's own map entry, the `Arc<str>` handed out to a
//! `Job` stays valid for the `Job`'s lifetime regardless (spec.md §4.2
//! guarantee), since `Arc` keeps the allocation alive independently.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub struct Interner {
    table: Mutex<LruCache<Arc<str>, ()>>,
}

impl Interner {
    pub fn new(capacity: u32) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1) as usize).unwrap();
        Self {
            table: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the canonical handle for `s`, inserting it if unseen. The
    /// handle remains valid after eviction from the interner's table: only
    /// future `intern` calls stop deduplicating against it.
    pub fn intern(&self, s: &str) -> Arc<str> {
        let mut table = self.table.lock();
        if let Some((k, _)) = table.iter().find(|(k, _)| k.as_ref() == s) {
            let handle = k.clone();
            table.promote(&handle);
            return handle;
        }
        let handle: Arc<str> = Arc::from(s);
        table.put(handle.clone(), ());
        handle
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_the_same_string_returns_the_same_allocation() {
        let interner = Interner::new(16);
        let a = interner.intern("queue-a");
        let b = interner.intern("queue-a");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn handles_survive_eviction() {
        let interner = Interner::new(1);
        let a = interner.intern("queue-a");
        interner.intern("queue-b");
        // queue-a has been evicted from the table, but `a` is still a valid
        // `Arc<str>` pointing at "queue-a".
        assert_eq!(a.as_ref(), "queue-a");
    }
}
