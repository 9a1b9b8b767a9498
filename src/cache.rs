//! Optional shared cache of tree-pair diffs.
//!
//! The cache maps `(old tree, new tree)` to the computed diff entries.
//! Lookup locks only the shard holding the key, and a miss computes inside
//! the entry so concurrent callers asking for the same pair do not duplicate
//! the work.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::DashMap;
use tracing::debug;

use crate::{errors::ConfError, hash::ObjectHash, internal::worktree::TreeDiffEntry};

/// Shared `(tree, tree) → diff` cache. Clone-cheap; hand one instance to
/// every repository that should share it.
#[derive(Default)]
pub struct DiffCache {
    entries: DashMap<(ObjectHash, ObjectHash), Arc<Vec<TreeDiffEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DiffCache {
    pub fn new() -> Arc<DiffCache> {
        Arc::new(DiffCache::default())
    }

    /// Fetch the diff for a tree pair, computing and inserting on miss.
    pub fn get_or_compute<F>(
        &self,
        old_tree: ObjectHash,
        new_tree: ObjectHash,
        compute: F,
    ) -> Result<Arc<Vec<TreeDiffEntry>>, ConfError>
    where
        F: FnOnce() -> Result<Vec<TreeDiffEntry>, ConfError>,
    {
        let key = (old_tree, new_tree);
        if let Some(found) = self.entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(found.clone());
        }
        // The entry holds the shard lock while computing, so a concurrent
        // caller for the same key blocks instead of recomputing.
        use dashmap::mapref::entry::Entry;
        let result = match self.entries.entry(key) {
            Entry::Occupied(found) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                found.get().clone()
            }
            Entry::Vacant(slot) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let computed = Arc::new(compute()?);
                debug!(
                    old = %old_tree,
                    new = %new_tree,
                    entries = computed.len(),
                    "diff cache insert"
                );
                slot.insert(computed.clone());
                computed
            }
        };
        Ok(result)
    }

    /// (hits, misses) counters, for tests and instrumentation.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashKind;

    fn id_of(n: u8) -> ObjectHash {
        ObjectHash::digest(HashKind::Sha1, &[n])
    }

    /// The second lookup for a pair is served from the cache.
    #[test]
    fn hit_after_miss() {
        let cache = DiffCache::new();
        let mut computed = 0;
        for _ in 0..2 {
            let diff = cache
                .get_or_compute(id_of(1), id_of(2), || {
                    computed += 1;
                    Ok(Vec::new())
                })
                .unwrap();
            assert!(diff.is_empty());
        }
        assert_eq!(computed, 1);
        assert_eq!(cache.stats(), (1, 1));
    }

    /// A failed computation does not poison the slot.
    #[test]
    fn error_leaves_no_entry() {
        let cache = DiffCache::new();
        let err = cache.get_or_compute(id_of(1), id_of(2), || {
            Err(ConfError::storage("boom"))
        });
        assert!(err.is_err());
        let ok = cache.get_or_compute(id_of(1), id_of(2), || Ok(Vec::new()));
        assert!(ok.is_ok());
    }
}
