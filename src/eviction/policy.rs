//! Eviction policy implementations
//!
//! Each policy defines how candidates are ordered for eviction:
//! - **LRU**: Sort by `accessed_at` (oldest first)
//! - **LFU**: Sort by `access_count` (lowest first)
//!
//! Timestamps are logical ticks handed out by the cache on every insert and
//! hit, so ordering is exact even when many accesses land in the same instant.

/// Candidate for eviction with the metadata needed for policy decisions
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    /// Fingerprint digest of the entry
    pub id: String,
    /// Tick of the last hit (or of the insert)
    pub accessed_at: u64,
    /// Number of hits plus the initial insert
    pub access_count: u64,
    /// Tick of the insert
    pub created_at: u64,
}

/// Trait for eviction policy implementations
pub trait EvictionPolicy: Send + Sync {
    /// Sort candidates by eviction priority (first = most likely to evict)
    fn sort_candidates(&self, candidates: &mut [EvictionCandidate]);
}

/// LRU (Least Recently Used) eviction policy
#[derive(Debug, Default)]
pub struct LruPolicy;

impl EvictionPolicy for LruPolicy {
    fn sort_candidates(&self, candidates: &mut [EvictionCandidate]) {
        candidates.sort_by(|a, b| a.accessed_at.cmp(&b.accessed_at));
    }
}

/// LFU (Least Frequently Used) eviction policy
///
/// Ties on access count fall back to the least recently used entry.
#[derive(Debug, Default)]
pub struct LfuPolicy;

impl EvictionPolicy for LfuPolicy {
    fn sort_candidates(&self, candidates: &mut [EvictionCandidate]) {
        candidates.sort_by(|a, b| {
            a.access_count
                .cmp(&b.access_count)
                .then_with(|| a.accessed_at.cmp(&b.accessed_at))
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candidate(
        id: &str,
        accessed_at: u64,
        access_count: u64,
        created_at: u64,
    ) -> EvictionCandidate {
        EvictionCandidate {
            id: id.to_string(),
            accessed_at,
            access_count,
            created_at,
        }
    }

    #[test]
    fn test_lru_policy() {
        let policy = LruPolicy;
        let mut candidates = vec![
            make_candidate("a", 10, 5, 5),
            make_candidate("b", 5, 10, 4), // Oldest access
            make_candidate("c", 20, 1, 6),
        ];

        policy.sort_candidates(&mut candidates);

        assert_eq!(candidates[0].id, "b");
        assert_eq!(candidates[1].id, "a");
        assert_eq!(candidates[2].id, "c");
    }

    #[test]
    fn test_lfu_policy() {
        let policy = LfuPolicy;
        let mut candidates = vec![
            make_candidate("a", 10, 5, 5),
            make_candidate("b", 5, 1, 4), // Lowest count
            make_candidate("c", 20, 10, 6),
        ];

        policy.sort_candidates(&mut candidates);

        assert_eq!(candidates[0].id, "b");
        assert_eq!(candidates[1].id, "a");
        assert_eq!(candidates[2].id, "c");
    }

    #[test]
    fn test_lfu_tie_breaks_on_recency() {
        let policy = LfuPolicy;
        let mut candidates = vec![make_candidate("new", 9, 2, 3), make_candidate("old", 4, 2, 1)];

        policy.sort_candidates(&mut candidates);

        assert_eq!(candidates[0].id, "old");
    }
}
