//! Single-mode hop accounting
//!
//! Outside a collaboration session an agent may hand off to its peer once per
//! human message. Counters are kept per call id in a bounded LRU so a
//! long-running process does not accumulate one entry per message forever.

use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::debug;

/// Handoff hops allowed per call id outside a session
pub const MAX_SINGLE_MODE_HOPS: u32 = 1;

const FALLBACK_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(n) => n,
    None => unreachable!(),
};

/// Per-call-id hop counters.
///
/// An id evicted from the LRU counts as fresh, so a chain still in flight
/// after more than `capacity` newer ids have been reset could take one more
/// hop. The capacity should comfortably exceed the number of concurrent chains.
pub struct HopTracker {
    counts: LruCache<String, u32>,
}

impl HopTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(FALLBACK_CAPACITY);
        Self {
            counts: LruCache::new(capacity),
        }
    }

    /// Start a fresh chain for this call id
    pub fn reset(&mut self, call_id: &str) {
        self.counts.put(call_id.to_string(), 0);
    }

    /// Consume a hop if the call id still has one. Unknown ids start at zero.
    pub fn try_hop(&mut self, call_id: &str) -> bool {
        let current = self.counts.get(call_id).copied().unwrap_or(0);
        if current >= MAX_SINGLE_MODE_HOPS {
            debug!("Hop limit reached for call {} ({} hops)", call_id, current);
            return false;
        }
        self.counts.put(call_id.to_string(), current + 1);
        true
    }

    pub fn hops(&self, call_id: &str) -> Option<u32> {
        self.counts.peek(call_id).copied()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_hop_per_call() {
        let mut hops = HopTracker::new(16);
        hops.reset("c1");
        assert_eq!(hops.hops("c1"), Some(0));
        assert!(hops.try_hop("c1"));
        assert!(!hops.try_hop("c1"));
        assert_eq!(hops.hops("c1"), Some(1));
    }

    #[test]
    fn test_reset_restores_budget() {
        let mut hops = HopTracker::new(16);
        assert!(hops.try_hop("c1"));
        hops.reset("c1");
        assert!(hops.try_hop("c1"));
    }

    #[test]
    fn test_unknown_call_starts_at_zero() {
        let mut hops = HopTracker::new(16);
        assert!(hops.try_hop("fresh"));
        assert!(!hops.try_hop("fresh"));
    }

    #[test]
    fn test_capacity_is_bounded() {
        let mut hops = HopTracker::new(2);
        hops.reset("a");
        hops.reset("b");
        hops.reset("c");
        assert_eq!(hops.len(), 2);
        assert_eq!(hops.hops("a"), None);
    }

    #[test]
    fn test_evicted_call_counts_as_fresh() {
        let mut hops = HopTracker::new(1);
        hops.reset("a");
        assert!(hops.try_hop("a"));
        hops.reset("b");
        assert_eq!(hops.hops("a"), None);
        assert!(hops.try_hop("a"));
    }

    #[test]
    fn test_zero_capacity_falls_back() {
        let mut hops = HopTracker::new(0);
        hops.reset("a");
        assert_eq!(hops.len(), 1);
    }
}
