use std::{collections::HashMap, num::NonZeroUsize, sync::Mutex};

use lru::LruCache;
use metrics::counter;
use tachyon_common::crypto::Address;

use crate::core::state::TouchedAddressSet;

/// Bounded LRU of `contract address -> addresses it historically touched
/// beyond from/payment`. Feeds the speculative grouper's predictions.
///
/// Owned by the processor and shared behind an `Arc`; the lock is held
/// only for the map operation itself.
pub struct AssociatedAddressCache {
    cache: Mutex<LruCache<Address, TouchedAddressSet>>,
}

impl AssociatedAddressCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Associated sets for the given contracts; absent entries are simply
    /// not in the result.
    pub fn load(&self, addresses: &[Address]) -> HashMap<Address, TouchedAddressSet> {
        let mut cache = self.cache.lock().expect("associated-address cache lock poisoned");
        let mut result = HashMap::new();
        for addr in addresses {
            if let Some(set) = cache.get(addr) {
                result.insert(*addr, set.clone());
            }
        }
        counter!("tachyon_aac_hits_total").increment(result.len() as u64);
        counter!("tachyon_aac_misses_total")
            .increment(addresses.len().saturating_sub(result.len()) as u64);
        result
    }

    /// Merge freshly observed touch sets into the cache. Each incoming set
    /// is stripped of system addresses first; merging is a union, so
    /// repeating an update is a no-op.
    pub fn update(&self, observed: HashMap<Address, TouchedAddressSet>) {
        let mut cache = self.cache.lock().expect("associated-address cache lock poisoned");
        for (addr, mut set) in observed {
            set.remove_args_accounts();
            match cache.get_mut(&addr) {
                Some(existing) => existing.merge(&set),
                None => {
                    cache.put(addr, set);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().expect("associated-address cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(i: u64) -> Address {
        Address::from_low_u64(i)
    }

    fn set_of(addrs: &[u64]) -> TouchedAddressSet {
        let mut set = TouchedAddressSet::new();
        for a in addrs {
            set.add_account(addr(*a), true);
        }
        set
    }

    #[test]
    fn test_load_returns_only_present_entries() {
        let cache = AssociatedAddressCache::new(16);
        cache.update(HashMap::from([(addr(100), set_of(&[200, 201]))]));

        let loaded = cache.load(&[addr(100), addr(999)]);
        assert_eq!(loaded.len(), 1);
        assert!(loaded[&addr(100)].contains_account(&addr(200)));
    }

    #[test]
    fn test_update_merges_and_is_idempotent() {
        let cache = AssociatedAddressCache::new(16);
        cache.update(HashMap::from([(addr(100), set_of(&[200]))]));
        cache.update(HashMap::from([(addr(100), set_of(&[201]))]));

        let merged = cache.load(&[addr(100)])[&addr(100)].clone();
        assert!(merged.contains_account(&addr(200)));
        assert!(merged.contains_account(&addr(201)));

        cache.update(HashMap::from([(addr(100), set_of(&[200, 201]))]));
        assert_eq!(cache.load(&[addr(100)])[&addr(100)], merged);
    }

    #[test]
    fn test_update_strips_system_addresses() {
        let cache = AssociatedAddressCache::new(16);
        cache.update(HashMap::from([(addr(100), set_of(&[1, 2, 200]))]));
        let set = cache.load(&[addr(100)])[&addr(100)].clone();
        assert!(!set.contains_account(&addr(1)));
        assert!(set.contains_account(&addr(200)));
    }

    #[test]
    fn test_least_recently_used_is_evicted_first() {
        let cache = AssociatedAddressCache::new(2);
        cache.update(HashMap::from([(addr(100), set_of(&[200]))]));
        cache.update(HashMap::from([(addr(101), set_of(&[201]))]));
        // Touch 100 so 101 becomes the eviction candidate.
        cache.load(&[addr(100)]);
        cache.update(HashMap::from([(addr(102), set_of(&[202]))]));

        assert_eq!(cache.len(), 2);
        assert!(cache.load(&[addr(101)]).is_empty());
        assert!(!cache.load(&[addr(100)]).is_empty());
    }
}
