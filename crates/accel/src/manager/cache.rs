//! On-device parameter cache bookkeeping
//!
//! The accelerator keeps the parameters of a few packages resident, all
//! uploaded under one caching token. A different token invalidates every
//! slot. With the same token and no free slot, the parameters are uploaded
//! for that run only and the resident packages stay as they are.

use crate::manager::package::PackageKey;
use tracing::debug;

/// What to do before running a package's inference executable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePlan {
    /// Parameters are already on the device
    Resident,
    /// Run the caching executable, then [`ParameterCache::commit`] the slot
    Load { slot: usize },
    /// Run the caching executable without taking a slot
    Upload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub token: Option<u64>,
    pub resident: Vec<PackageKey>,
    /// Flushes that dropped at least one resident package
    pub evictions: u64,
}

#[derive(Debug)]
pub struct ParameterCache {
    slots: Vec<Option<PackageKey>>,
    token: Option<u64>,
    evictions: u64,
}

impl ParameterCache {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: vec![None; slots.max(1)],
            token: None,
            evictions: 0,
        }
    }

    /// Decide how `key`, built with caching `token`, gets its parameters
    ///
    /// Flushes the cache only when the token changed.
    pub fn plan(&mut self, key: PackageKey, token: u64) -> CachePlan {
        if self.token != Some(token) {
            debug!("Caching token {:?} -> {:#x}, flushing", self.token, token);
            self.flush();
            return CachePlan::Load { slot: 0 };
        }

        if self.slots.contains(&Some(key)) {
            return CachePlan::Resident;
        }

        match self.slots.iter().position(Option::is_none) {
            Some(slot) => CachePlan::Load { slot },
            None => {
                debug!("Parameter cache full, uploading without a slot");
                CachePlan::Upload
            }
        }
    }

    /// Record a successful caching upload
    pub fn commit(&mut self, slot: usize, key: PackageKey, token: u64) {
        self.token = Some(token);
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = Some(key);
        }
    }

    /// Forget the token so the next package re-uploads its parameters
    pub fn invalidate(&mut self) {
        self.token = None;
    }

    pub fn token(&self) -> Option<u64> {
        self.token
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            token: self.token,
            resident: self.slots.iter().flatten().copied().collect(),
            evictions: self.evictions,
        }
    }

    fn flush(&mut self) {
        if self.slots.iter().any(Option::is_some) {
            self.evictions += 1;
        }
        self.slots.fill(None);
        self.token = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> PackageKey {
        // Distinct static addresses stand in for distinct buffers.
        static BUFFERS: [[u8; 1]; 8] = [[0; 1]; 8];
        PackageKey::of(&BUFFERS[n as usize])
    }

    fn invoke(cache: &mut ParameterCache, k: PackageKey, token: u64) -> CachePlan {
        let plan = cache.plan(k, token);
        if let CachePlan::Load { slot } = plan {
            cache.commit(slot, k, token);
        }
        plan
    }

    #[test]
    fn test_token_sequence_flushes_once() {
        let mut cache = ParameterCache::new(4);

        assert_eq!(invoke(&mut cache, key(0), 1), CachePlan::Load { slot: 0 });
        assert_eq!(invoke(&mut cache, key(1), 1), CachePlan::Load { slot: 1 });
        assert_eq!(invoke(&mut cache, key(2), 2), CachePlan::Load { slot: 0 });

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.token, Some(2));
        assert_eq!(stats.resident, vec![key(2)]);
    }

    #[test]
    fn test_resident_package_skips_upload() {
        let mut cache = ParameterCache::new(2);
        invoke(&mut cache, key(0), 7);

        assert_eq!(invoke(&mut cache, key(0), 7), CachePlan::Resident);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_full_cache_keeps_residents() {
        let mut cache = ParameterCache::new(2);
        invoke(&mut cache, key(0), 7);
        invoke(&mut cache, key(1), 7);

        assert_eq!(invoke(&mut cache, key(2), 7), CachePlan::Upload);
        assert_eq!(invoke(&mut cache, key(0), 7), CachePlan::Resident);
        assert_eq!(cache.stats().resident, vec![key(0), key(1)]);
        assert_eq!(cache.stats().token, Some(7));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_single_slot_flushes_only_on_token_change() {
        let mut cache = ParameterCache::new(1);

        assert_eq!(invoke(&mut cache, key(0), 1), CachePlan::Load { slot: 0 });
        assert_eq!(invoke(&mut cache, key(1), 1), CachePlan::Upload);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.stats().resident, vec![key(0)]);

        assert_eq!(invoke(&mut cache, key(2), 2), CachePlan::Load { slot: 0 });
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.token, Some(2));
        assert_eq!(stats.resident, vec![key(2)]);
    }

    #[test]
    fn test_failed_upload_leaves_cache_empty() {
        let mut cache = ParameterCache::new(2);
        invoke(&mut cache, key(0), 1);

        // Token change flushes; the caching executable then fails, so no commit.
        assert_eq!(cache.plan(key(1), 2), CachePlan::Load { slot: 0 });
        assert_eq!(cache.token(), None);
        assert!(cache.stats().resident.is_empty());

        assert_eq!(cache.plan(key(1), 2), CachePlan::Load { slot: 0 });
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate_forces_reload() {
        let mut cache = ParameterCache::new(2);
        invoke(&mut cache, key(0), 1);
        cache.invalidate();

        assert_eq!(invoke(&mut cache, key(0), 1), CachePlan::Load { slot: 0 });
    }
}
