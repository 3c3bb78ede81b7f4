//! Allocator / Index
//!
//! The authoritative in-memory mapping from addresses to bucket slots.
//!
//! ## Structure
//! - `used`: every live `(address, slot)` pair, sorted by address, across
//!   all buckets. Lookups are a binary search.
//! - `buckets`: per-bucket free set plus `min_unused`, the smallest slot
//!   that has never been handed out in that bucket.
//!
//! ## Slot states
//! Within a bucket, every slot number is in exactly one of: a `used` entry,
//! the bucket's free set, or `>= min_unused`. `min_unused` never exceeds the
//! bucket capacity and `used.len()` never exceeds `num_total`.

use std::collections::{BTreeMap, BTreeSet};

use crate::address::Address;
use crate::bucket::{BucketKey, BucketRouter, Geometry};
use crate::error::{Result, VaultError};

/// Slot number within a bucket file
pub type Slot = u32;

/// Allocation state of one bucket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketState {
    /// Reclaimed slots, all below `min_unused`
    pub free: BTreeSet<Slot>,

    /// Smallest slot never yet allocated
    pub min_unused: Slot,
}

impl BucketState {
    /// Lower `min_unused` while the highest free slot sits directly beneath it
    fn compact(&mut self) {
        while self.min_unused > 0 && self.free.last() == Some(&(self.min_unused - 1)) {
            self.free.pop_last();
            self.min_unused -= 1;
        }
    }

    fn is_pristine(&self) -> bool {
        self.min_unused == 0 && self.free.is_empty()
    }
}

/// A live index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsedEntry {
    pub address: Address,
    pub slot: Slot,
}

/// In-memory allocator and address index
#[derive(Debug, Clone)]
pub struct Index {
    router: BucketRouter,
    num_total: u32,
    used: Vec<UsedEntry>,
    buckets: BTreeMap<BucketKey, BucketState>,
}

impl Index {
    /// Create an empty index
    pub fn new(geometry: Geometry, num_total: u32) -> Self {
        Self {
            router: BucketRouter::new(geometry),
            num_total,
            used: Vec::new(),
            buckets: BTreeMap::new(),
        }
    }

    /// Rebuild an index from decoded entries
    ///
    /// `used` must be strictly sorted by address. Each bucket's `min_unused`
    /// is reconstructed from the highest slot mentioned for it; slots below
    /// that which appear in neither list are returned to the free set.
    pub fn from_parts(
        geometry: Geometry,
        num_total: u32,
        used: Vec<UsedEntry>,
        free: Vec<(BucketKey, Slot)>,
    ) -> Result<Self> {
        let capacity = geometry.slots_per_bucket();
        let router = BucketRouter::new(geometry);

        if used.len() > num_total as usize {
            return Err(VaultError::Corrupted(format!(
                "{} used entries exceed capacity {}",
                used.len(),
                num_total
            )));
        }
        if used.windows(2).any(|w| w[0].address >= w[1].address) {
            return Err(VaultError::Corrupted(
                "used entries are not strictly sorted by address".to_string(),
            ));
        }

        let mut taken: BTreeMap<BucketKey, BTreeSet<Slot>> = BTreeMap::new();
        let mut buckets: BTreeMap<BucketKey, BucketState> = BTreeMap::new();

        for entry in &used {
            let bucket = router.bucket_of(&entry.address);
            Self::check_decoded_slot(&router, &bucket, entry.slot, capacity)?;
            if !taken.entry(bucket).or_default().insert(entry.slot) {
                return Err(VaultError::Corrupted(format!(
                    "slot {} used twice in bucket {}",
                    entry.slot,
                    router.bucket_name(&bucket)
                )));
            }
        }

        for (bucket, slot) in free {
            Self::check_decoded_slot(&router, &bucket, slot, capacity)?;
            if taken.get(&bucket).is_some_and(|s| s.contains(&slot)) {
                return Err(VaultError::Corrupted(format!(
                    "slot {} both used and free in bucket {}",
                    slot,
                    router.bucket_name(&bucket)
                )));
            }
            if !buckets.entry(bucket).or_default().free.insert(slot) {
                return Err(VaultError::Corrupted(format!(
                    "slot {} freed twice in bucket {}",
                    slot,
                    router.bucket_name(&bucket)
                )));
            }
        }

        for (bucket, slots) in &taken {
            let state = buckets.entry(*bucket).or_default();
            state.min_unused = slots.last().map_or(0, |s| s + 1);
        }

        for (bucket, state) in buckets.iter_mut() {
            let top_free = state.free.last().map_or(0, |s| s + 1);
            state.min_unused = state.min_unused.max(top_free);

            let in_use = taken.get(bucket);
            let mut repaired = 0usize;
            for slot in 0..state.min_unused {
                if !state.free.contains(&slot) && !in_use.is_some_and(|s| s.contains(&slot)) {
                    state.free.insert(slot);
                    repaired += 1;
                }
            }
            if repaired > 0 {
                tracing::warn!(
                    "recovered {} unaccounted slots in bucket {}",
                    repaired,
                    router.bucket_name(bucket)
                );
            }

            state.compact();
        }
        buckets.retain(|_, state| !state.is_pristine());

        Ok(Self {
            router,
            num_total,
            used,
            buckets,
        })
    }

    fn check_decoded_slot(
        router: &BucketRouter,
        bucket: &BucketKey,
        slot: Slot,
        capacity: u32,
    ) -> Result<()> {
        if slot >= capacity {
            return Err(VaultError::Corrupted(format!(
                "slot {} out of range in bucket {} (capacity {})",
                slot,
                router.bucket_name(bucket),
                capacity
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Find the slot holding `address`
    pub fn search(&self, address: &Address) -> Option<Slot> {
        self.used
            .binary_search_by(|e| e.address.cmp(address))
            .ok()
            .map(|i| self.used[i].slot)
    }

    /// Allocate a slot for `address`
    ///
    /// Returns the existing slot unchanged if the address is already
    /// present. Reuses the lowest free slot of the bucket before extending
    /// the bucket's high-water mark.
    pub fn insert(&mut self, address: &Address) -> Result<Slot> {
        let pos = match self.used.binary_search_by(|e| e.address.cmp(address)) {
            Ok(i) => return Ok(self.used[i].slot),
            Err(pos) => pos,
        };

        if self.used.len() >= self.num_total as usize {
            return Err(VaultError::CapacityExhausted {
                total: self.num_total,
            });
        }

        let capacity = self.router.geometry().slots_per_bucket();
        let bucket = self.router.bucket_of(address);
        let state = self.buckets.entry(bucket).or_default();

        let slot = if let Some(slot) = state.free.pop_first() {
            slot
        } else if state.min_unused < capacity {
            state.min_unused += 1;
            state.min_unused - 1
        } else {
            return Err(VaultError::BucketExhausted {
                bucket: self.router.bucket_name(&bucket),
            });
        };

        self.used.insert(
            pos,
            UsedEntry {
                address: *address,
                slot,
            },
        );
        Ok(slot)
    }

    /// Release the slot held by `address`
    pub fn remove(&mut self, address: &Address) -> Option<Slot> {
        let pos = self
            .used
            .binary_search_by(|e| e.address.cmp(address))
            .ok()?;
        let entry = self.used.remove(pos);

        let bucket = self.router.bucket_of(address);
        let state = self.buckets.entry(bucket).or_default();
        state.free.insert(entry.slot);
        state.compact();
        if state.is_pristine() {
            self.buckets.remove(&bucket);
        }

        Some(entry.slot)
    }

    /// Undo a [`Index::remove`]: reinstate `entry` and the bucket state
    /// captured before the removal
    pub(crate) fn restore(&mut self, entry: UsedEntry, state: BucketState) {
        let bucket = self.router.bucket_of(&entry.address);
        if let Err(pos) = self.used.binary_search_by(|e| e.address.cmp(&entry.address)) {
            self.used.insert(pos, entry);
        }
        if state.is_pristine() {
            self.buckets.remove(&bucket);
        } else {
            self.buckets.insert(bucket, state);
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    pub fn num_total(&self) -> u32 {
        self.num_total
    }

    /// Change the global capacity
    ///
    /// The new capacity may not drop below the number of used entries.
    pub fn set_num_total(&mut self, num_total: u32) -> Result<()> {
        if (num_total as usize) < self.used.len() {
            return Err(VaultError::Config(format!(
                "capacity {} is below the {} blocks already stored",
                num_total,
                self.used.len()
            )));
        }
        self.num_total = num_total;
        Ok(())
    }

    pub fn geometry(&self) -> Geometry {
        self.router.geometry()
    }

    pub fn router(&self) -> &BucketRouter {
        &self.router
    }

    /// Live entries in address order
    pub fn used(&self) -> &[UsedEntry] {
        &self.used
    }

    /// Addresses of all live entries in address order
    pub fn addresses(&self) -> Vec<Address> {
        self.used.iter().map(|e| e.address).collect()
    }

    /// Buckets that have ever had a slot allocated and not fully reclaimed
    pub fn buckets(&self) -> impl Iterator<Item = (&BucketKey, &BucketState)> {
        self.buckets.iter()
    }

    /// Allocation state for one bucket (pristine if never used)
    pub fn bucket(&self, bucket: &BucketKey) -> BucketState {
        self.buckets.get(bucket).cloned().unwrap_or_default()
    }

    /// High-water mark of the bucket holding `address`
    pub fn min_unused_for(&self, address: &Address) -> Slot {
        self.buckets
            .get(&self.router.bucket_of(address))
            .map_or(0, |s| s.min_unused)
    }

    /// Total number of free-list entries across all buckets
    pub fn free_len(&self) -> usize {
        self.buckets.values().map(|s| s.free.len()).sum()
    }
}
