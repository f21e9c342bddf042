//! `BucketLocation` packing and the in-memory `BucketIndex`: a concurrent,
//! CAS-capable array of bucket locations, with the buffered-overlay mode
//! snapshot needs to freeze the base array while writes keep landing
//! (Section 4.5).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, RwLock};

use ahash::AHashMap;

/// Sentinel meaning "this bucket has never been written".
pub const EMPTY_LOCATION: i64 = -1;

const FILE_INDEX_BITS: u32 = 23;
const OFFSET_BITS: u32 = 40;
const OFFSET_MASK: u64 = (1u64 << OFFSET_BITS) - 1;

/// A `(file_index, offset)` pair packed into the 64-bit value the spec's
/// index array stores per bucket (Section 3). Packed rather than stored as
/// a struct so the index can be a plain `AtomicI64` array, CAS-able without
/// a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLocation {
    /// Monotonically increasing index of the data file holding this bucket.
    pub file_index: u32,
    /// Byte offset of the bucket's record within that file.
    pub offset: u64,
}

impl BucketLocation {
    /// Packs this location into its 64-bit wire/index representation.
    pub fn pack(self) -> i64 {
        debug_assert!(self.file_index < (1 << FILE_INDEX_BITS));
        debug_assert!(self.offset <= OFFSET_MASK);
        (((self.file_index as u64) << OFFSET_BITS) | (self.offset & OFFSET_MASK)) as i64
    }

    /// Unpacks a 64-bit index slot value into a location, or `None` if it is
    /// the empty sentinel.
    pub fn unpack(packed: i64) -> Option<BucketLocation> {
        if packed == EMPTY_LOCATION {
            return None;
        }
        let raw = packed as u64;
        Some(BucketLocation {
            file_index: (raw >> OFFSET_BITS) as u32,
            offset: raw & OFFSET_MASK,
        })
    }
}

/// Concurrent, CAS-capable array of bucket locations with an optional
/// overlay used during a snapshot's 3-phase protocol: while the overlay is
/// enabled, reads consult the overlay first and fall back to the frozen
/// base; writes land in the overlay only. Disabling the overlay merges it
/// back into the base array (Section 4.5, "buffered-overlay mode").
pub struct BucketIndex {
    base: Vec<AtomicI64>,
    overlay: RwLock<Option<AHashMap<usize, i64>>>,
    overlay_write_lock: Mutex<()>,
}

impl BucketIndex {
    /// Builds an index of `num_buckets` empty slots.
    pub fn new(num_buckets: usize) -> Self {
        let mut base = Vec::with_capacity(num_buckets);
        base.resize_with(num_buckets, || AtomicI64::new(EMPTY_LOCATION));
        Self {
            base,
            overlay: RwLock::new(None),
            overlay_write_lock: Mutex::new(()),
        }
    }

    /// Number of bucket slots.
    pub fn len(&self) -> usize {
        self.base.len()
    }

    /// `true` if there are no bucket slots (never true for a real map, but
    /// kept for API completeness / clippy).
    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// Reads the current location for `bucket_index` (overlay-aware).
    pub fn get(&self, bucket_index: usize) -> Option<BucketLocation> {
        if let Some(overlay) = self.overlay.read().expect("lock poisoned").as_ref() {
            if let Some(v) = overlay.get(&bucket_index) {
                return BucketLocation::unpack(*v);
            }
        }
        self.base
            .get(bucket_index)
            .and_then(|slot| BucketLocation::unpack(slot.load(Ordering::Acquire)))
    }

    /// Unconditionally sets `bucket_index`'s location (used by the writer's
    /// publish step, which always wins per Section 5's ordering guarantee).
    pub fn set(&self, bucket_index: usize, location: BucketLocation) {
        let packed = location.pack();
        let mut overlay_guard = self.overlay.write().expect("lock poisoned");
        if let Some(overlay) = overlay_guard.as_mut() {
            overlay.insert(bucket_index, packed);
        } else {
            drop(overlay_guard);
            if let Some(slot) = self.base.get(bucket_index) {
                slot.store(packed, Ordering::Release);
            }
        }
    }

    /// Compare-and-set used by merge: only applies `new` if the slot still
    /// holds `old`. Returns `true` on success. Writers always win a race
    /// against a concurrent merge, because the merge computed `old` from a
    /// snapshot taken before the writer published (Section 5).
    pub fn cas(&self, bucket_index: usize, old: BucketLocation, new: BucketLocation) -> bool {
        let old_packed = old.pack();
        let new_packed = new.pack();
        let _guard = self.overlay_write_lock.lock().expect("lock poisoned");
        let overlay_guard = self.overlay.read().expect("lock poisoned");
        if overlay_guard.is_some() {
            drop(overlay_guard);
            let mut overlay_guard = self.overlay.write().expect("lock poisoned");
            let overlay = overlay_guard.as_mut().expect("checked Some above");
            let current = overlay
                .get(&bucket_index)
                .copied()
                .unwrap_or_else(|| self.base[bucket_index].load(Ordering::Acquire));
            if current == old_packed {
                overlay.insert(bucket_index, new_packed);
                true
            } else {
                false
            }
        } else {
            drop(overlay_guard);
            match self.base.get(bucket_index) {
                Some(slot) => slot
                    .compare_exchange(old_packed, new_packed, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok(),
                None => false,
            }
        }
    }

    /// Enables the snapshot overlay: subsequent reads still see the current
    /// base values (since the overlay starts empty), but writes accumulate
    /// in the overlay instead of touching `base` until
    /// [`BucketIndex::disable_overlay`] merges them back.
    pub fn enable_overlay(&self) {
        *self.overlay.write().expect("lock poisoned") = Some(AHashMap::new());
    }

    /// Merges any overlay entries back into the base array and disables the
    /// overlay.
    pub fn disable_overlay(&self) {
        let overlay = self.overlay.write().expect("lock poisoned").take();
        if let Some(overlay) = overlay {
            for (bucket_index, packed) in overlay {
                if let Some(slot) = self.base.get(bucket_index) {
                    slot.store(packed, Ordering::Release);
                }
            }
        }
    }

    /// `true` while the overlay is active.
    pub fn overlay_active(&self) -> bool {
        self.overlay.read().expect("lock poisoned").is_some()
    }

    /// A point-in-time snapshot of every slot's packed value, base-only
    /// (ignoring any active overlay) — used to write the frozen index file
    /// during `snapshot_mid`.
    pub fn snapshot_base(&self) -> Vec<i64> {
        self.base.iter().map(|s| s.load(Ordering::Acquire)).collect()
    }

    /// Rebuilds an index from a previously snapshotted array of packed values.
    pub fn from_packed(values: Vec<i64>) -> Self {
        Self {
            base: values.into_iter().map(AtomicI64::new).collect(),
            overlay: RwLock::new(None),
            overlay_write_lock: Mutex::new(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips() {
        let loc = BucketLocation {
            file_index: 7,
            offset: 123_456,
        };
        assert_eq!(BucketLocation::unpack(loc.pack()), Some(loc));
    }

    #[test]
    fn empty_slot_unpacks_to_none() {
        assert_eq!(BucketLocation::unpack(EMPTY_LOCATION), None);
    }

    #[test]
    fn cas_succeeds_only_against_matching_old_value() {
        let idx = BucketIndex::new(4);
        let a = BucketLocation { file_index: 0, offset: 0 };
        let b = BucketLocation { file_index: 1, offset: 10 };
        idx.set(1, a);
        assert!(!idx.cas(1, b, a));
        assert!(idx.cas(1, a, b));
        assert_eq!(idx.get(1), Some(b));
    }

    #[test]
    fn overlay_isolates_writes_until_disabled() {
        let idx = BucketIndex::new(4);
        let a = BucketLocation { file_index: 0, offset: 1 };
        idx.set(2, a);
        idx.enable_overlay();
        let b = BucketLocation { file_index: 0, offset: 2 };
        idx.set(2, b);
        assert_eq!(idx.get(2), Some(b));
        let base_snapshot = idx.snapshot_base();
        assert_eq!(BucketLocation::unpack(base_snapshot[2]), Some(a));
        idx.disable_overlay();
        assert_eq!(BucketLocation::unpack(idx.snapshot_base()[2]), Some(b));
    }
}
