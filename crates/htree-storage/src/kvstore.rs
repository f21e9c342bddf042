//! `DiskKvStore`: the memory-indexed key/value store of Section 4.6 — a
//! specialization of `DiskHashMap` where keys are contiguous `i64`s inside a
//! known `valid_key_range`, so the index can be a direct array rather than a
//! hashed bucket table. Shares the `DataFileCollection` backend with
//! `DiskHashMap`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use htree_types::error::StorageError;

use crate::collection::DataFileCollection;
use crate::datafile::DataFileHeader;
use crate::index::BucketLocation;
use crate::snapshot;

/// Reserved `serializer_class` stamped on `DiskKvStore` data files.
pub const KV_SERIALIZER_CLASS: i64 = 0x4b56_5354_4f52; // "KVSTOR"
const KV_SERIALIZER_VERSION: i32 = 1;

/// The nominated "root" key: looking it up while absent returns not-found
/// rather than an out-of-range error, even before any range has been
/// published (Section 4.6).
pub const ROOT_KEY: i64 = 0;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn kv_header(min_key: i64, max_key: i64) -> DataFileHeader {
    DataFileHeader {
        format_version: 1,
        creation_ts: now_millis(),
        serializer_class: KV_SERIALIZER_CLASS,
        serializer_version: KV_SERIALIZER_VERSION,
        min_key,
        max_key,
    }
}

/// One staged write: a key and its serialized record bytes (or `None` to
/// mean "no-op", never actually queued).
struct PendingWrite {
    key: i64,
    bytes: Vec<u8>,
}

/// The `Idle -> Writing -> Idle` staging area for one write session. Simpler
/// than `DiskHashMap`'s because there is no bucket read-modify-write step:
/// each key maps directly to one record.
struct KvSession {
    writing: bool,
    owner: Option<std::thread::ThreadId>,
    staged: Vec<PendingWrite>,
}

impl KvSession {
    fn new() -> Self {
        Self {
            writing: false,
            owner: None,
            staged: Vec::new(),
        }
    }
}

/// A direct `key -> location` store for contiguous `i64` keys inside
/// `[min_key, max_key]` (Section 4.6). A direct array index replaces the
/// hashed bucket table `DiskHashMap` uses.
pub struct DiskKvStore {
    dir: PathBuf,
    collection: DataFileCollection,
    index: Vec<AtomicI64>,
    min_key: AtomicI64,
    max_key: AtomicI64,
    session: Mutex<KvSession>,
    snapshot_active: AtomicBool,
}

impl DiskKvStore {
    /// Opens (or creates) a store rooted at `dir`, with an index large enough
    /// to directly address `capacity` contiguous keys.
    pub fn open(dir: &Path, capacity: usize) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        let meta_path = dir.join("metadata.bin");
        let index_path = dir.join("index.bin");

        let (index, min_key, max_key) = if meta_path.exists() && index_path.exists() {
            let (_version, _num_buckets, min_key, max_key) = snapshot::read_kv_metadata(&meta_path)?;
            let packed = snapshot::read_index_file(&index_path)?;
            (
                packed.into_iter().map(AtomicI64::new).collect::<Vec<_>>(),
                min_key,
                max_key,
            )
        } else {
            let mut v = Vec::with_capacity(capacity);
            v.resize_with(capacity, || AtomicI64::new(crate::index::EMPTY_LOCATION));
            (v, 0, -1)
        };

        let collection = DataFileCollection::open(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            collection,
            index,
            min_key: AtomicI64::new(min_key),
            max_key: AtomicI64::new(max_key),
            session: Mutex::new(KvSession::new()),
            snapshot_active: AtomicBool::new(false),
        })
    }

    /// The currently published `[min_key, max_key]` range.
    pub fn valid_key_range(&self) -> (i64, i64) {
        (self.min_key.load(Ordering::Acquire), self.max_key.load(Ordering::Acquire))
    }

    fn in_range(&self, key: i64) -> bool {
        let (lo, hi) = self.valid_key_range();
        lo <= hi && key >= lo && key <= hi
    }

    fn slot(&self, key: i64) -> Option<usize> {
        if key < 0 {
            return None;
        }
        self.index.get(key as usize).map(|_| key as usize)
    }

    /// Opens a write session on the calling thread.
    pub fn begin_writing(&self) -> Result<(), StorageError> {
        let mut s = self.session.lock().expect("lock poisoned");
        if s.writing {
            return Err(StorageError::InvalidSessionState {
                state: "Writing",
                operation: "begin_writing",
            });
        }
        s.writing = true;
        s.owner = Some(std::thread::current().id());
        s.staged.clear();
        Ok(())
    }

    /// Stages a write for `key`.
    pub fn put(&self, key: i64, bytes: Vec<u8>) -> Result<(), StorageError> {
        let mut s = self.session.lock().expect("lock poisoned");
        if !s.writing {
            return Err(StorageError::InvalidSessionState {
                state: "Idle",
                operation: "put",
            });
        }
        let current = std::thread::current().id();
        if let Some(owner) = s.owner {
            if owner != current {
                return Err(StorageError::ThreadAffinity {
                    opened_by: owner,
                    called_from: current,
                });
            }
        }
        s.staged.push(PendingWrite { key, bytes });
        Ok(())
    }

    /// Flushes every staged write into one new data file and atomically
    /// publishes the new `[min_key, max_key]` range.
    pub fn end_writing(&self, min_key: i64, max_key: i64) -> Result<(), StorageError> {
        let staged = {
            let mut s = self.session.lock().expect("lock poisoned");
            if !s.writing {
                return Err(StorageError::InvalidSessionState {
                    state: "Idle",
                    operation: "end_writing",
                });
            }
            std::mem::take(&mut s.staged)
        };

        if !staged.is_empty() {
            let (file_index, mut writer) = self.collection.start_writing(kv_header(min_key, max_key))?;
            let mut locations = Vec::with_capacity(staged.len());
            for write in &staged {
                let offset = writer.append(&write.bytes)?;
                locations.push((write.key, offset));
            }
            self.collection.finish_writing(writer)?;
            for (key, offset) in locations {
                if let Some(slot) = self.slot(key) {
                    self.index[slot].store(
                        BucketLocation { file_index, offset }.pack(),
                        Ordering::Release,
                    );
                }
            }
        }

        self.min_key.store(min_key, Ordering::Release);
        self.max_key.store(max_key, Ordering::Release);

        let mut s = self.session.lock().expect("lock poisoned");
        s.writing = false;
        s.owner = None;
        tracing::debug!(records = staged.len(), min_key, max_key, "kv store write session published");
        Ok(())
    }

    /// Looks up `key`. Outside `valid_key_range` this reports not-found
    /// rather than an error — except `ROOT_KEY`, which is always treated as
    /// in-range and simply reports not-found when unwritten (Section 4.6).
    pub fn get(&self, key: i64) -> Result<Option<Vec<u8>>, StorageError> {
        if key != ROOT_KEY && !self.in_range(key) {
            return Ok(None);
        }
        let slot = match self.slot(key) {
            Some(s) => s,
            None => return Ok(None),
        };
        let packed = self.index[slot].load(Ordering::Acquire);
        let location = match BucketLocation::unpack(packed) {
            Some(l) => l,
            None => return Ok(None),
        };
        let guard = self.collection.acquire_reader(location.file_index)?;
        let bytes = guard.reader().read_record_at(location.offset)?;
        Ok(Some(bytes))
    }

    /// Compaction identical to `DiskHashMap::merge`, except keys that have
    /// fallen outside the current `valid_key_range` are dropped on rewrite —
    /// free garbage collection as the range advances (Section 4.6).
    pub fn merge(&self, inputs: &[u32]) -> Result<Option<u32>, StorageError> {
        if self.snapshot_active.load(Ordering::Acquire) {
            return Err(StorageError::MergeAborted(
                "snapshot in progress holds the pause permit".to_string(),
            ));
        }
        let (lo, hi) = self.valid_key_range();

        // The mover sees only `(old_loc, new_loc, bytes)`, not which key a
        // record belongs to; build the reverse lookup once so the CAS below
        // can go from a surviving record's old location back to its key.
        let mut by_location = ahash::AHashMap::new();
        for (key, slot) in self.index.iter().enumerate() {
            let key = key as i64;
            if key < lo || key > hi {
                continue;
            }
            if let Some(loc) = BucketLocation::unpack(slot.load(Ordering::Acquire)) {
                by_location.insert((loc.file_index, loc.offset), key);
            }
        }

        let index = &self.index;
        let out = self.collection.merge_files(kv_header(lo, hi), inputs, |old, new, _bytes| {
            if let Some(&key) = by_location.get(&(old.file_index, old.offset)) {
                let old_packed = old.pack();
                let new_packed = new.pack();
                if index[key as usize]
                    .compare_exchange(old_packed, new_packed, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    tracing::debug!(key, "merge CAS lost to a concurrent writer; stale copy discarded");
                }
            }
        })?;
        Ok(Some(out))
    }

    /// Phase 1 of the snapshot protocol (Section 4.5, shared by the kv store).
    pub fn snapshot_begin(&self, dir: &Path) -> Result<Vec<u32>, StorageError> {
        if self.snapshot_active.swap(true, Ordering::AcqRel) {
            return Err(StorageError::SnapshotInProgress);
        }
        std::fs::create_dir_all(dir)?;
        Ok(self.collection.live_indices())
    }

    /// Phase 2: copies the marked files and writes the frozen index/metadata.
    pub fn snapshot_mid(&self, dir: &Path, marked_files: &[u32]) -> Result<(), StorageError> {
        for &file_index in marked_files {
            if let Some(src) = self.collection.path_for(file_index) {
                let dst = dir.join(src.file_name().expect("data file always has a name"));
                if std::fs::hard_link(&src, &dst).is_err() {
                    std::fs::copy(&src, &dst)?;
                }
            }
        }
        let packed: Vec<i64> = self.index.iter().map(|s| s.load(Ordering::Acquire)).collect();
        snapshot::write_index_file(&dir.join("index.bin"), &packed)?;
        let (lo, hi) = self.valid_key_range();
        snapshot::write_kv_metadata(&dir.join("metadata.bin"), self.index.len() as u32, lo, hi)?;
        Ok(())
    }

    /// Phase 3: releases the pause permit.
    pub fn snapshot_end(&self, _dir: &Path) -> Result<(), StorageError> {
        self.snapshot_active.store(false, Ordering::Release);
        Ok(())
    }

    /// Root of this store's backing directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_end_writing_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = DiskKvStore::open(dir.path(), 128).unwrap();
        store.begin_writing().unwrap();
        store.put(5, b"hello".to_vec()).unwrap();
        store.end_writing(0, 10).unwrap();

        assert_eq!(store.get(5).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.valid_key_range(), (0, 10));
    }

    #[test]
    fn out_of_range_key_reports_not_found() {
        let dir = tempdir().unwrap();
        let store = DiskKvStore::open(dir.path(), 128).unwrap();
        store.begin_writing().unwrap();
        store.put(5, b"hello".to_vec()).unwrap();
        store.end_writing(0, 10).unwrap();

        assert_eq!(store.get(50).unwrap(), None);
    }

    #[test]
    fn root_key_absent_is_not_found_not_error() {
        let dir = tempdir().unwrap();
        let store = DiskKvStore::open(dir.path(), 128).unwrap();
        assert_eq!(store.get(ROOT_KEY).unwrap(), None);
    }

    #[test]
    fn end_writing_publishes_range_atomically() {
        let dir = tempdir().unwrap();
        let store = DiskKvStore::open(dir.path(), 128).unwrap();
        assert_eq!(store.valid_key_range(), (0, -1));
        store.begin_writing().unwrap();
        store.put(1, b"a".to_vec()).unwrap();
        store.end_writing(1, 1).unwrap();
        assert_eq!(store.valid_key_range(), (1, 1));
    }
}
