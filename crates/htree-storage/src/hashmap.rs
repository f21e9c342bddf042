//! `DiskHashMap`: the durable key -> i64 map described in Section 4.5 —
//! sizing, write sessions, lookup, merge (compaction), and 3-phase snapshot.

use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use htree_types::config::DiskHashMapConfig;
use htree_types::error::StorageError;
use htree_types::TOMBSTONE;

use crate::bucket::Bucket;
use crate::collection::DataFileCollection;
use crate::datafile::DataFileHeader;
use crate::index::{BucketIndex, BucketLocation};
use crate::session::{PendingMutation, WriteSession};
use crate::snapshot;

/// Reserved `serializer_class` stamped on `DiskHashMap` data files (Section 6).
pub const BUCKET_SERIALIZER_CLASS: i64 = 0x4853_4d41_5001; // "HSMAP" tag, arbitrary but stable
const BUCKET_SERIALIZER_VERSION: i32 = 1;

/// A key usable with [`DiskHashMap`]: a stable 32-bit hash for bucket routing,
/// and a serialized byte form used only for the side-channel byte-equality
/// comparison a bucket lookup performs (Section 4.5: "keys are serialized
/// only for comparison, not deserialized").
pub trait MapKey {
    /// Stable hash of this key. Two equal keys must return the same value.
    fn key_hash(&self) -> i32;
    /// Serialized bytes used for exact-match comparison inside a bucket.
    fn key_bytes(&self) -> Vec<u8>;
}

impl MapKey for i64 {
    fn key_hash(&self) -> i32 {
        let mut hasher = ahash::AHasher::default();
        hasher.write_i64(*self);
        hasher.finish() as i32
    }

    fn key_bytes(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
}

impl MapKey for String {
    fn key_hash(&self) -> i32 {
        let mut hasher = ahash::AHasher::default();
        hasher.write(self.as_bytes());
        hasher.finish() as i32
    }

    fn key_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

/// Computes `num_buckets = next_power_of_two(ceil(map_size / LF / AVG))`
/// (Section 4.5's sizing formula).
pub fn compute_num_buckets(map_size: u64, avg_entries_per_bucket: u32, load_factor: f64) -> usize {
    let min_buckets = (map_size as f64 / load_factor / avg_entries_per_bucket as f64).ceil();
    (min_buckets.max(1.0) as u64).next_power_of_two() as usize
}

fn bucket_index_for(key_hash: i32, num_buckets: usize) -> usize {
    let mask = (num_buckets - 1) as u64;
    ((key_hash as u32 as u64) & mask) as usize
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn bucket_header() -> DataFileHeader {
    DataFileHeader {
        format_version: 1,
        creation_ts: now_millis(),
        serializer_class: BUCKET_SERIALIZER_CLASS,
        serializer_version: BUCKET_SERIALIZER_VERSION,
        min_key: 0,
        max_key: 0,
    }
}

/// A persistent key -> i64 map (Section 4.5). The bucket index lives in
/// memory (optionally overlaid during a snapshot); bucket contents live in
/// the append-only data files owned by a [`DataFileCollection`].
pub struct DiskHashMap {
    dir: PathBuf,
    config: DiskHashMapConfig,
    num_buckets: usize,
    min_buckets: usize,
    index: BucketIndex,
    collection: DataFileCollection,
    session: Mutex<WriteSession>,
    snapshot_active: AtomicBool,
}

impl DiskHashMap {
    /// Opens (or creates) a map rooted at `dir`, sized per `config.map_size`.
    /// If an index/metadata pair from a previous run is present, the prior
    /// `num_buckets` is honored instead of resizing.
    pub fn open(dir: &Path, config: DiskHashMapConfig) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        let min_buckets_computed =
            (config.map_size as f64 / config.load_factor / config.avg_entries_per_bucket as f64).ceil() as usize;
        let meta_path = dir.join("metadata.bin");
        let index_path = dir.join("index.bin");

        let (num_buckets, index) = if meta_path.exists() && index_path.exists() {
            let (_version, _min_buckets, num_buckets) = snapshot::read_hashmap_metadata(&meta_path)?;
            let packed = snapshot::read_index_file(&index_path)?;
            (num_buckets as usize, BucketIndex::from_packed(packed))
        } else {
            let num_buckets = compute_num_buckets(config.map_size, config.avg_entries_per_bucket, config.load_factor);
            (num_buckets, BucketIndex::new(num_buckets))
        };

        let collection = DataFileCollection::open(dir)?;
        tracing::info!(dir = %dir.display(), num_buckets, "disk hash map opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            num_buckets,
            min_buckets: min_buckets_computed.max(1),
            index,
            collection,
            session: Mutex::new(WriteSession::new()),
            snapshot_active: AtomicBool::new(false),
        })
    }

    /// The number of bucket slots this map was sized to (always a power of two).
    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    /// `begin_writing()`: opens a write session on the calling thread.
    pub fn begin_writing(&self) -> Result<(), StorageError> {
        self.session.lock().expect("lock poisoned").begin_writing()
    }

    /// Stages a put for `key` (or, if `value == TOMBSTONE`, a delete) against
    /// the currently open write session.
    pub fn put<K: MapKey>(&self, key: &K, value: i64) -> Result<(), StorageError> {
        let key_hash = key.key_hash();
        let bucket_index = bucket_index_for(key_hash, self.num_buckets) as i32;
        let mutation = PendingMutation {
            key_hash,
            key_bytes: key.key_bytes(),
            value,
        };
        self.session.lock().expect("lock poisoned").put(bucket_index, mutation)
    }

    /// Stages a delete for `key`, encoded as `put(key, TOMBSTONE)`.
    pub fn delete<K: MapKey>(&self, key: &K) -> Result<(), StorageError> {
        self.put(key, TOMBSTONE)
    }

    /// Reads the bucket currently at `bucket_index` from disk via the index,
    /// or an empty bucket if the slot has never been written.
    fn read_bucket(&self, bucket_index: usize) -> Result<Bucket, StorageError> {
        match self.index.get(bucket_index) {
            None => Ok(Bucket::new(bucket_index as i32)),
            Some(loc) => {
                let guard = self.collection.acquire_reader(loc.file_index)?;
                let bytes = guard.reader().read_record_at(loc.offset)?;
                Bucket::deserialize(&bytes)
            }
        }
    }

    /// `end_writing()`: `Writing -> Flushing -> Publishing -> Idle` (Section
    /// 4.9). Rewrites every affected bucket into a fresh data file in
    /// ascending bucket-index order, then publishes the new locations.
    pub fn end_writing(&self) -> Result<(), StorageError> {
        let batches = self.session.lock().expect("lock poisoned").begin_flush()?;
        if batches.is_empty() {
            self.session.lock().expect("lock poisoned").begin_publish()?;
            self.session.lock().expect("lock poisoned").finish()?;
            return Ok(());
        }

        let (out_file_index, mut writer) = self.collection.start_writing(bucket_header())?;
        let mut new_locations = Vec::with_capacity(batches.len());
        for (bucket_index, mutations) in &batches {
            let mut bucket = self.read_bucket(*bucket_index as usize)?;
            for m in mutations {
                bucket.put(m.key_hash, m.key_bytes.clone(), m.value);
            }
            let offset = writer.append(&bucket.serialize())?;
            new_locations.push((*bucket_index, offset));
        }
        self.collection.finish_writing(writer)?;

        self.session.lock().expect("lock poisoned").begin_publish()?;
        for (bucket_index, offset) in new_locations {
            self.index.set(
                bucket_index as usize,
                BucketLocation {
                    file_index: out_file_index,
                    offset,
                },
            );
        }
        self.session.lock().expect("lock poisoned").finish()?;
        tracing::debug!(buckets = batches.len(), file_index = out_file_index, "write session published");
        Ok(())
    }

    /// `close()`: only legal while `Idle`.
    pub fn close(&self) -> Result<(), StorageError> {
        self.session.lock().expect("lock poisoned").close()
    }

    /// `get(k)`: computes the bucket index, reads the bucket, then linear
    /// scans comparing `key_hash` first and full key bytes second.
    pub fn get<K: MapKey>(&self, key: &K) -> Result<Option<i64>, StorageError> {
        let bucket_index = bucket_index_for(key.key_hash(), self.num_buckets);
        let bucket = self.read_bucket(bucket_index)?;
        Ok(bucket.get(key.key_hash(), &key.key_bytes()))
    }

    /// Compaction: rewrites the live entries of `inputs` into one new output
    /// file, CAS-ing the index per rewritten bucket so a concurrent writer
    /// always wins (Section 4.5, 5). Fails fast if a snapshot currently holds
    /// the pause permit; the caller (an external scheduler) is expected to
    /// retry later.
    pub fn merge(&self, inputs: &[u32]) -> Result<Option<u32>, StorageError> {
        if inputs.len() < self.config.min_files_to_merge {
            return Ok(None);
        }
        if self.snapshot_active.load(Ordering::Acquire) {
            return Err(StorageError::MergeAborted(
                "snapshot in progress holds the pause permit".to_string(),
            ));
        }
        let index = &self.index;
        let out = self.collection.merge_files(bucket_header(), inputs, |old, new, bytes| {
            match Bucket::deserialize(bytes) {
                Ok(bucket) => {
                    if !index.cas(bucket.bucket_index as usize, old, new) {
                        tracing::debug!(
                            bucket_index = bucket.bucket_index,
                            "merge CAS lost to a concurrent writer; stale copy discarded"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "merge encountered an undecodable bucket record");
                }
            }
        })?;
        tracing::info!(inputs = ?inputs, out, "merge completed");
        Ok(Some(out))
    }

    /// Phase 1 of the snapshot protocol: freezes the index behind an overlay
    /// and marks the current file set as the copy target. Fails if a
    /// snapshot is already in progress (Section 9: at most one at a time).
    pub fn snapshot_begin(&self, dir: &Path) -> Result<Vec<u32>, StorageError> {
        if self.snapshot_active.swap(true, Ordering::AcqRel) {
            return Err(StorageError::SnapshotInProgress);
        }
        self.index.enable_overlay();
        std::fs::create_dir_all(dir)?;
        let files = self.collection.live_indices();
        tracing::info!(dir = %dir.display(), files = files.len(), "snapshot_begin");
        Ok(files)
    }

    /// Phase 2: copies (hard-linking where possible) the files marked in
    /// `snapshot_begin`, then writes the frozen index and metadata.
    pub fn snapshot_mid(&self, dir: &Path, marked_files: &[u32]) -> Result<(), StorageError> {
        for &file_index in marked_files {
            if let Some(src) = self.collection.path_for(file_index) {
                let dst = dir.join(src.file_name().expect("data file always has a name"));
                if std::fs::hard_link(&src, &dst).is_err() {
                    std::fs::copy(&src, &dst)?;
                }
            }
        }
        snapshot::write_index_file(&dir.join("index.bin"), &self.index.snapshot_base())?;
        snapshot::write_hashmap_metadata(&dir.join("metadata.bin"), self.min_buckets as u32, self.num_buckets as u32)?;
        tracing::info!(dir = %dir.display(), "snapshot_mid");
        Ok(())
    }

    /// Phase 3: merges the overlay back into the base index and releases the
    /// pause permit.
    pub fn snapshot_end(&self, _dir: &Path) -> Result<(), StorageError> {
        self.index.disable_overlay();
        self.snapshot_active.store(false, Ordering::Release);
        tracing::info!("snapshot_end");
        Ok(())
    }

    /// Convenience wrapper running all three snapshot phases back to back.
    /// Most callers that don't need to interleave other work between phases
    /// (Section 4.5's `snapshot_mid` note that "saves unblocked" during the
    /// copy) should use this; `DiskHashMap::snapshot_begin`/`_mid`/`_end` are
    /// exposed separately for callers that do.
    pub fn snapshot(&self, dir: &Path) -> Result<(), StorageError> {
        let marked = self.snapshot_begin(dir)?;
        let result = self.snapshot_mid(dir, &marked);
        self.snapshot_end(dir)?;
        result
    }

    /// Reopens a previously written snapshot directory as a standalone,
    /// independent `DiskHashMap` (Section 8: "opening D yields a map
    /// semantically equal to the source map at t").
    pub fn open_snapshot(dir: &Path, config: DiskHashMapConfig) -> Result<Self, StorageError> {
        Self::open(dir, config)
    }

    /// Root of this map's backing directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cfg() -> DiskHashMapConfig {
        DiskHashMapConfig {
            map_size: 1_000,
            ..Default::default()
        }
    }

    #[test]
    fn sizing_matches_spec_formula() {
        assert_eq!(compute_num_buckets(1_000_000, 20, 0.6), 83_334_u64.next_power_of_two() as usize);
        assert!(compute_num_buckets(1, 20, 0.6).is_power_of_two());
    }

    #[test]
    fn put_end_writing_get_round_trips() {
        let dir = tempdir().unwrap();
        let map = DiskHashMap::open(dir.path(), cfg()).unwrap();
        map.begin_writing().unwrap();
        map.put(&7i64, 42).unwrap();
        map.end_writing().unwrap();

        assert_eq!(map.get(&7i64).unwrap(), Some(42));
        assert_eq!(map.get(&8i64).unwrap(), None);
    }

    #[test]
    fn delete_then_get_returns_not_found() {
        let dir = tempdir().unwrap();
        let map = DiskHashMap::open(dir.path(), cfg()).unwrap();
        map.begin_writing().unwrap();
        map.put(&1i64, 10).unwrap();
        map.end_writing().unwrap();
        assert_eq!(map.get(&1i64).unwrap(), Some(10));

        map.begin_writing().unwrap();
        map.delete(&1i64).unwrap();
        map.end_writing().unwrap();
        assert_eq!(map.get(&1i64).unwrap(), None);
    }

    #[test]
    fn concurrent_session_is_rejected() {
        let dir = tempdir().unwrap();
        let map = DiskHashMap::open(dir.path(), cfg()).unwrap();
        map.begin_writing().unwrap();
        assert!(map.begin_writing().is_err());
    }

    #[test]
    fn snapshot_isolation_holds() {
        let dir = tempdir().unwrap();
        let map = DiskHashMap::open(dir.path(), cfg()).unwrap();
        map.begin_writing().unwrap();
        map.put(&2i64, 20).unwrap();
        map.end_writing().unwrap();

        let snap_dir = tempdir().unwrap();
        let marked = map.snapshot_begin(snap_dir.path()).unwrap();

        map.begin_writing().unwrap();
        map.put(&3i64, 30).unwrap();
        map.end_writing().unwrap();

        map.snapshot_mid(snap_dir.path(), &marked).unwrap();
        map.snapshot_end(snap_dir.path()).unwrap();

        let reopened = DiskHashMap::open_snapshot(snap_dir.path(), cfg()).unwrap();
        assert_eq!(reopened.get(&2i64).unwrap(), Some(20));
        assert_eq!(reopened.get(&3i64).unwrap(), None);
        assert_eq!(map.get(&3i64).unwrap(), Some(30));
    }

    #[test]
    fn concurrent_snapshot_is_rejected() {
        let dir = tempdir().unwrap();
        let map = DiskHashMap::open(dir.path(), cfg()).unwrap();
        let snap_dir = tempdir().unwrap();
        map.snapshot_begin(snap_dir.path()).unwrap();
        let snap_dir2 = tempdir().unwrap();
        assert!(matches!(
            map.snapshot_begin(snap_dir2.path()),
            Err(StorageError::SnapshotInProgress)
        ));
    }

    #[test]
    fn merge_preserves_bucket_contents() {
        let dir = tempdir().unwrap();
        let mut config = cfg();
        config.min_files_to_merge = 1;
        let map = DiskHashMap::open(dir.path(), config).unwrap();

        map.begin_writing().unwrap();
        map.put(&1i64, 100).unwrap();
        map.end_writing().unwrap();
        map.begin_writing().unwrap();
        map.put(&2i64, 200).unwrap();
        map.end_writing().unwrap();

        let inputs = map.collection.live_indices();
        let out = map.merge(&inputs).unwrap();
        assert!(out.is_some());
        assert_eq!(map.get(&1i64).unwrap(), Some(100));
        assert_eq!(map.get(&2i64).unwrap(), Some(200));
    }
}
