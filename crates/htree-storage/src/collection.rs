//! `DataFileCollection`: owns a directory of numbered data files, assigns
//! monotonic file indices, and tracks a reader registry whose shared counts
//! gate physical deletion until a retired file has no readers left
//! (Section 4.7).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use htree_types::error::StorageError;

use crate::datafile::{DataFileHeader, DataFileReader, DataFileWriter};
use crate::index::BucketLocation;

/// Per-file bookkeeping: whether merge has retired the file, and how many
/// live reader handles currently reference it.
struct FileEntry {
    path: PathBuf,
    retired: bool,
    shared_count: usize,
}

/// A handle a caller holds while reading a file; dropping it decrements the
/// collection's shared count for that file index, physically deleting the
/// file if it was already retired and no other handle remains.
pub struct ReaderGuard {
    collection: Arc<CollectionInner>,
    file_index: u32,
    reader: Arc<DataFileReader>,
}

impl ReaderGuard {
    pub fn reader(&self) -> &DataFileReader {
        &self.reader
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.collection.release(self.file_index);
    }
}

struct CollectionInner {
    dir: PathBuf,
    next_index: AtomicU32,
    files: Mutex<HashMap<u32, FileEntry>>,
    readers: Mutex<HashMap<u32, Arc<DataFileReader>>>,
    open_reader_total: AtomicUsize,
}

impl CollectionInner {
    fn release(&self, file_index: u32) {
        let mut files = self.files.lock().expect("lock poisoned");
        if let Some(entry) = files.get_mut(&file_index) {
            entry.shared_count = entry.shared_count.saturating_sub(1);
            if entry.retired && entry.shared_count == 0 {
                let path = entry.path.clone();
                files.remove(&file_index);
                drop(files);
                self.readers.lock().expect("lock poisoned").remove(&file_index);
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to delete retired data file");
                } else {
                    tracing::debug!(path = %path.display(), "retired data file physically deleted");
                }
            }
        }
        self.open_reader_total.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Owns one directory of `<index>.df` files.
pub struct DataFileCollection {
    inner: Arc<CollectionInner>,
}

fn file_name(index: u32) -> String {
    format!("{index:020}.df")
}

impl DataFileCollection {
    /// Opens (or creates) a collection rooted at `dir`. Any existing
    /// `<index>.df` files are discovered and registered so `next_index`
    /// continues monotonically across restarts.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        let mut max_seen: Option<u32> = None;
        let mut files = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("df") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Ok(idx) = stem.parse::<u32>() {
                    max_seen = Some(max_seen.map_or(idx, |m| m.max(idx)));
                    files.insert(
                        idx,
                        FileEntry {
                            path,
                            retired: false,
                            shared_count: 0,
                        },
                    );
                }
            }
        }
        let next = max_seen.map_or(0, |m| m + 1);
        Ok(Self {
            inner: Arc::new(CollectionInner {
                dir: dir.to_path_buf(),
                next_index: AtomicU32::new(next),
                files: Mutex::new(files),
                readers: Mutex::new(HashMap::new()),
                open_reader_total: AtomicUsize::new(0),
            }),
        })
    }

    /// Begins a new file for writing, assigned the next monotonic index.
    /// Returns the index and a writer positioned past the header.
    pub fn start_writing(&self, header: DataFileHeader) -> Result<(u32, DataFileWriter), StorageError> {
        let index = self.inner.next_index.fetch_add(1, Ordering::SeqCst);
        let path = self.inner.dir.join(file_name(index));
        let writer = DataFileWriter::create(&path, header)?;
        self.inner.files.lock().expect("lock poisoned").insert(
            index,
            FileEntry {
                path,
                retired: false,
                shared_count: 0,
            },
        );
        Ok((index, writer))
    }

    /// Finishes a file produced by [`Self::start_writing`]. The file is now
    /// readable and eligible for merge consideration.
    pub fn finish_writing(&self, writer: DataFileWriter) -> Result<(), StorageError> {
        writer.finish()
    }

    /// Opens (or reuses a cached) reader for `file_index`, incrementing its
    /// shared count. The file must not already have been physically deleted.
    pub fn acquire_reader(&self, file_index: u32) -> Result<ReaderGuard, StorageError> {
        let path = {
            let mut files = self.inner.files.lock().expect("lock poisoned");
            let entry = files.get_mut(&file_index).ok_or(StorageError::NotFound)?;
            entry.shared_count += 1;
            entry.path.clone()
        };
        let mut readers = self.inner.readers.lock().expect("lock poisoned");
        let reader = match readers.get(&file_index) {
            Some(r) => r.clone(),
            None => {
                let r = Arc::new(DataFileReader::open(&path)?);
                readers.insert(file_index, r.clone());
                r
            }
        };
        self.inner.open_reader_total.fetch_add(1, Ordering::Relaxed);
        Ok(ReaderGuard {
            collection: self.inner.clone(),
            file_index,
            reader,
        })
    }

    /// Marks `file_index` retired: no new reader may be acquired for it, and
    /// once its shared count drops to zero it is physically deleted.
    pub fn retire(&self, file_index: u32) {
        let mut files = self.inner.files.lock().expect("lock poisoned");
        if let Some(entry) = files.get_mut(&file_index) {
            entry.retired = true;
            if entry.shared_count == 0 {
                let path = entry.path.clone();
                files.remove(&file_index);
                drop(files);
                self.inner.readers.lock().expect("lock poisoned").remove(&file_index);
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to delete retired data file");
                }
            }
        }
    }

    /// The directory this collection is rooted at.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// The path of a currently-registered file, `None` if unknown.
    pub fn path_for(&self, file_index: u32) -> Option<PathBuf> {
        self.inner
            .files
            .lock()
            .expect("lock poisoned")
            .get(&file_index)
            .map(|e| e.path.clone())
    }

    /// All currently-registered (non-retired) file indices, ascending.
    pub fn live_indices(&self) -> Vec<u32> {
        let files = self.inner.files.lock().expect("lock poisoned");
        let mut v: Vec<_> = files
            .iter()
            .filter(|(_, e)| !e.retired)
            .map(|(i, _)| *i)
            .collect();
        v.sort_unstable();
        v
    }

    /// Streams every surviving record across `inputs` (files assumed
    /// finalized) into one freshly started output file, invoking `mover` for
    /// each record with its old and new locations so the caller can CAS the
    /// index. Retires the input files once fully rewritten. Returns the new
    /// file's index.
    pub fn merge_files(
        &self,
        header: DataFileHeader,
        inputs: &[u32],
        mut mover: impl FnMut(BucketLocation, BucketLocation, &[u8]),
    ) -> Result<u32, StorageError> {
        let (out_index, mut writer) = self.start_writing(header)?;
        for &file_index in inputs {
            let guard = self.acquire_reader(file_index)?;
            for record in guard.reader().iter_records()? {
                let (old_offset, bytes) = record?;
                let new_offset = writer.append(&bytes)?;
                mover(
                    BucketLocation { file_index, offset: old_offset },
                    BucketLocation { file_index: out_index, offset: new_offset },
                    &bytes,
                );
            }
        }
        self.finish_writing(writer)?;
        for &file_index in inputs {
            self.retire(file_index);
        }
        tracing::info!(out_index, inputs = ?inputs, "merge produced new data file");
        Ok(out_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn header() -> DataFileHeader {
        DataFileHeader {
            format_version: 1,
            creation_ts: 0,
            serializer_class: 1,
            serializer_version: 1,
            min_key: 0,
            max_key: 0,
        }
    }

    #[test]
    fn start_then_finish_then_read_back() {
        let dir = tempdir().unwrap();
        let collection = DataFileCollection::open(dir.path()).unwrap();
        let (idx, mut writer) = collection.start_writing(header()).unwrap();
        writer.append(b"hi").unwrap();
        collection.finish_writing(writer).unwrap();

        let guard = collection.acquire_reader(idx).unwrap();
        let records: Vec<_> = guard.reader().iter_records().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(records[0].1, b"hi");
    }

    #[test]
    fn retired_file_with_open_reader_deletes_on_release() {
        let dir = tempdir().unwrap();
        let collection = DataFileCollection::open(dir.path()).unwrap();
        let (idx, writer) = collection.start_writing(header()).unwrap();
        collection.finish_writing(writer).unwrap();
        let guard = collection.acquire_reader(idx).unwrap();
        let path = guard.reader().header();
        let _ = path;
        collection.retire(idx);
        assert!(dir.path().join(file_name(idx)).exists());
        drop(guard);
        assert!(!dir.path().join(file_name(idx)).exists());
    }

    #[test]
    fn merge_rewrites_records_and_retires_inputs() {
        let dir = tempdir().unwrap();
        let collection = DataFileCollection::open(dir.path()).unwrap();
        let (idx, mut writer) = collection.start_writing(header()).unwrap();
        writer.append(b"a").unwrap();
        writer.append(b"b").unwrap();
        collection.finish_writing(writer).unwrap();

        let mut moves = Vec::new();
        let out = collection
            .merge_files(header(), &[idx], |old, new, bytes| moves.push((old, new, bytes.to_vec())))
            .unwrap();
        assert_eq!(moves.len(), 2);
        assert_ne!(out, idx);
        assert!(collection.live_indices().contains(&out));
        assert!(!collection.live_indices().contains(&idx));
    }
}
