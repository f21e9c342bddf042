//! The durable hash map, memory-indexed kv store, and append-only data-file
//! collection backing them (Sections 4.5-4.7, 4.9). Both store types share
//! `DataFileCollection`'s file family and the `Bucket`/`BucketIndex` wire
//! formats from Section 6.
//!
//! Lock accessors throughout this crate use `expect("lock poisoned")` rather
//! than threading a recovery path through every call site: a poisoned lock
//! here means an earlier panic inside this crate's own code, not a condition
//! callers can meaningfully recover from.

pub mod bucket;
pub mod collection;
pub mod datafile;
pub mod hashmap;
pub mod index;
pub mod kvstore;
pub mod session;
pub mod snapshot;

pub use bucket::{Bucket, BucketEntry};
pub use collection::{DataFileCollection, ReaderGuard};
pub use datafile::{DataFileHeader, DataFileReader, DataFileRecordIter, DataFileWriter};
pub use hashmap::{compute_num_buckets, DiskHashMap, MapKey};
pub use index::{BucketIndex, BucketLocation};
pub use kvstore::{DiskKvStore, ROOT_KEY};
pub use session::{PendingMutation, SessionState, WriteSession};
