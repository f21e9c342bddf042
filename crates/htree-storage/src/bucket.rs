//! In-memory `Bucket`: the working set of entries whose key hashes to the
//! same slot, plus its on-disk record layout (Section 6's bucket record).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use htree_types::error::StorageError;
use htree_types::TOMBSTONE;

/// One entry inside a bucket: a key's hash (for cheap rejection), its
/// current value (or [`TOMBSTONE`]), and the serialized key bytes used for
/// the final byte-exact comparison on lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketEntry {
    pub key_hash: i32,
    pub value: i64,
    pub key_bytes: Vec<u8>,
}

/// The in-memory contents of one bucket: its own index and an ordered list
/// of entries. Grows by appending; shrinks by swap-removing a matched
/// entry's slot so insertion order among the rest is preserved by shifting
/// (Section 6, "Put/delete semantics inside a bucket").
#[derive(Debug, Clone, Default)]
pub struct Bucket {
    pub bucket_index: i32,
    pub entries: Vec<BucketEntry>,
}

impl Bucket {
    /// An empty bucket for `bucket_index`.
    pub fn new(bucket_index: i32) -> Self {
        Self {
            bucket_index,
            entries: Vec::new(),
        }
    }

    fn find(&self, key_hash: i32, key_bytes: &[u8]) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.key_hash == key_hash && e.key_bytes == key_bytes)
    }

    /// Looks up a key's current value. A stored [`TOMBSTONE`] is reported
    /// the same as absence — callers that need to distinguish "never
    /// written" from "deleted" should not need to, since both read as
    /// not-found.
    pub fn get(&self, key_hash: i32, key_bytes: &[u8]) -> Option<i64> {
        self.find(key_hash, key_bytes).and_then(|i| {
            let v = self.entries[i].value;
            if v == TOMBSTONE {
                None
            } else {
                Some(v)
            }
        })
    }

    /// Applies a put (or, if `value == TOMBSTONE`, a delete) for a key. If the
    /// key is present and this is a delete, the entry is removed outright
    /// (shifting the trailing entries down) rather than overwritten with a
    /// tombstone value, so `entries.len()` always reflects the live entry
    /// count a freshly-rewritten bucket should have (Section 4.5, Section 6
    /// "Put/delete semantics inside a bucket"). A delete of a key that isn't
    /// present in this bucket is a no-op: there's nothing here to shift out.
    pub fn put(&mut self, key_hash: i32, key_bytes: Vec<u8>, value: i64) {
        match self.find(key_hash, &key_bytes) {
            Some(i) => {
                if value == TOMBSTONE {
                    self.entries.remove(i);
                } else {
                    self.entries[i].value = value;
                }
            }
            None => {
                if value != TOMBSTONE {
                    self.entries.push(BucketEntry {
                        key_hash,
                        value,
                        key_bytes,
                    });
                }
            }
        }
    }

    /// Number of live (non-tombstone) entries.
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.value != TOMBSTONE).count()
    }

    /// Serializes this bucket into its on-disk record layout:
    /// `bucket_index:i32, size_bytes:i32, entry_count:i32,
    /// { key_hash:i32, value:i64, key_serialized:bytes }*entry_count`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for e in &self.entries {
            body.write_i32::<BigEndian>(e.key_hash).expect("write to Vec cannot fail");
            body.write_i64::<BigEndian>(e.value).expect("write to Vec cannot fail");
            body.write_u32::<BigEndian>(e.key_bytes.len() as u32)
                .expect("write to Vec cannot fail");
            body.extend_from_slice(&e.key_bytes);
        }
        let mut out = Vec::with_capacity(12 + body.len());
        out.write_i32::<BigEndian>(self.bucket_index).expect("write to Vec cannot fail");
        out.write_i32::<BigEndian>(body.len() as i32).expect("write to Vec cannot fail");
        out.write_i32::<BigEndian>(self.entries.len() as i32)
            .expect("write to Vec cannot fail");
        out.extend_from_slice(&body);
        out
    }

    /// Parses a bucket record previously produced by [`Bucket::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
        let corrupt = |reason: String| StorageError::CorruptFile {
            file: "<bucket record>".to_string(),
            reason,
        };
        let mut cursor = bytes;
        let bucket_index = cursor
            .read_i32::<BigEndian>()
            .map_err(|e| corrupt(format!("bucket_index: {e}")))?;
        let size_bytes = cursor
            .read_i32::<BigEndian>()
            .map_err(|e| corrupt(format!("size_bytes: {e}")))? as usize;
        let entry_count = cursor
            .read_i32::<BigEndian>()
            .map_err(|e| corrupt(format!("entry_count: {e}")))?;
        if cursor.len() != size_bytes {
            return Err(corrupt(format!(
                "declared size_bytes {size_bytes} does not match remaining {}",
                cursor.len()
            )));
        }
        let mut entries = Vec::with_capacity(entry_count.max(0) as usize);
        for _ in 0..entry_count {
            let key_hash = cursor
                .read_i32::<BigEndian>()
                .map_err(|e| corrupt(format!("key_hash: {e}")))?;
            let value = cursor
                .read_i64::<BigEndian>()
                .map_err(|e| corrupt(format!("value: {e}")))?;
            let key_len = cursor
                .read_u32::<BigEndian>()
                .map_err(|e| corrupt(format!("key len: {e}")))? as usize;
            if cursor.len() < key_len {
                return Err(corrupt("key bytes truncated".to_string()));
            }
            let (key_bytes, rest) = cursor.split_at(key_len);
            entries.push(BucketEntry {
                key_hash,
                value,
                key_bytes: key_bytes.to_vec(),
            });
            cursor = rest;
        }
        Ok(Self {
            bucket_index,
            entries,
        })
    }
}
