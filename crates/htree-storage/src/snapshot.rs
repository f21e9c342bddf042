//! Shared on-disk snapshot file formats (Section 6): the bucket-location
//! index file and the small metadata files that accompany it. Both
//! `DiskHashMap` and `DiskKvStore` use these helpers so the two formats stay
//! byte-identical to what Section 6 specifies.

use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use htree_types::error::StorageError;

/// Current on-disk format version stamped into every metadata file this
/// module writes.
pub const METADATA_FORMAT_VERSION: i32 = 1;

fn corrupt(path: &Path, reason: impl std::fmt::Display) -> StorageError {
    StorageError::CorruptFile {
        file: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Writes the hash map index file: `count:i64, [location:i64] * count`.
pub fn write_index_file(path: &Path, locations: &[i64]) -> Result<(), StorageError> {
    let mut buf = Vec::with_capacity(8 + locations.len() * 8);
    buf.write_i64::<BigEndian>(locations.len() as i64)?;
    for &loc in locations {
        buf.write_i64::<BigEndian>(loc)?;
    }
    std::fs::write(path, buf)?;
    Ok(())
}

/// Reads back an index file written by [`write_index_file`].
pub fn read_index_file(path: &Path) -> Result<Vec<i64>, StorageError> {
    let bytes = std::fs::read(path)?;
    let mut cursor = &bytes[..];
    let count = cursor
        .read_i64::<BigEndian>()
        .map_err(|e| corrupt(path, format!("count: {e}")))?;
    if count < 0 {
        return Err(corrupt(path, format!("negative count {count}")));
    }
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        out.push(
            cursor
                .read_i64::<BigEndian>()
                .map_err(|e| corrupt(path, format!("location[{i}]: {e}")))?,
        );
    }
    Ok(out)
}

/// Writes the `DiskHashMap` metadata file: `format_version:i32,
/// min_buckets:i32, num_buckets:i32`.
pub fn write_hashmap_metadata(path: &Path, min_buckets: u32, num_buckets: u32) -> Result<(), StorageError> {
    let mut buf = Vec::with_capacity(12);
    buf.write_i32::<BigEndian>(METADATA_FORMAT_VERSION)?;
    buf.write_i32::<BigEndian>(min_buckets as i32)?;
    buf.write_i32::<BigEndian>(num_buckets as i32)?;
    std::fs::write(path, buf)?;
    Ok(())
}

/// Reads back `(format_version, min_buckets, num_buckets)`.
pub fn read_hashmap_metadata(path: &Path) -> Result<(i32, u32, u32), StorageError> {
    let bytes = std::fs::read(path)?;
    let mut cursor = &bytes[..];
    let version = cursor
        .read_i32::<BigEndian>()
        .map_err(|e| corrupt(path, format!("format_version: {e}")))?;
    let min_buckets = cursor
        .read_i32::<BigEndian>()
        .map_err(|e| corrupt(path, format!("min_buckets: {e}")))? as u32;
    let num_buckets = cursor
        .read_i32::<BigEndian>()
        .map_err(|e| corrupt(path, format!("num_buckets: {e}")))? as u32;
    Ok((version, min_buckets, num_buckets))
}

/// Writes the `DiskKvStore` metadata file: the hash-map shape plus the
/// `valid_key_range` `DiskKvStore` publishes atomically on `end_writing`.
pub fn write_kv_metadata(path: &Path, num_buckets: u32, min_key: i64, max_key: i64) -> Result<(), StorageError> {
    let mut buf = Vec::with_capacity(24);
    buf.write_i32::<BigEndian>(METADATA_FORMAT_VERSION)?;
    buf.write_i32::<BigEndian>(num_buckets as i32)?;
    buf.write_i64::<BigEndian>(min_key)?;
    buf.write_i64::<BigEndian>(max_key)?;
    std::fs::write(path, buf)?;
    Ok(())
}

/// Reads back `(format_version, num_buckets, min_key, max_key)`.
pub fn read_kv_metadata(path: &Path) -> Result<(i32, u32, i64, i64), StorageError> {
    let bytes = std::fs::read(path)?;
    let mut cursor = &bytes[..];
    let version = cursor
        .read_i32::<BigEndian>()
        .map_err(|e| corrupt(path, format!("format_version: {e}")))?;
    let num_buckets = cursor
        .read_i32::<BigEndian>()
        .map_err(|e| corrupt(path, format!("num_buckets: {e}")))? as u32;
    let min_key = cursor
        .read_i64::<BigEndian>()
        .map_err(|e| corrupt(path, format!("min_key: {e}")))?;
    let max_key = cursor
        .read_i64::<BigEndian>()
        .map_err(|e| corrupt(path, format!("max_key: {e}")))?;
    Ok((version, num_buckets, min_key, max_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn index_file_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let locations = vec![-1, 10, 20, -1];
        write_index_file(&path, &locations).unwrap();
        assert_eq!(read_index_file(&path).unwrap(), locations);
    }

    #[test]
    fn hashmap_metadata_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.bin");
        write_hashmap_metadata(&path, 16, 16).unwrap();
        assert_eq!(read_hashmap_metadata(&path).unwrap(), (METADATA_FORMAT_VERSION, 16, 16));
    }

    #[test]
    fn kv_metadata_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.bin");
        write_kv_metadata(&path, 1024, 0, 999).unwrap();
        assert_eq!(
            read_kv_metadata(&path).unwrap(),
            (METADATA_FORMAT_VERSION, 1024, 0, 999)
        );
    }
}
