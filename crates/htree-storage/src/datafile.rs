//! `DataFile`: one append-only, header-prefixed record log (Section 6's
//! generic data-file format). Every record is additionally wrapped with a
//! `u32` length prefix at this layer so the collection can scan a file's
//! records without understanding their payload shape — bucket records and
//! kv-store records still carry their own documented internal layout inside
//! that envelope (logged as a deliberate choice in `DESIGN.md`).

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use htree_types::error::StorageError;

/// Fixed header recorded at the start of every data file (Section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFileHeader {
    /// On-disk layout version for this file.
    pub format_version: i32,
    /// Wall-clock creation time, milliseconds since epoch.
    pub creation_ts: i64,
    /// Registered class id of the serializer that produced this file's records.
    pub serializer_class: i64,
    /// Wire version of that serializer.
    pub serializer_version: i32,
    /// Smallest key known to be represented among this file's live entries.
    pub min_key: i64,
    /// Largest key known to be represented among this file's live entries.
    pub max_key: i64,
}

const HEADER_LEN: u64 = 4 + 8 + 8 + 4 + 8 + 8;

impl DataFileHeader {
    fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_i32::<BigEndian>(self.format_version)?;
        w.write_i64::<BigEndian>(self.creation_ts)?;
        w.write_i64::<BigEndian>(self.serializer_class)?;
        w.write_i32::<BigEndian>(self.serializer_version)?;
        w.write_i64::<BigEndian>(self.min_key)?;
        w.write_i64::<BigEndian>(self.max_key)
    }

    fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            format_version: r.read_i32::<BigEndian>()?,
            creation_ts: r.read_i64::<BigEndian>()?,
            serializer_class: r.read_i64::<BigEndian>()?,
            serializer_version: r.read_i32::<BigEndian>()?,
            min_key: r.read_i64::<BigEndian>()?,
            max_key: r.read_i64::<BigEndian>()?,
        })
    }
}

/// An append-only writer for one data file. Created once by `start_writing`
/// and consumed by `end_writing` (Section 4.7); never reopened for further
/// appends afterward.
pub struct DataFileWriter {
    path: PathBuf,
    file: BufWriter<File>,
    offset: u64,
}

impl DataFileWriter {
    /// Creates `path` and writes `header`, positioning the cursor for appends.
    pub fn create(path: &Path, header: DataFileHeader) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        header.write(&mut writer)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: writer,
            offset: HEADER_LEN,
        })
    }

    /// Appends one record, returning the byte offset at which it starts
    /// (the value a `BucketLocation`/kv index entry should record).
    pub fn append(&mut self, record: &[u8]) -> Result<u64, StorageError> {
        let start = self.offset;
        self.file.write_u32::<BigEndian>(record.len() as u32)?;
        self.file.write_all(record)?;
        self.offset += 4 + record.len() as u64;
        Ok(start)
    }

    /// Flushes the buffered writer, fsyncs the file, and closes it. The file
    /// is now immutable and eligible for merge (Section 3's `DataFile` lifecycle).
    pub fn finish(mut self) -> Result<(), StorageError> {
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        tracing::debug!(path = %self.path.display(), bytes = self.offset, "data file closed for writing");
        Ok(())
    }

    /// Current write offset (header length plus all appended records so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// A shared reader over a closed data file. Multiple `DataFileReader`s for
/// the same file share an OS-level open handle count only nominally — the
/// collection's reader registry is what tracks the logical shared count that
/// gates physical deletion (Section 4.7).
pub struct DataFileReader {
    path: PathBuf,
    header: DataFileHeader,
}

impl DataFileReader {
    /// Opens `path`, reading and validating its header.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let header = DataFileHeader::read(&mut reader).map_err(|e| StorageError::CorruptFile {
            file: path.display().to_string(),
            reason: format!("header read failed: {e}"),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            header,
        })
    }

    /// The validated file header.
    pub fn header(&self) -> DataFileHeader {
        self.header
    }

    /// Reads the record starting at `offset` (as returned by
    /// [`DataFileWriter::append`]).
    pub fn read_record_at(&self, offset: u64) -> Result<Vec<u8>, StorageError> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let len = file.read_u32::<BigEndian>().map_err(|e| StorageError::CorruptFile {
            file: self.path.display().to_string(),
            reason: format!("record length read failed at offset {offset}: {e}"),
        })? as usize;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).map_err(|e| StorageError::CorruptFile {
            file: self.path.display().to_string(),
            reason: format!("record body read failed at offset {offset}: {e}"),
        })?;
        Ok(buf)
    }

    /// Iterates every record in the file in append order, yielding
    /// `(offset, bytes)` pairs.
    pub fn iter_records(&self) -> Result<DataFileRecordIter, StorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(HEADER_LEN))?;
        Ok(DataFileRecordIter {
            reader,
            offset: HEADER_LEN,
            path: self.path.clone(),
        })
    }
}

/// Forward-only iterator over a data file's records, used by merge and by
/// any full-file scan.
pub struct DataFileRecordIter {
    reader: BufReader<File>,
    offset: u64,
    path: PathBuf,
}

impl Iterator for DataFileRecordIter {
    type Item = Result<(u64, Vec<u8>), StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.offset;
        let len = match self.reader.read_u32::<BigEndian>() {
            Ok(l) => l as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return None,
            Err(e) => {
                return Some(Err(StorageError::CorruptFile {
                    file: self.path.display().to_string(),
                    reason: format!("record length read failed at offset {start}: {e}"),
                }))
            }
        };
        let mut buf = vec![0u8; len];
        if let Err(e) = self.reader.read_exact(&mut buf) {
            return Some(Err(StorageError::CorruptFile {
                file: self.path.display().to_string(),
                reason: format!("record body read failed at offset {start}: {e}"),
            }));
        }
        self.offset += 4 + len as u64;
        Some(Ok((start, buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn header() -> DataFileHeader {
        DataFileHeader {
            format_version: 1,
            creation_ts: 1_700_000_000_000,
            serializer_class: 42,
            serializer_version: 1,
            min_key: 0,
            max_key: 100,
        }
    }

    #[test]
    fn write_then_read_back_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.df");
        let mut writer = DataFileWriter::create(&path, header()).unwrap();
        let off1 = writer.append(b"hello").unwrap();
        let off2 = writer.append(b"world!").unwrap();
        writer.finish().unwrap();

        let reader = DataFileReader::open(&path).unwrap();
        assert_eq!(reader.header(), header());
        assert_eq!(reader.read_record_at(off1).unwrap(), b"hello");
        assert_eq!(reader.read_record_at(off2).unwrap(), b"world!");

        let all: Vec<_> = reader.iter_records().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].1, b"hello");
        assert_eq!(all[1].1, b"world!");
    }

    #[test]
    fn corrupt_header_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.df");
        std::fs::write(&path, b"short").unwrap();
        assert!(DataFileReader::open(&path).is_err());
    }
}
