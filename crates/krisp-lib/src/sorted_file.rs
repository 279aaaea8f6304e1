//! Sorted k-mer files
//!
//! A sorted k-mer file holds the records of one genome ordered by
//! `(left_flank, right_flank, diag, source)`. It is written once by a sort
//! job and then only read, through a read-only memory map. Readers check
//! the ordering as they go; a record that sorts before its predecessor
//! means the intermediate is corrupt and is reported as a consistency error.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::{
    constants::OUTPUT_WRITE_BUFFER,
    error::{KrispError, Result},
    record::{KmerRecord, Source},
};

/// A finished per-genome sort output
#[derive(Debug, Clone)]
pub struct SortedKmerFile {
    /// Location of the sorted records
    pub path: PathBuf,
    /// Genome the records came from
    pub source: Source,
    /// Number of records in the file
    pub records: u64,
    /// Sequence names of the genome, indexed by `KmerRecord::contig`
    pub contig_names: Vec<String>,
}

/// Buffered line writer for sorted records
pub struct SortedKmerWriter {
    writer: BufWriter<File>,
    written: u64,
}

impl SortedKmerWriter {
    /// Create (or truncate) `path`
    pub fn create(path: impl AsRef<Path>, capacity: usize) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::with_capacity(capacity, file),
            written: 0,
        })
    }

    /// Append one record
    #[inline]
    pub fn push(&mut self, record: &KmerRecord) -> std::io::Result<()> {
        self.written += 1;
        record.write_line(&mut self.writer)
    }

    /// Flush and return the number of records written
    pub fn finish(mut self) -> std::io::Result<u64> {
        self.writer.flush()?;
        Ok(self.written)
    }
}

/// Write already sorted records to `path`
pub fn write_sorted<'a, I>(records: I, path: &Path) -> std::io::Result<u64>
where
    I: IntoIterator<Item = &'a KmerRecord>,
{
    let mut writer = SortedKmerWriter::create(path, OUTPUT_WRITE_BUFFER)?;
    for record in records {
        writer.push(record)?;
    }
    writer.finish()
}

/// Streaming, order-checking reader over a sorted k-mer file
#[derive(Debug)]
pub struct SortedKmerReader {
    path: PathBuf,
    /// `None` for an empty file, which cannot be mapped
    map: Option<Mmap>,
    offset: usize,
    record_no: u64,
    previous: Option<KmerRecord>,
}

impl SortedKmerReader {
    /// Map `path` for reading
    ///
    /// A file that cannot be opened is reported as inconsistent: sorted
    /// files are only read after their sort job succeeded.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::map_file(path).map_err(|e| KrispError::Consistency {
            path: path.to_path_buf(),
            record: 0,
            detail: format!("cannot open: {e}"),
        })
    }

    /// Map `path` for reading, keeping the raw I/O error
    pub fn map_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            // SAFETY: sorted files are private to the run directory and are
            // never modified after their sort job finishes.
            Some(unsafe { Mmap::map(&file) }?)
        };

        Ok(Self {
            path,
            map,
            offset: 0,
            record_no: 0,
            previous: None,
        })
    }

    /// Path of the file being read
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records returned so far
    pub fn records_read(&self) -> u64 {
        self.record_no
    }

    fn inconsistent(&self, detail: String) -> KrispError {
        KrispError::Consistency {
            path: self.path.clone(),
            record: self.record_no,
            detail,
        }
    }

    /// Next record, or `None` at end of file
    pub fn next_record(&mut self) -> Result<Option<KmerRecord>> {
        let Some(map) = self.map.as_ref() else {
            return Ok(None);
        };
        let data = &map[..];
        if self.offset >= data.len() {
            return Ok(None);
        }

        let rest = &data[self.offset..];
        let line_len = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        let line = &rest[..line_len];
        self.offset += line_len + 1;
        self.record_no += 1;

        let record = KmerRecord::parse_line(line).map_err(|e| self.inconsistent(e))?;
        if let Some(previous) = &self.previous {
            if record < *previous {
                return Err(self.inconsistent(format!(
                    "record sorts before its predecessor ({} after {})",
                    record.flank_key(),
                    previous.flank_key()
                )));
            }
        }
        self.previous = Some(record.clone());
        Ok(Some(record))
    }
}

impl Iterator for SortedKmerReader {
    type Item = Result<KmerRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{SourceId, Strand};
    use tempfile::TempDir;

    fn record(left: &str, diag: &str, right: &str) -> KmerRecord {
        KmerRecord::new(left.as_bytes(), diag.as_bytes(), right.as_bytes(), SourceId::ingroup(0), 0, 0, Strand::Forward)
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.kmers");
        let records = vec![record("AAA", "C", "GGG"), record("AAA", "T", "GGG"), record("CCC", "A", "AAA")];

        assert_eq!(write_sorted(&records, &path).unwrap(), 3);

        let reader = SortedKmerReader::open(&path).unwrap();
        let read: Vec<KmerRecord> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(read, records);
    }

    #[test]
    fn test_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.kmers");
        assert_eq!(write_sorted(&Vec::<KmerRecord>::new(), &path).unwrap(), 0);
        let mut reader = SortedKmerReader::open(&path).unwrap();
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_out_of_order_is_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.kmers");
        let records = vec![record("CCC", "A", "AAA"), record("AAA", "C", "GGG")];
        write_sorted(&records, &path).unwrap();

        let mut reader = SortedKmerReader::open(&path).unwrap();
        assert!(reader.next_record().unwrap().is_some());
        match reader.next_record() {
            Err(KrispError::Consistency { record, .. }) => assert_eq!(record, 2),
            other => panic!("expected consistency error, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_line_is_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.kmers");
        std::fs::write(&path, b"not a record\n").unwrap();
        let mut reader = SortedKmerReader::open(&path).unwrap();
        assert!(matches!(reader.next_record(), Err(KrispError::Consistency { .. })));
    }

    #[test]
    fn test_map_file_keeps_io_error() {
        let err = SortedKmerReader::map_file("/nonexistent/x.kmers").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SortedKmerReader::open("/nonexistent/x.kmers"),
            Err(KrispError::Consistency { .. })
        ));
    }
}
