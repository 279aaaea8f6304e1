//! External sorting of extracted k-mer records
//!
//! RAM-bounded sort with temp file spillover:
//!
//! 1. Records accumulate in a buffer charged for its whole allocation
//! 2. When the charge reaches half the memory ceiling → parallel sort +
//!    flush to a temporary segment
//! 3. After the input is exhausted → heap-based k-way merge of the segments
//!    into the final sorted k-mer file
//!
//! If nothing was spilled the buffer is sorted and written directly.
//!
//! The sort order is total (see [`KmerRecord`]'s `Ord`), so the output is
//! byte-identical whatever the worker count or memory ceiling; those only
//! change how long the sort takes.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use sysinfo::System;
use tempfile::TempPath;
use tracing::{debug, info};

use crate::{
    constants::{MERGE_PROGRESS_INTERVAL, MIN_SORT_BUFFER_BYTES, OUTPUT_WRITE_BUFFER, SEGMENT_WRITE_BUFFER},
    error::{KrispError, Result},
    record::KmerRecord,
    sorted_file::{write_sorted, SortedKmerReader, SortedKmerWriter},
};

/// Memory ceiling for one sort job's buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLimit {
    /// Percentage of the memory currently available on the machine
    Percent(u8),
    /// Exact number of bytes
    Bytes(u64),
}

impl MemoryLimit {
    /// Resolve the ceiling to bytes
    pub fn resolve(&self) -> u64 {
        match *self {
            MemoryLimit::Bytes(bytes) => bytes.max(1),
            MemoryLimit::Percent(percent) => {
                let mut sys = System::new();
                sys.refresh_memory();
                let available = match sys.available_memory() {
                    0 => sys.total_memory(),
                    bytes => bytes,
                };
                (available / 100 * u64::from(percent.min(100))).max(MIN_SORT_BUFFER_BYTES)
            }
        }
    }
}

/// Per-job sort parameters
#[derive(Debug, Clone)]
pub struct SortSettings {
    /// Threads used for in-memory sorting
    pub workers: usize,
    /// Buffer ceiling before spilling
    pub memory: MemoryLimit,
    /// Directory for spilled segments
    pub tmp_dir: PathBuf,
    /// Genome file being sorted, used in errors and logs
    pub label: PathBuf,
}

/// Capability that turns a record stream into a sorted k-mer file
pub trait Sorter: Send + Sync {
    /// Sort `records` into `output`, returning the number of records written
    fn sort<I>(&self, records: I, settings: &SortSettings, output: &Path) -> Result<u64>
    where
        I: Iterator<Item = Result<KmerRecord>>;
}

/// Production sorter: bounded buffer, spill segments, k-way merge
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalSorter;

impl Sorter for ExternalSorter {
    fn sort<I>(&self, records: I, settings: &SortSettings, output: &Path) -> Result<u64>
    where
        I: Iterator<Item = Result<KmerRecord>>,
    {
        let limit = settings.memory.resolve();
        let mut run = SortRun::new(settings)?;
        let mut buffer = SortBuffer::new(limit);
        debug!(
            "Sorting {:?}: {} workers, {} byte ceiling, {} byte buffer budget",
            settings.label, settings.workers, limit, buffer.budget
        );

        for record in records {
            let record = record?;
            if !buffer.reserve_one() {
                run.spill(&mut buffer)?;
            }
            buffer.push(record);

            if buffer.is_full() {
                run.spill(&mut buffer)?;
            }
        }

        if run.segments.is_empty() {
            run.sort_buffer(&mut buffer.records);
            return write_sorted(&buffer.records, output).map_err(|e| KrispError::resource(&settings.label, e));
        }

        if !buffer.records.is_empty() {
            run.spill(&mut buffer)?;
        }
        drop(buffer);
        run.merge_into(output)
    }
}

/// In-memory size of one buffered record, excluding its sequence bytes
const RECORD_BYTES: u64 = std::mem::size_of::<KmerRecord>() as u64;

/// Capacity of the first allocation of a sort buffer
const INITIAL_BUFFER_RECORDS: u64 = 1024;

/// Record buffer charged for its whole allocation
///
/// The charge is `capacity * RECORD_BYTES` plus the sequence bytes of the
/// buffered records. The budget is half the memory ceiling. Record slots
/// take at most half the budget and the rest is left to sequence bytes.
/// While growing, the old and the new block together stay within the
/// budget.
struct SortBuffer {
    records: Vec<KmerRecord>,
    seq_bytes: u64,
    budget: u64,
    peak: u64,
}

impl SortBuffer {
    fn new(limit: u64) -> Self {
        Self {
            records: Vec::new(),
            seq_bytes: 0,
            budget: limit / 2,
            peak: 0,
        }
    }

    /// Bytes held by the buffer right now
    fn charged(&self) -> u64 {
        self.records.capacity() as u64 * RECORD_BYTES + self.seq_bytes
    }

    fn is_full(&self) -> bool {
        self.charged() >= self.budget
    }

    /// Ensure there is capacity for one more record
    ///
    /// Returns `false` when the buffer holds records and cannot grow within
    /// the budget; it must be spilled first.
    fn reserve_one(&mut self) -> bool {
        let len = self.records.len();
        let capacity = self.records.capacity();
        if len < capacity {
            return true;
        }

        // While reallocating, the old block is still live
        let room = self.budget.saturating_sub(self.charged()) / RECORD_BYTES;
        let grown = (capacity as u64 * 2)
            .max(INITIAL_BUFFER_RECORDS)
            .min(room)
            .min(self.budget / 2 / RECORD_BYTES);
        if grown > capacity as u64 {
            self.records.reserve_exact(grown as usize - len);
        } else if len == 0 {
            self.records.reserve_exact(1);
        } else {
            return false;
        }

        let during_growth = (capacity + self.records.capacity()) as u64 * RECORD_BYTES + self.seq_bytes;
        self.peak = self.peak.max(during_growth);
        true
    }

    fn push(&mut self, record: KmerRecord) {
        self.seq_bytes += record.window().len() as u64;
        self.records.push(record);
        self.peak = self.peak.max(self.charged());
    }

    /// Empty the buffer, keeping its allocation
    fn clear(&mut self) {
        self.records.clear();
        self.seq_bytes = 0;
    }
}

/// State of one external sort: its thread pool and spilled segments
struct SortRun<'a> {
    settings: &'a SortSettings,
    pool: rayon::ThreadPool,
    /// Deleted from disk when dropped
    segments: Vec<TempPath>,
}

impl<'a> SortRun<'a> {
    fn new(settings: &'a SortSettings) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.workers.max(1))
            .build()
            .map_err(|e| KrispError::resource(&settings.label, std::io::Error::other(e)))?;
        Ok(Self {
            settings,
            pool,
            segments: Vec::new(),
        })
    }

    fn resource(&self, e: std::io::Error) -> KrispError {
        KrispError::resource(&self.settings.label, e)
    }

    fn sort_buffer(&self, buffer: &mut [KmerRecord]) {
        self.pool.install(|| buffer.par_sort_unstable());
    }

    /// Sort the buffer and flush it to a new segment
    fn spill(&mut self, buffer: &mut SortBuffer) -> Result<()> {
        self.sort_buffer(&mut buffer.records);

        let segment = tempfile::Builder::new()
            .prefix("krisp-segment-")
            .suffix(".kmers")
            .tempfile_in(&self.settings.tmp_dir)
            .map_err(|e| self.resource(e))?;
        let path = segment.into_temp_path();

        debug!("Flushing {} records to {:?}", buffer.records.len(), path);

        let mut writer = SortedKmerWriter::create(&path, SEGMENT_WRITE_BUFFER).map_err(|e| self.resource(e))?;
        for record in buffer.records.iter() {
            writer.push(record).map_err(|e| self.resource(e))?;
        }
        writer.finish().map_err(|e| self.resource(e))?;

        buffer.clear();
        self.segments.push(path);
        Ok(())
    }

    /// Merge every segment into `output`
    fn merge_into(self, output: &Path) -> Result<u64> {
        info!("Merging {} sorted segments of {:?}", self.segments.len(), self.settings.label);

        let mut readers = self
            .segments
            .iter()
            .map(|segment| SortedKmerReader::map_file(segment).map_err(|e| self.resource(e)))
            .collect::<Result<Vec<_>>>()?;

        let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::with_capacity(readers.len());
        for (segment, reader) in readers.iter_mut().enumerate() {
            if let Some(record) = reader.next_record()? {
                heap.push(Reverse(HeapEntry { record, segment }));
            }
        }

        let file = std::fs::File::create(output).map_err(|e| self.resource(e))?;
        let mut writer = BufWriter::with_capacity(OUTPUT_WRITE_BUFFER, file);
        let mut merged = 0u64;

        while let Some(Reverse(entry)) = heap.pop() {
            entry.record.write_line(&mut writer).map_err(|e| self.resource(e))?;
            merged += 1;
            if merged % MERGE_PROGRESS_INTERVAL == 0 {
                info!("Merged {} records...", merged);
            }

            if let Some(record) = readers[entry.segment].next_record()? {
                heap.push(Reverse(HeapEntry {
                    record,
                    segment: entry.segment,
                }));
            }
        }
        writer.flush().map_err(|e| self.resource(e))?;

        debug!("Merge complete: {} records", merged);
        Ok(merged)
    }
}

/// Head record of one segment during the k-way merge
#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    record: KmerRecord,
    segment: usize,
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.record
            .cmp(&other.record)
            .then(self.segment.cmp(&other.segment))
    }
}

/// Test double: sorts everything in memory, never spills
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemorySorter;

impl Sorter for InMemorySorter {
    fn sort<I>(&self, records: I, settings: &SortSettings, output: &Path) -> Result<u64>
    where
        I: Iterator<Item = Result<KmerRecord>>,
    {
        let mut buffer = records.collect::<Result<Vec<_>>>()?;
        buffer.sort_unstable();
        write_sorted(&buffer, output).map_err(|e| KrispError::resource(&settings.label, e))
    }
}
