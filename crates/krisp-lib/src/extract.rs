//! Canonical k-mer extraction from genome files
//!
//! Scans every sequence of a FASTA/FASTQ file (compressed or not) and
//! yields one [`KmerRecord`] per valid amplicon-length window. Each window
//! is compared with its reverse complement and the lexicographically
//! smaller of the two is kept, so both strands of a locus produce the same
//! record key.
//!
//! Extraction is lazy and single pass: the extractor owns the file handle
//! and a fresh extractor is needed to scan a file again.

use std::io::Read;
use std::path::{Path, PathBuf};

use needletail::{parse_fastx_file, parse_fastx_reader, FastxReader};

use crate::{
    constants::DEFAULT_DISALLOWED,
    encoding::{classify_base, reverse_complement_into, BaseClass, SoftMaskMode},
    error::{KrispError, Result},
    params::AmpliconParams,
    record::{KmerRecord, SourceId, Strand},
};

/// Marker for a position that invalidates every window covering it
const INVALID: u8 = 0;

/// Extraction parameters shared by every file in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorSettings {
    /// Window and flank lengths
    pub params: AmpliconParams,
    /// Soft-mask handling
    pub soft_mask: SoftMaskMode,
    /// Bytes that invalidate a window
    pub disallowed: Vec<u8>,
}

impl ExtractorSettings {
    /// Settings with the default disallowed set
    pub fn new(params: AmpliconParams, soft_mask: SoftMaskMode) -> Self {
        Self {
            params,
            soft_mask,
            disallowed: DEFAULT_DISALLOWED.to_vec(),
        }
    }
}

/// Lazy iterator over the canonical windows of one genome file
pub struct KmerExtractor {
    reader: Box<dyn FastxReader>,
    label: PathBuf,
    source: SourceId,
    settings: ExtractorSettings,
    contig_names: Vec<String>,
    /// Current contig, uppercased, with unusable positions set to `INVALID`
    contig: Vec<u8>,
    /// End (exclusive) of the next window to examine
    cursor: usize,
    /// Index just past the most recent invalid position
    clean_from: usize,
    rc_buf: Vec<u8>,
    emitted: u64,
    finished: bool,
}

impl KmerExtractor {
    /// Open a genome file; compression is detected from the content
    pub fn open(path: impl AsRef<Path>, source: SourceId, settings: ExtractorSettings) -> Result<Self> {
        let path = path.as_ref();
        let reader = parse_fastx_file(path).map_err(|e| KrispError::input(path, e))?;
        Ok(Self::with_reader(reader, path.to_path_buf(), source, settings))
    }

    /// Extract from any byte stream; `label` names it in errors
    pub fn from_reader<R>(reader: R, label: impl Into<PathBuf>, source: SourceId, settings: ExtractorSettings) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let label = label.into();
        let reader = parse_fastx_reader(reader).map_err(|e| KrispError::input(&label, e))?;
        Ok(Self::with_reader(reader, label, source, settings))
    }

    fn with_reader(reader: Box<dyn FastxReader>, label: PathBuf, source: SourceId, settings: ExtractorSettings) -> Self {
        Self {
            reader,
            label,
            source,
            settings,
            contig_names: Vec::new(),
            contig: Vec::new(),
            cursor: 0,
            clean_from: 0,
            rc_buf: Vec::new(),
            emitted: 0,
            finished: false,
        }
    }

    /// Number of records yielded so far
    pub fn records_emitted(&self) -> u64 {
        self.emitted
    }

    /// Names of the sequences read so far, indexed by `KmerRecord::contig`
    pub fn contig_names(&self) -> &[String] {
        &self.contig_names
    }

    /// Consume the extractor, keeping the sequence names
    pub fn into_contig_names(self) -> Vec<String> {
        self.contig_names
    }

    /// Next canonical window of the current contig
    fn next_in_contig(&mut self) -> Option<KmerRecord> {
        let k = self.settings.params.amplicon;

        while self.cursor < self.contig.len() {
            let end = self.cursor;
            self.cursor += 1;

            if self.contig[end] == INVALID {
                self.clean_from = end + 1;
                continue;
            }
            if end + 1 < k {
                continue;
            }
            let start = end + 1 - k;
            if start < self.clean_from {
                continue;
            }

            let window = &self.contig[start..=end];
            reverse_complement_into(window, &mut self.rc_buf);
            let (canonical, strand) = if self.rc_buf.as_slice() < window {
                (self.rc_buf.as_slice(), Strand::Reverse)
            } else {
                (window, Strand::Forward)
            };

            let contig = (self.contig_names.len() - 1) as u32;
            self.emitted += 1;
            return Some(KmerRecord::from_window(
                canonical.into(),
                self.settings.params.conserved_left,
                self.settings.params.conserved_right,
                self.source,
                contig,
                start as u64,
                strand,
            ));
        }
        None
    }
}

impl Iterator for KmerExtractor {
    type Item = Result<KmerRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(record) = self.next_in_contig() {
                return Some(Ok(record));
            }

            match self.reader.next() {
                None => {
                    self.finished = true;
                    self.contig = Vec::new();
                    return None;
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(KrispError::input(&self.label, e)));
                }
                Some(Ok(record)) => {
                    let seq = record.seq();
                    load_contig(&mut self.contig, &mut self.contig_names, &self.settings, record.id(), &seq);
                    self.cursor = 0;
                    self.clean_from = 0;
                }
            }
        }
    }
}

/// Replace `contig` with the classified bytes of `seq` and record its name
fn load_contig(contig: &mut Vec<u8>, names: &mut Vec<String>, settings: &ExtractorSettings, id: &[u8], seq: &[u8]) {
    let name = id.split(|b| b.is_ascii_whitespace()).next().unwrap_or_default();
    names.push(String::from_utf8_lossy(name).into_owned());

    let mode = settings.soft_mask;
    let disallowed = settings.disallowed.as_slice();
    contig.clear();
    contig.extend(seq.iter().map(|&b| match classify_base(b, mode, disallowed) {
        BaseClass::Base(base) => base,
        BaseClass::Invalid => INVALID,
    }));
}
