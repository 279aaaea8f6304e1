//! K-mer records and their on-disk framing
//!
//! A [`KmerRecord`] is one canonical amplicon-length window split into
//! left flank, diagnostic middle and right flank. Records sort by
//! `(left_flank, right_flank, diag, source)`; the remaining fields break
//! ties so that the order is total and identical for any sort strategy.
//!
//! ## Line format
//!
//! ```text
//! left \t right \t diag \t source \t group \t contig \t position \t strand \n
//! ```
//!
//! Flanks are fixed width within a run, so byte order on the leading
//! fields equals key order. An empty diagnostic region is an empty field.

use std::cmp::Ordering;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Which side of the comparison a genome belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Group {
    /// Genomes the locus must identify
    Ingroup,
    /// Genomes the locus must not match
    Outgroup,
}

impl Group {
    fn code(self) -> u8 {
        match self {
            Group::Ingroup => b'I',
            Group::Outgroup => b'O',
        }
    }

    fn from_code(code: &[u8]) -> Option<Self> {
        match code {
            b"I" => Some(Group::Ingroup),
            b"O" => Some(Group::Outgroup),
            _ => None,
        }
    }
}

/// Identifies the genome file a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId {
    /// Position of the file in the combined (ingroup then outgroup) list
    pub index: u32,
    /// Group the file was listed in
    pub group: Group,
}

impl SourceId {
    /// Create an ingroup source id
    pub fn ingroup(index: u32) -> Self {
        Self { index, group: Group::Ingroup }
    }

    /// Create an outgroup source id
    pub fn outgroup(index: u32) -> Self {
        Self { index, group: Group::Outgroup }
    }

    /// Whether the source is in the ingroup
    #[inline]
    pub fn is_ingroup(&self) -> bool {
        self.group == Group::Ingroup
    }
}

impl PartialOrd for SourceId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SourceId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index).then(self.group.cmp(&other.group))
    }
}

/// A genome file taking part in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Identifier stored in every record
    pub id: SourceId,
    /// Path to the genome file
    pub path: PathBuf,
    /// Display name: file name without directories or extensions
    pub name: String,
}

impl Source {
    /// Describe a genome file
    pub fn new(id: SourceId, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = simple_name(&path);
        Self { id, path, name }
    }
}

/// File name with directories and every extension removed
///
/// `data/E_coli.K12.fa.gz` becomes `E_coli`.
pub fn simple_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    match file_name.split_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file_name,
    }
}

/// Strand a canonical record was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strand {
    /// The window as it appears in the file
    Forward,
    /// The reverse complement of the window
    Reverse,
}

impl Strand {
    /// Single-character symbol (`+` or `-`)
    pub fn symbol(self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
        }
    }
}

/// Join key of a locus: both conserved flanks
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlankKey {
    /// Left conserved flank
    pub left: Vec<u8>,
    /// Right conserved flank
    pub right: Vec<u8>,
}

impl fmt::Display for FlankKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            String::from_utf8_lossy(&self.left),
            String::from_utf8_lossy(&self.right)
        )
    }
}

/// One canonical window extracted from a genome
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KmerRecord {
    /// Canonical window: left flank, diagnostic middle, right flank
    seq: Box<[u8]>,
    left_len: u32,
    right_len: u32,
    /// Originating genome
    pub source: SourceId,
    /// Ordinal of the sequence within its file
    pub contig: u32,
    /// 0-based start of the window on the forward strand of the contig
    pub position: u64,
    /// Strand the canonical window was taken from
    pub strand: Strand,
}

impl KmerRecord {
    /// Assemble a record from its three regions
    pub fn new(
        left_flank: &[u8],
        diag: &[u8],
        right_flank: &[u8],
        source: SourceId,
        contig: u32,
        position: u64,
        strand: Strand,
    ) -> Self {
        let mut seq = Vec::with_capacity(left_flank.len() + diag.len() + right_flank.len());
        seq.extend_from_slice(left_flank);
        seq.extend_from_slice(diag);
        seq.extend_from_slice(right_flank);
        Self::from_window(seq.into_boxed_slice(), left_flank.len(), right_flank.len(), source, contig, position, strand)
    }

    /// Build from an already canonical window and the flank lengths
    pub fn from_window(
        seq: Box<[u8]>,
        left_len: usize,
        right_len: usize,
        source: SourceId,
        contig: u32,
        position: u64,
        strand: Strand,
    ) -> Self {
        debug_assert!(left_len + right_len <= seq.len());
        Self {
            seq,
            left_len: left_len as u32,
            right_len: right_len as u32,
            source,
            contig,
            position,
            strand,
        }
    }

    /// Left conserved flank
    #[inline]
    pub fn left_flank(&self) -> &[u8] {
        &self.seq[..self.left_len as usize]
    }

    /// Diagnostic middle region
    #[inline]
    pub fn diag(&self) -> &[u8] {
        &self.seq[self.left_len as usize..self.seq.len() - self.right_len as usize]
    }

    /// Right conserved flank
    #[inline]
    pub fn right_flank(&self) -> &[u8] {
        &self.seq[self.seq.len() - self.right_len as usize..]
    }

    /// The full canonical window
    #[inline]
    pub fn window(&self) -> &[u8] {
        &self.seq
    }

    /// The window as it reads on the forward strand of the genome
    pub fn forward_window(&self) -> Vec<u8> {
        match self.strand {
            Strand::Forward => self.seq.to_vec(),
            Strand::Reverse => crate::encoding::reverse_complement(&self.seq),
        }
    }

    /// Borrowed join key
    #[inline]
    pub fn flanks(&self) -> (&[u8], &[u8]) {
        (self.left_flank(), self.right_flank())
    }

    /// Owned join key
    pub fn flank_key(&self) -> FlankKey {
        FlankKey {
            left: self.left_flank().to_vec(),
            right: self.right_flank().to_vec(),
        }
    }

    /// Approximate bytes this record occupies in a sort buffer
    #[inline]
    pub fn footprint(&self) -> usize {
        std::mem::size_of::<Self>() + self.seq.len()
    }

    /// Write the record as one line
    pub fn write_line<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(self.left_flank())?;
        out.write_all(b"\t")?;
        out.write_all(self.right_flank())?;
        out.write_all(b"\t")?;
        out.write_all(self.diag())?;
        writeln!(
            out,
            "\t{}\t{}\t{}\t{}\t{}",
            self.source.index,
            self.source.group.code() as char,
            self.contig,
            self.position,
            self.strand.symbol()
        )
    }

    /// Parse one line (without its trailing newline)
    pub fn parse_line(line: &[u8]) -> Result<Self, String> {
        let mut fields = line.split(|&b| b == b'\t');
        let mut next = |name: &str| fields.next().ok_or_else(|| format!("missing field `{name}`"));

        let left = next("left_flank")?;
        let right = next("right_flank")?;
        let diag = next("diag")?;
        let index = parse_number::<u32>(next("source")?, "source")?;
        let group_code = next("group")?;
        let group = Group::from_code(group_code)
            .ok_or_else(|| format!("invalid group `{}`", String::from_utf8_lossy(group_code)))?;
        let contig = parse_number::<u32>(next("contig")?, "contig")?;
        let position = parse_number::<u64>(next("position")?, "position")?;
        let strand = match next("strand")? {
            b"+" => Strand::Forward,
            b"-" => Strand::Reverse,
            other => return Err(format!("invalid strand `{}`", String::from_utf8_lossy(other))),
        };
        if fields.next().is_some() {
            return Err("too many fields".into());
        }
        if left.is_empty() || right.is_empty() {
            return Err("empty conserved flank".into());
        }

        Ok(Self::new(left, diag, right, SourceId { index, group }, contig, position, strand))
    }
}

fn parse_number<T: std::str::FromStr>(field: &[u8], name: &str) -> Result<T, String> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("invalid {name} `{}`", String::from_utf8_lossy(field)))
}

impl PartialOrd for KmerRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KmerRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.left_flank()
            .cmp(other.left_flank())
            .then_with(|| self.right_flank().cmp(other.right_flank()))
            .then_with(|| self.diag().cmp(other.diag()))
            .then_with(|| self.source.cmp(&other.source))
            .then_with(|| self.contig.cmp(&other.contig))
            .then_with(|| self.position.cmp(&other.position))
            .then_with(|| self.strand.cmp(&other.strand))
    }
}
