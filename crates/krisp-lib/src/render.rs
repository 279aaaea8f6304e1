//! Report writing for accepted calls
//!
//! Two formats are produced: human-readable alignment blocks and one TSV
//! row per locus. Either output may be gzip-compressed by giving it a
//! `.gz` name. Positions in reports are 1-based.

use std::fs::File;
use std::io::{self, BufWriter, Stdout, Write};
use std::path::Path;

use flate2::{write::GzEncoder, Compression};

use crate::{
    constants::OUTPUT_WRITE_BUFFER,
    error::{KrispError, Result},
    filter::DiagnosticCall,
    pipeline::{CallSink, SourceCatalog},
    primer::{PrimerDesigner, PrimerPair, PrimerRequest},
    record::KmerRecord,
};

/// Alignment row style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Every base printed
    #[default]
    Full,
    /// Bases matching the first ingroup row printed as `.`
    Dot,
}

/// Renderer settings
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderConfig {
    /// Alignment row style
    pub mode: RenderMode,
}

/// Destination of a report
pub enum OutputStream {
    /// Standard output
    Stdout(BufWriter<Stdout>),
    /// Plain file
    File(BufWriter<File>),
    /// Gzip-compressed file
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputStream {
    /// Flush everything, writing the gzip trailer when compressed
    pub fn finish(self) -> io::Result<()> {
        match self {
            OutputStream::Stdout(mut out) => out.flush(),
            OutputStream::File(mut out) => out.flush(),
            OutputStream::Gzip(out) => out.finish()?.flush(),
        }
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputStream::Stdout(out) => out.write(buf),
            OutputStream::File(out) => out.write(buf),
            OutputStream::Gzip(out) => out.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputStream::Stdout(out) => out.flush(),
            OutputStream::File(out) => out.flush(),
            OutputStream::Gzip(out) => out.flush(),
        }
    }
}

/// Open a report destination; `None` means standard output
pub fn open_output(path: Option<&Path>) -> Result<OutputStream> {
    let Some(path) = path else {
        return Ok(OutputStream::Stdout(BufWriter::new(io::stdout())));
    };
    let file = File::create(path)?;
    let out = BufWriter::with_capacity(OUTPUT_WRITE_BUFFER, file);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(OutputStream::Gzip(GzEncoder::new(out, Compression::default())))
    } else {
        Ok(OutputStream::File(out))
    }
}

fn text(seq: &[u8]) -> String {
    if seq.is_empty() {
        "-".to_string()
    } else {
        String::from_utf8_lossy(seq).into_owned()
    }
}

fn outgroup_text(call: &DiagnosticCall) -> String {
    if call.outgroup_diags.is_empty() {
        return "-".to_string();
    }
    call.outgroup_diags.iter().map(|d| text(d)).collect::<Vec<_>>().join(",")
}

/// `name:contig:position` with the strand symbol appended
fn hit(catalog: &SourceCatalog, record: &KmerRecord) -> String {
    format!(
        "{}:{}:{}{}",
        catalog.name(record.source),
        catalog.contig_name(record.source, record.contig),
        record.position + 1,
        record.strand.symbol()
    )
}

/// Writes alignment blocks
pub struct AlignmentWriter<W: Write> {
    out: W,
    config: RenderConfig,
}

impl<W: Write> AlignmentWriter<W> {
    /// Writer over `out`
    pub fn new(out: W, config: RenderConfig) -> Self {
        Self { out, config }
    }

    /// Write the block of locus number `locus`
    pub fn write_call(
        &mut self,
        locus: u64,
        call: &DiagnosticCall,
        catalog: &SourceCatalog,
        primers: Option<&PrimerPair>,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            ">locus_{} {} ingroup={} outgroup={}",
            locus,
            call.group.key,
            text(call.ingroup_diag.as_deref().unwrap_or_default()),
            outgroup_text(call)
        )?;

        let width = catalog.sources().map(|s| s.name.len()).max().unwrap_or(0);
        let reference = call.group.ingroup().next();

        for source in catalog.sources() {
            let mut present = false;
            for record in call.group.members.iter().filter(|r| r.source == source.id) {
                present = true;
                let shown = match (self.config.mode, reference) {
                    (RenderMode::Dot, Some(reference)) if !std::ptr::eq(record, reference) => {
                        dotted(record, reference.window())
                    }
                    _ => spaced(record.left_flank(), record.diag(), record.right_flank()),
                };
                writeln!(
                    self.out,
                    "{:<width$}  {}  {} {}:{}",
                    source.name,
                    shown,
                    record.strand.symbol(),
                    catalog.contig_name(record.source, record.contig),
                    record.position + 1,
                    width = width
                )?;
            }
            if !present {
                writeln!(self.out, "{:<width$}  absent", source.name, width = width)?;
            }
        }

        if let Some(pair) = primers {
            writeln!(
                self.out,
                "primers  {} (Tm {:.1})  {} (Tm {:.1})  product {}",
                pair.left, pair.left_tm, pair.right, pair.right_tm, pair.product_size
            )?;
        }
        writeln!(self.out)
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

fn spaced(left: &[u8], diag: &[u8], right: &[u8]) -> String {
    let mut row = String::with_capacity(left.len() + diag.len() + right.len() + 2);
    row.push_str(&String::from_utf8_lossy(left));
    row.push(' ');
    row.push_str(&String::from_utf8_lossy(diag));
    row.push(' ');
    row.push_str(&String::from_utf8_lossy(right));
    row
}

fn dotted(record: &KmerRecord, reference: &[u8]) -> String {
    let masked: Vec<u8> = record
        .window()
        .iter()
        .zip(reference)
        .map(|(&b, &r)| if b == r { b'.' } else { b })
        .collect();
    let left = record.left_flank().len();
    let right_start = masked.len() - record.right_flank().len();
    spaced(&masked[..left], &masked[left..right_start], &masked[right_start..])
}

/// Writes one TSV row per locus
pub struct TsvWriter<W: Write> {
    out: W,
    primers: bool,
}

impl<W: Write> TsvWriter<W> {
    /// Writer over `out`; the header is written immediately
    pub fn new(mut out: W, primers: bool) -> io::Result<Self> {
        write!(
            out,
            "locus\tleft\tdiagnostic\tright\toutgroup_diagnostics\tingroup_hits\toutgroup_hits"
        )?;
        if primers {
            write!(out, "\tprimer_left\tprimer_right\tprimer_left_tm\tprimer_right_tm\tproduct_size")?;
        }
        writeln!(out)?;
        Ok(Self { out, primers })
    }

    /// Write the row of locus number `locus`
    pub fn write_call(
        &mut self,
        locus: u64,
        call: &DiagnosticCall,
        catalog: &SourceCatalog,
        primers: Option<&PrimerPair>,
    ) -> io::Result<()> {
        let join = |records: Vec<&KmerRecord>| {
            if records.is_empty() {
                "-".to_string()
            } else {
                records.iter().map(|r| hit(catalog, r)).collect::<Vec<_>>().join(",")
            }
        };
        write!(
            self.out,
            "locus_{}\t{}\t{}\t{}\t{}\t{}\t{}",
            locus,
            text(&call.group.key.left),
            text(call.ingroup_diag.as_deref().unwrap_or_default()),
            text(&call.group.key.right),
            outgroup_text(call),
            join(call.group.ingroup().collect()),
            join(call.group.outgroup().collect())
        )?;
        if self.primers {
            match primers {
                Some(p) => write!(
                    self.out,
                    "\t{}\t{}\t{:.2}\t{:.2}\t{}",
                    p.left, p.right, p.left_tm, p.right_tm, p.product_size
                )?,
                None => write!(self.out, "\t-\t-\t-\t-\t-")?,
            }
        }
        writeln!(self.out)
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Sink writing accepted calls to the configured reports
pub struct Report {
    alignment: Option<AlignmentWriter<OutputStream>>,
    tsv: Option<TsvWriter<OutputStream>>,
    designer: Option<Box<dyn PrimerDesigner>>,
    written: u64,
}

impl Report {
    /// Report over already opened writers
    pub fn new(
        alignment: Option<AlignmentWriter<OutputStream>>,
        tsv: Option<TsvWriter<OutputStream>>,
        designer: Option<Box<dyn PrimerDesigner>>,
    ) -> Self {
        Self {
            alignment,
            tsv,
            designer,
            written: 0,
        }
    }

    /// Calls written so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl CallSink for Report {
    fn accept(&mut self, call: &DiagnosticCall, catalog: &SourceCatalog) -> Result<()> {
        self.written += 1;
        let locus = self.written;
        let primers = match &self.designer {
            Some(designer) => designer.design(&PrimerRequest::from_call(locus, call))?,
            None => None,
        };
        if let Some(out) = &mut self.alignment {
            out.write_call(locus, call, catalog, primers.as_ref())?;
        }
        if let Some(out) = &mut self.tsv {
            out.write_call(locus, call, catalog, primers.as_ref())?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(out) = self.alignment.take() {
            out.into_inner().finish().map_err(KrispError::Output)?;
        }
        if let Some(out) = self.tsv.take() {
            out.into_inner().finish().map_err(KrispError::Output)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::{DiagnosticFilter, IngroupCoverage},
        merge_join::LocusGroup,
        params::AmpliconParams,
        primer::StaticPrimerDesigner,
        record::{Source, SourceId, Strand},
        sorted_file::SortedKmerFile,
    };
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn catalog() -> SourceCatalog {
        let file = |id: SourceId, name: &str| SortedKmerFile {
            path: PathBuf::from(format!("{}.kmers", name)),
            source: Source::new(id, format!("genomes/{}.fa.gz", name)),
            records: 1,
            contig_names: vec!["chr1".to_string()],
        };
        SourceCatalog::new(vec![
            file(SourceId::ingroup(0), "alpha"),
            file(SourceId::ingroup(1), "beta"),
            file(SourceId::outgroup(2), "gamma"),
            file(SourceId::outgroup(3), "delta"),
        ])
    }

    fn call() -> DiagnosticCall {
        let member = |id, diag: &[u8], position| {
            KmerRecord::new(b"ACGTA", diag, b"TTGCA", id, 0, position, Strand::Forward)
        };
        let members = vec![
            member(SourceId::ingroup(0), b"AAAA", 10),
            member(SourceId::ingroup(1), b"AAAA", 20),
            member(SourceId::outgroup(2), b"AGGA", 30),
        ];
        let group = LocusGroup {
            key: members[0].flank_key(),
            members,
        };
        DiagnosticFilter::new(&AmpliconParams::new(5, 4, 5).unwrap(), 2, IngroupCoverage::Present).classify(group)
    }

    fn pair() -> PrimerPair {
        PrimerPair {
            left: "ACGTA".into(),
            right: "TGCAA".into(),
            left_tm: 20.0,
            right_tm: 21.5,
            product_size: 14,
        }
    }

    #[test]
    fn test_alignment_full() {
        let mut writer = AlignmentWriter::new(Vec::new(), RenderConfig::default());
        writer.write_call(1, &call(), &catalog(), None).unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], ">locus_1 ACGTA..TTGCA ingroup=AAAA outgroup=AGGA");
        assert_eq!(lines[1], "alpha  ACGTA AAAA TTGCA  + chr1:11");
        assert_eq!(lines[2], "beta   ACGTA AAAA TTGCA  + chr1:21");
        assert_eq!(lines[3], "gamma  ACGTA AGGA TTGCA  + chr1:31");
        assert_eq!(lines[4], "delta  absent");
        assert_eq!(lines[5], "");
    }

    #[test]
    fn test_alignment_dot() {
        let mut writer = AlignmentWriter::new(Vec::new(), RenderConfig { mode: RenderMode::Dot });
        writer.write_call(1, &call(), &catalog(), Some(&pair())).unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], "alpha  ACGTA AAAA TTGCA  + chr1:11");
        assert_eq!(lines[2], "beta   ..... .... .....  + chr1:21");
        assert_eq!(lines[3], "gamma  ..... .GG. .....  + chr1:31");
        assert_eq!(lines[5], "primers  ACGTA (Tm 20.0)  TGCAA (Tm 21.5)  product 14");
    }

    #[test]
    fn test_tsv_rows() {
        let mut writer = TsvWriter::new(Vec::new(), false).unwrap();
        writer.write_call(3, &call(), &catalog(), None).unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[0],
            "locus\tleft\tdiagnostic\tright\toutgroup_diagnostics\tingroup_hits\toutgroup_hits"
        );
        assert_eq!(
            lines[1],
            "locus_3\tACGTA\tAAAA\tTTGCA\tAGGA\talpha:chr1:11+,beta:chr1:21+\tgamma:chr1:31+"
        );
    }

    #[test]
    fn test_tsv_primer_columns() {
        let mut writer = TsvWriter::new(Vec::new(), true).unwrap();
        writer.write_call(1, &call(), &catalog(), Some(&pair())).unwrap();
        writer.write_call(2, &call(), &catalog(), None).unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].ends_with("\tproduct_size"));
        assert!(lines[1].ends_with("\tACGTA\tTGCAA\t20.00\t21.50\t14"));
        assert!(lines[2].ends_with("\t-\t-\t-\t-\t-"));
    }

    #[test]
    fn test_report_gzip_and_plain() {
        let dir = TempDir::new().unwrap();
        let align_path = dir.path().join("align.txt");
        let tsv_path = dir.path().join("calls.tsv.gz");

        let alignment = AlignmentWriter::new(open_output(Some(align_path.as_path())).unwrap(), RenderConfig::default());
        let tsv = TsvWriter::new(open_output(Some(tsv_path.as_path())).unwrap(), true).unwrap();
        let designer = StaticPrimerDesigner::new().with_pair(b"ACGTAAAAATTGCA".to_vec(), pair());
        let mut report = Report::new(Some(alignment), Some(tsv), Some(Box::new(designer)));

        report.accept(&call(), &catalog()).unwrap();
        report.finish().unwrap();
        assert_eq!(report.written(), 1);

        let plain = std::fs::read_to_string(&align_path).unwrap();
        assert!(plain.starts_with(">locus_1 "));
        assert!(plain.contains("primers  ACGTA"));

        let mut decoded = String::new();
        GzDecoder::new(File::open(&tsv_path).unwrap()).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded.lines().count(), 2);
        assert!(decoded.lines().nth(1).unwrap().ends_with("\t14"));
    }
}
