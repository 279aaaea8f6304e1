//! End-to-end diagnostic k-mer pipeline
//!
//! Files are extracted and sorted in parallel under the scheduler, the
//! sorted files are merge-joined on their flanks and each locus group is
//! classified by the diagnostic filter. Accepted calls are streamed to a
//! [`CallSink`] in ascending key order; no stage materializes the whole
//! genome. Intermediate files live in a temporary run directory that is
//! removed when the run ends.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
    config::RunConfiguration,
    error::{KrispError, Result},
    external_sort::{ExternalSorter, SortSettings, Sorter},
    extract::{ExtractorSettings, KmerExtractor},
    filter::{DiagnosticCall, DiagnosticFilter},
    merge_join::LocusMerger,
    record::{Source, SourceId},
    scheduler::{JobScheduler, ScheduledJob},
    sorted_file::SortedKmerFile,
};

/// Sorted k-mer files of a run, indexed by source
///
/// Used by sinks to name genomes and contigs.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    files: Vec<SortedKmerFile>,
}

impl SourceCatalog {
    /// Catalog over files listed in source order
    pub fn new(files: Vec<SortedKmerFile>) -> Self {
        Self { files }
    }

    /// Every sorted file, ingroup first
    pub fn files(&self) -> &[SortedKmerFile] {
        &self.files
    }

    /// Sources in order
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.files.iter().map(|f| &f.source)
    }

    /// Genome description for an id
    pub fn source(&self, id: SourceId) -> Option<&Source> {
        self.files.get(id.index as usize).map(|f| &f.source)
    }

    /// Short genome name, or the numeric index when unknown
    pub fn name(&self, id: SourceId) -> String {
        match self.source(id) {
            Some(source) => source.name.clone(),
            None => id.index.to_string(),
        }
    }

    /// Sequence name of a contig, or its ordinal when unknown
    pub fn contig_name(&self, id: SourceId, contig: u32) -> String {
        self.files
            .get(id.index as usize)
            .and_then(|f| f.contig_names.get(contig as usize))
            .cloned()
            .unwrap_or_else(|| format!("#{}", contig))
    }

    /// Number of ingroup genomes
    pub fn ingroup_count(&self) -> usize {
        self.files.iter().filter(|f| f.source.id.is_ingroup()).count()
    }
}

/// Receiver of accepted calls
pub trait CallSink {
    /// Handle one accepted call; calls arrive in ascending flank order
    fn accept(&mut self, call: &DiagnosticCall, catalog: &SourceCatalog) -> Result<()>;

    /// Called once after the last call
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink that keeps every accepted call in memory
#[derive(Debug, Default)]
pub struct CollectCalls {
    /// Calls received so far
    pub calls: Vec<DiagnosticCall>,
}

impl CallSink for CollectCalls {
    fn accept(&mut self, call: &DiagnosticCall, _catalog: &SourceCatalog) -> Result<()> {
        self.calls.push(call.clone());
        Ok(())
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Records extracted per source, in source order
    pub records: Vec<(Source, u64)>,
    /// Distinct flank keys examined by the filter
    pub loci_examined: u64,
    /// Calls handed to the sink
    pub accepted: u64,
    /// Wall-clock time of the whole run
    pub elapsed: Duration,
}

/// The extraction, sort, merge-join and filter stages of one run
#[derive(Debug)]
pub struct DiagnosticPipeline<S: Sorter = ExternalSorter> {
    config: RunConfiguration,
    sorter: S,
}

impl DiagnosticPipeline<ExternalSorter> {
    /// Pipeline backed by the external sorter
    pub fn new(config: RunConfiguration) -> Self {
        Self::with_sorter(config, ExternalSorter)
    }
}

impl<S: Sorter> DiagnosticPipeline<S> {
    /// Pipeline using a caller-supplied sorter
    pub fn with_sorter(config: RunConfiguration, sorter: S) -> Self {
        Self { config, sorter }
    }

    /// Run configuration
    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    /// Run every stage, streaming accepted calls to `sink`
    pub fn run<K: CallSink>(&self, sink: &mut K) -> Result<RunSummary> {
        let start = Instant::now();
        self.config.validate()?;
        if self.config.verbose {
            self.config.print();
        }

        let parent = self.config.workdir.clone().unwrap_or_else(std::env::temp_dir);
        let run_dir = tempfile::Builder::new()
            .prefix("krisp-")
            .tempdir_in(&parent)
            .map_err(|e| KrispError::resource(&parent, e))?;
        debug!("Working in {:?}", run_dir.path());

        let settings = self.config.extractor_settings();
        let scheduler = JobScheduler::new(self.config.parallel, self.config.sort_memory_percent);
        let files = scheduler.run(self.config.sources(), |job| {
            self.extract_and_sort(job, run_dir.path(), &settings)
        })?;
        let catalog = SourceCatalog::new(files);

        info!("Merging {} sorted k-mer files", catalog.files().len());
        let paths: Vec<PathBuf> = catalog.files().iter().map(|f| f.path.clone()).collect();
        let merger = LocusMerger::open(&paths)?;
        let filter = DiagnosticFilter::new(
            &self.config.params,
            catalog.ingroup_count(),
            self.config.ingroup_coverage,
        );
        if filter.is_passthrough() {
            info!("No diagnostic region, every shared locus is reported");
        }

        let mut loci_examined = 0u64;
        let mut accepted = 0u64;
        for group in merger {
            let call = filter.classify(group?);
            loci_examined += 1;
            if call.is_accepted() {
                accepted += 1;
                sink.accept(&call, &catalog)?;
            }
        }
        sink.finish()?;

        let elapsed = start.elapsed();
        info!(
            "Examined {} loci, accepted {} in {:.2?}",
            loci_examined, accepted, elapsed
        );

        Ok(RunSummary {
            records: catalog.files().iter().map(|f| (f.source.clone(), f.records)).collect(),
            loci_examined,
            accepted,
            elapsed,
        })
    }

    /// Extract the windows of one genome and sort them into the run directory
    fn extract_and_sort(
        &self,
        job: &ScheduledJob<Source>,
        run_dir: &Path,
        settings: &ExtractorSettings,
    ) -> Result<SortedKmerFile> {
        let source = &job.payload;
        let start = Instant::now();
        info!("Extracting K-mers from {}", source.path.display());

        let output = run_dir.join(format!(
            "{}.{}.{}mers",
            job.index, source.name, settings.params.amplicon
        ));
        let sort_settings = SortSettings {
            workers: job.cores,
            memory: job.memory,
            tmp_dir: run_dir.to_path_buf(),
            label: source.path.clone(),
        };

        let mut extractor = KmerExtractor::open(&source.path, source.id, settings.clone())?;
        let records = self.sorter.sort(&mut extractor, &sort_settings, &output)?;
        let contig_names = extractor.into_contig_names();

        if records == 0 {
            warn!("No valid {}-mers in {}", settings.params.amplicon, source.path.display());
        }
        info!(
            "Extracted and sorted {} K-mers from {} in {:.2?}",
            records,
            source.path.display(),
            start.elapsed()
        );

        Ok(SortedKmerFile {
            path: output,
            source: source.clone(),
            records,
            contig_names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        external_sort::InMemorySorter,
        filter::{IngroupCoverage, Verdict},
        params::AmpliconParams,
    };
    use std::fs;
    use tempfile::TempDir;

    // 10bp flanks around a 4bp middle
    const LEFT: &str = "ACCGTTAGCA";
    const RIGHT: &str = "TGGACCATTG";

    fn genome(dir: &Path, name: &str, middle: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!(">chr1 test\n{}{}{}\n", LEFT, middle, RIGHT)).unwrap();
        path
    }

    fn config(dir: &TempDir, ingroup: Vec<PathBuf>, outgroup: Vec<PathBuf>) -> RunConfiguration {
        RunConfiguration {
            outgroup,
            parallel: 2,
            workdir: Some(dir.path().to_path_buf()),
            ..RunConfiguration::new(AmpliconParams::new(10, 4, 10).unwrap(), ingroup)
        }
    }

    #[test]
    fn test_single_locus_accepted() {
        let dir = TempDir::new().unwrap();
        let a = genome(dir.path(), "a.fa", "AAAA");
        let b = genome(dir.path(), "b.fa", "AAAA");
        let c = genome(dir.path(), "c.fa", "GGGG");

        let pipeline = DiagnosticPipeline::with_sorter(config(&dir, vec![a, b], vec![c]), InMemorySorter);
        let mut sink = CollectCalls::default();
        let summary = pipeline.run(&mut sink).unwrap();

        assert_eq!(summary.accepted, 1);
        assert_eq!(sink.calls.len(), 1);
        let call = &sink.calls[0];
        assert_eq!(call.verdict, Verdict::Accepted);
        assert_eq!(call.group.members.len(), 3);
        assert_eq!(summary.records.len(), 3);
        assert!(summary.records.iter().all(|(_, n)| *n == 1));
    }

    #[test]
    fn test_run_directory_removed() {
        let dir = TempDir::new().unwrap();
        let a = genome(dir.path(), "a.fa", "AAAA");
        let pipeline = DiagnosticPipeline::new(config(&dir, vec![a], Vec::new()));
        pipeline.run(&mut CollectCalls::default()).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("krisp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_missing_genome_is_input_error() {
        let dir = TempDir::new().unwrap();
        let a = genome(dir.path(), "a.fa", "AAAA");
        let missing = dir.path().join("missing.fa");
        let pipeline = DiagnosticPipeline::new(config(&dir, vec![a, missing], Vec::new()));
        let err = pipeline.run(&mut CollectCalls::default()).unwrap_err();
        assert!(matches!(err, KrispError::Input { .. }));
    }

    #[test]
    fn test_invalid_configuration_rejected_before_extraction() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir, vec![dir.path().join("never-read.fa")], Vec::new());
        config.parallel = 0;
        let err = DiagnosticPipeline::new(config).run(&mut CollectCalls::default()).unwrap_err();
        assert!(matches!(err, KrispError::Configuration(_)));
    }

    #[test]
    fn test_coverage_all_requires_every_ingroup() {
        let dir = TempDir::new().unwrap();
        let a = genome(dir.path(), "a.fa", "AAAA");
        let b = dir.path().join("b.fa");
        fs::write(&b, ">other\nTTTTTTTTTTTTTTTTTTTTTTTT\n").unwrap();

        let mut config = config(&dir, vec![a, b], Vec::new());
        let mut present = CollectCalls::default();
        DiagnosticPipeline::new(config.clone()).run(&mut present).unwrap();
        assert!(present.calls.iter().any(|c| c.group.key.left == LEFT.as_bytes()));

        config.ingroup_coverage = IngroupCoverage::All;
        let mut all = CollectCalls::default();
        DiagnosticPipeline::new(config).run(&mut all).unwrap();
        assert!(all.calls.iter().all(|c| c.group.key.left != LEFT.as_bytes()));
    }

    #[test]
    fn test_catalog_names() {
        let dir = TempDir::new().unwrap();
        let a = genome(dir.path(), "strain_a.fasta", "AAAA");
        let pipeline = DiagnosticPipeline::new(config(&dir, vec![a], Vec::new()));
        struct Names(Vec<(String, String)>);
        impl CallSink for Names {
            fn accept(&mut self, call: &DiagnosticCall, catalog: &SourceCatalog) -> Result<()> {
                for member in &call.group.members {
                    self.0.push((catalog.name(member.source), catalog.contig_name(member.source, member.contig)));
                }
                Ok(())
            }
        }
        let mut names = Names(Vec::new());
        pipeline.run(&mut names).unwrap();
        assert_eq!(names.0, vec![("strain_a".to_string(), "chr1".to_string())]);
    }
}
