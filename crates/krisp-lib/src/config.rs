//! Run configuration for the diagnostic k-mer pipeline
//!
//! Gathers the amplicon lengths, the genome files and the resource limits
//! for one run. [`RunConfiguration::validate`] is called before any
//! extraction starts.

use std::path::PathBuf;

use crate::{
    constants::{DEFAULT_DISALLOWED, DEFAULT_SORT_MEMORY_PERCENT},
    encoding::SoftMaskMode,
    error::{KrispError, Result},
    extract::ExtractorSettings,
    filter::IngroupCoverage,
    params::AmpliconParams,
    record::{Source, SourceId},
};

/// Configuration parameters for one pipeline run
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    /// Amplicon, flank and diagnostic lengths
    pub params: AmpliconParams,

    /// Genomes to identify
    pub ingroup: Vec<PathBuf>,

    /// Genomes the diagnostic must not match
    pub outgroup: Vec<PathBuf>,

    /// Total number of cores shared by all jobs
    pub parallel: usize,

    /// Soft-mask handling during extraction
    pub soft_mask: SoftMaskMode,

    /// Bytes that invalidate a window
    pub disallowed: Vec<u8>,

    /// Percent of available memory shared by the concurrent sort jobs
    pub sort_memory_percent: u8,

    /// Parent directory of the temporary run directory (system default when unset)
    pub workdir: Option<PathBuf>,

    /// How many ingroup genomes must carry a locus
    pub ingroup_coverage: IngroupCoverage,

    /// Verbose output
    pub verbose: bool,
}

impl RunConfiguration {
    /// Configuration with default resources for the given lengths and ingroup files
    pub fn new(params: AmpliconParams, ingroup: Vec<PathBuf>) -> Self {
        Self {
            params,
            ingroup,
            outgroup: Vec::new(),
            parallel: 1,
            soft_mask: SoftMaskMode::default(),
            disallowed: DEFAULT_DISALLOWED.to_vec(),
            sort_memory_percent: DEFAULT_SORT_MEMORY_PERCENT,
            workdir: None,
            ingroup_coverage: IngroupCoverage::default(),
            verbose: false,
        }
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;

        if self.ingroup.is_empty() {
            return Err(KrispError::Configuration("at least one ingroup genome is required".into()));
        }
        if self.parallel == 0 {
            return Err(KrispError::Configuration("parallel must be at least 1".into()));
        }
        if self.sort_memory_percent == 0 || self.sort_memory_percent > 100 {
            return Err(KrispError::Configuration(format!(
                "sort memory must be in range [1, 100] percent, got {}",
                self.sort_memory_percent
            )));
        }
        if self.ingroup.len() + self.outgroup.len() > u32::MAX as usize {
            return Err(KrispError::Configuration("too many genome files".into()));
        }
        if let Some(dir) = &self.workdir {
            if !dir.is_dir() {
                return Err(KrispError::Configuration(format!(
                    "work directory {} does not exist",
                    dir.display()
                )));
            }
        }

        Ok(())
    }

    /// Every genome of the run, ingroup first, numbered in that order
    pub fn sources(&self) -> Vec<Source> {
        let ingroup = self.ingroup.iter().enumerate().map(|(i, path)| Source::new(SourceId::ingroup(i as u32), path));
        let offset = self.ingroup.len();
        let outgroup = self
            .outgroup
            .iter()
            .enumerate()
            .map(|(i, path)| Source::new(SourceId::outgroup((offset + i) as u32), path));
        ingroup.chain(outgroup).collect()
    }

    /// Extraction settings shared by every job
    pub fn extractor_settings(&self) -> ExtractorSettings {
        ExtractorSettings {
            params: self.params,
            soft_mask: self.soft_mask,
            disallowed: self.disallowed.clone(),
        }
    }

    /// Log configuration parameters via tracing
    pub fn print(&self) {
        tracing::info!("Run Configuration:");
        tracing::info!("  amplicon = {}", self.params.amplicon);
        tracing::info!("  conserved_left = {}", self.params.conserved_left);
        tracing::info!("  diagnostic = {}", self.params.diagnostic);
        tracing::info!("  conserved_right = {}", self.params.conserved_right);
        for (i, path) in self.ingroup.iter().enumerate() {
            tracing::info!("  ingroup ({}) {}", i, path.display());
        }
        for (i, path) in self.outgroup.iter().enumerate() {
            tracing::info!("  outgroup ({}) {}", i, path.display());
        }
        tracing::info!("  parallel = {}", self.parallel);
        tracing::debug!("  soft_mask = {:?}", self.soft_mask);
        tracing::debug!("  disallowed = {:?}", String::from_utf8_lossy(&self.disallowed));
        tracing::debug!("  sort_memory_percent = {}", self.sort_memory_percent);
        tracing::debug!("  ingroup_coverage = {:?}", self.ingroup_coverage);
        match &self.workdir {
            Some(dir) => tracing::debug!("  workdir = {:?}", dir),
            None => tracing::debug!("  workdir = system temporary directory"),
        }
    }
}
