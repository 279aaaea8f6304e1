// krisp: diagnostic amplicon discovery
//
// Finds short loci whose conserved flanks are shared across genome
// assemblies and whose middle separates an ingroup from an outgroup.

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod config;
pub mod constants;
pub mod encoding;
pub mod error;
pub mod external_sort;
pub mod extract;
pub mod filter;
pub mod merge_join;
pub mod params;
pub mod pipeline;
pub mod primer;
pub mod record;
pub mod render;
pub mod scheduler;
pub mod sorted_file;

// Re-export common types at crate root
pub use config::RunConfiguration;
pub use encoding::SoftMaskMode;
pub use error::{KrispError, Result};
pub use external_sort::{ExternalSorter, InMemorySorter, MemoryLimit, SortSettings, Sorter};
pub use extract::{ExtractorSettings, KmerExtractor};
pub use filter::{DiagnosticCall, DiagnosticFilter, IngroupCoverage, RejectReason, Verdict};
pub use merge_join::{LocusGroup, LocusMerger};
pub use params::{AmpliconParams, ParamRequest};
pub use pipeline::{CallSink, CollectCalls, DiagnosticPipeline, RunSummary, SourceCatalog};
pub use primer::{Primer3Designer, PrimerDesigner, PrimerPair, PrimerRequest, StaticPrimerDesigner};
pub use record::{FlankKey, Group, KmerRecord, Source, SourceId, Strand};
pub use render::{open_output, AlignmentWriter, OutputStream, RenderConfig, RenderMode, Report, TsvWriter};
pub use scheduler::{allocate, JobAllocation, JobScheduler};

