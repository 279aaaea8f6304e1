//! Error taxonomy for the diagnostic k-mer pipeline
//!
//! Every failure is fatal for the job (or run) that hit it; nothing is
//! retried. Variants carry the file and stage needed to diagnose the cause.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, KrispError>;

/// Errors raised by the pipeline
#[derive(Error, Debug)]
pub enum KrispError {
    /// A genome file could not be opened or parsed
    #[error("failed to read genome file {}: {message}", path.display())]
    Input {
        /// Genome file being extracted
        path: PathBuf,
        /// Parser or I/O message
        message: String,
    },

    /// Temporary storage failed while sorting the k-mers of one file
    #[error("temporary storage failure while sorting k-mers of {}: {source}", path.display())]
    Resource {
        /// Genome file whose sort job failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A sorted k-mer file is corrupt or out of order
    #[error("sorted k-mer file {} is inconsistent at record {record}: {detail}", path.display())]
    Consistency {
        /// Sorted k-mer file being read
        path: PathBuf,
        /// 1-based record ordinal
        record: u64,
        /// What was wrong
        detail: String,
    },

    /// Amplicon lengths or run settings are unusable
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Writing a report failed
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    /// The primer-design capability failed
    #[error("primer design failed: {0}")]
    Primer(String),

    /// A worker thread panicked
    #[error("worker thread failed: {0}")]
    Worker(String),
}

impl KrispError {
    /// Build an input error for `path`
    pub fn input(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Input {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Build a resource error for `path`
    pub fn resource(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Resource {
            path: path.into(),
            source,
        }
    }

    /// Short name of the pipeline stage the error belongs to
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Input { .. } => "extraction",
            Self::Resource { .. } => "sorting",
            Self::Consistency { .. } => "merge-join",
            Self::Configuration(_) => "configuration",
            Self::Output(_) => "output",
            Self::Primer(_) => "primer design",
            Self::Worker(_) => "scheduling",
        }
    }
}
