//! Amplicon length algebra
//!
//! An amplicon is `conserved_left + diagnostic + conserved_right` bases
//! long. The core needs one complete, consistent triple; [`ParamRequest`]
//! derives it from whatever subset of lengths the user supplied.

use crate::error::{KrispError, Result};

/// Complete set of amplicon lengths for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmpliconParams {
    /// Total window length (the k of the extracted k-mers)
    pub amplicon: usize,
    /// Length of the conserved left flank
    pub conserved_left: usize,
    /// Length of the conserved right flank
    pub conserved_right: usize,
    /// Length of the diagnostic middle region (may be zero)
    pub diagnostic: usize,
}

impl AmpliconParams {
    /// Build from flank and diagnostic lengths
    pub fn new(conserved_left: usize, diagnostic: usize, conserved_right: usize) -> Result<Self> {
        let amplicon = total_length(conserved_left, diagnostic, conserved_right)?;
        let params = Self {
            amplicon,
            conserved_left,
            conserved_right,
            diagnostic,
        };
        params.validate()?;
        Ok(params)
    }

    /// Check that the lengths are positive and add up
    pub fn validate(&self) -> Result<()> {
        if self.amplicon == 0 {
            return Err(KrispError::Configuration("amplicon length must be positive".into()));
        }
        if self.conserved_left == 0 || self.conserved_right == 0 {
            return Err(KrispError::Configuration(format!(
                "conserved regions must be positive, got left={} right={}",
                self.conserved_left, self.conserved_right
            )));
        }
        if total_length(self.conserved_left, self.diagnostic, self.conserved_right)? != self.amplicon {
            return Err(KrispError::Configuration(format!(
                "conserved left ({}) + diagnostic ({}) + conserved right ({}) != amplicon ({})",
                self.conserved_left, self.diagnostic, self.conserved_right, self.amplicon
            )));
        }
        if self.amplicon > u32::MAX as usize {
            return Err(KrispError::Configuration(format!(
                "amplicon length {} is too large",
                self.amplicon
            )));
        }
        Ok(())
    }

    /// Whether there is a diagnostic region to discriminate on
    pub fn has_diagnostic_region(&self) -> bool {
        self.amplicon > self.conserved_left.saturating_add(self.conserved_right)
    }

    /// Start offset of the right flank within the window
    pub fn right_start(&self) -> usize {
        self.amplicon - self.conserved_right
    }
}

/// `left + diagnostic + right`, or a configuration error if it overflows
fn total_length(left: usize, diagnostic: usize, right: usize) -> Result<usize> {
    left.checked_add(diagnostic)
        .and_then(|sum| sum.checked_add(right))
        .ok_or_else(|| {
            KrispError::Configuration(format!(
                "amplicon length {left} + {diagnostic} + {right} does not fit in memory"
            ))
        })
}

/// Partially specified amplicon lengths, as given on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParamRequest {
    /// Total amplicon length
    pub amplicon: Option<usize>,
    /// Diagnostic region length
    pub diagnostic: Option<usize>,
    /// Conserved length applied to both flanks
    pub conserved: Option<usize>,
    /// Left flank length (overrides `conserved`)
    pub conserved_left: Option<usize>,
    /// Right flank length (overrides `conserved`)
    pub conserved_right: Option<usize>,
}

impl ParamRequest {
    fn flanks(&self) -> Option<(usize, usize)> {
        match (self.conserved_left, self.conserved_right, self.conserved) {
            (Some(l), Some(r), _) => Some((l, r)),
            (Some(l), None, Some(c)) => Some((l, c)),
            (None, Some(r), Some(c)) => Some((c, r)),
            (None, None, Some(c)) => Some((c, c)),
            _ => None,
        }
    }

    /// Derive a complete, validated parameter set
    pub fn derive(&self) -> Result<AmpliconParams> {
        let (amplicon, left, right) = match (self.amplicon, self.diagnostic, self.flanks()) {
            // Amplicon and diagnostic lengths fix the flanks
            (Some(a), Some(d), flanks) => {
                let c = a.checked_sub(d).ok_or_else(|| {
                    KrispError::Configuration(format!("diagnostic length {d} exceeds amplicon length {a}"))
                })? / 2;
                if let Some((l, r)) = flanks.filter(|&lr| lr != (c, c)) {
                    tracing::warn!(
                        "Conserved lengths {}/{} ignored; amplicon and diagnostic lengths give {}",
                        l,
                        r,
                        c
                    );
                }
                (a, c, c)
            }
            (Some(a), None, Some((l, r))) => (a, l, r),
            (None, Some(d), Some((l, r))) => (total_length(l, d, r)?, l, r),
            _ => {
                return Err(KrispError::Configuration(
                    "could not deduce amplicon parameters; give two of amplicon, diagnostic and conserved lengths".into(),
                ))
            }
        };

        let diagnostic = left
            .checked_add(right)
            .and_then(|flanks| amplicon.checked_sub(flanks))
            .ok_or_else(|| {
                KrispError::Configuration(format!(
                    "conserved regions ({left} + {right}) exceed amplicon length {amplicon}"
                ))
            })?;

        let params = AmpliconParams {
            amplicon,
            conserved_left: left,
            conserved_right: right,
            diagnostic,
        };
        params.validate()?;

        if let Some(d) = self.diagnostic {
            if d != diagnostic {
                tracing::warn!(
                    "Diagnostic length adjusted from {} to {} to fill the amplicon",
                    d,
                    diagnostic
                );
            }
        }
        Ok(params)
    }
}
