//! Primer design for accepted loci
//!
//! [`Primer3Designer`] pipes one Boulder-IO record per locus to
//! `primer3_core`, restricting the left primer to the conserved left flank
//! and the right primer to the conserved right flank. Tests use
//! [`StaticPrimerDesigner`] and [`parse_boulder`] directly.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use ahash::AHashMap;
use tracing::debug;

use crate::{
    constants::PRIMER3_EXECUTABLE,
    error::{KrispError, Result},
    filter::DiagnosticCall,
};

/// One locus to design primers for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimerRequest {
    /// Identifier echoed back by primer3
    pub id: String,
    /// Left flank, diagnostic and right flank
    pub template: Vec<u8>,
    /// Length of the left flank
    pub left_len: usize,
    /// Length of the right flank
    pub right_len: usize,
}

impl PrimerRequest {
    /// Request for an accepted call, using the ingroup middle as template
    pub fn from_call(locus: u64, call: &DiagnosticCall) -> Self {
        let key = &call.group.key;
        let diag = call.ingroup_diag.as_deref().unwrap_or_default();
        let mut template = Vec::with_capacity(key.left.len() + diag.len() + key.right.len());
        template.extend_from_slice(&key.left);
        template.extend_from_slice(diag);
        template.extend_from_slice(&key.right);
        Self {
            id: format!("locus_{}", locus),
            template,
            left_len: key.left.len(),
            right_len: key.right.len(),
        }
    }

    /// Start of the right flank in the template
    pub fn right_start(&self) -> usize {
        self.template.len() - self.right_len
    }
}

/// A designed primer pair
#[derive(Debug, Clone, PartialEq)]
pub struct PrimerPair {
    /// Left primer, 5' to 3'
    pub left: String,
    /// Right primer, 5' to 3' on the reverse strand
    pub right: String,
    /// Melting temperature of the left primer
    pub left_tm: f64,
    /// Melting temperature of the right primer
    pub right_tm: f64,
    /// Length of the amplified product
    pub product_size: usize,
}

/// Capability that designs primers for a locus
pub trait PrimerDesigner: Send + Sync {
    /// Best pair for `request`, or `None` when no pair satisfies the constraints
    fn design(&self, request: &PrimerRequest) -> Result<Option<PrimerPair>>;
}

/// Runs the primer3 command-line tool
#[derive(Debug, Clone)]
pub struct Primer3Designer {
    executable: PathBuf,
}

impl Default for Primer3Designer {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(PRIMER3_EXECUTABLE),
        }
    }
}

impl Primer3Designer {
    /// Designer using a specific primer3 binary
    pub fn with_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Boulder-IO input record for one request
    pub fn boulder_record(request: &PrimerRequest) -> String {
        let shorter = request.left_len.min(request.right_len);
        let longer = request.left_len.max(request.right_len);
        let min_size = shorter.min(18);
        let opt_size = shorter.min(20);
        let max_size = longer.min(27).max(opt_size);
        let total = request.template.len();
        let smallest_product = (total - request.left_len - request.right_len + 2 * min_size).min(total);

        let mut record = String::new();
        let mut tag = |key: &str, value: String| {
            record.push_str(key);
            record.push('=');
            record.push_str(&value);
            record.push('\n');
        };
        tag("SEQUENCE_ID", request.id.clone());
        tag("SEQUENCE_TEMPLATE", String::from_utf8_lossy(&request.template).into_owned());
        tag(
            "SEQUENCE_PRIMER_PAIR_OK_REGION_LIST",
            format!("0,{},{},{}", request.left_len, request.right_start(), request.right_len),
        );
        tag("PRIMER_TASK", "generic".into());
        tag("PRIMER_PICK_LEFT_PRIMER", "1".into());
        tag("PRIMER_PICK_RIGHT_PRIMER", "1".into());
        tag("PRIMER_PICK_INTERNAL_OLIGO", "0".into());
        tag("PRIMER_NUM_RETURN", "1".into());
        tag("PRIMER_MIN_SIZE", min_size.to_string());
        tag("PRIMER_OPT_SIZE", opt_size.to_string());
        tag("PRIMER_MAX_SIZE", max_size.to_string());
        tag("PRIMER_PRODUCT_SIZE_RANGE", format!("{}-{}", smallest_product, total));
        record.push_str("=\n");
        record
    }
}

impl PrimerDesigner for Primer3Designer {
    fn design(&self, request: &PrimerRequest) -> Result<Option<PrimerPair>> {
        let mut child = Command::new(&self.executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| KrispError::Primer(format!("could not run {}: {}", self.executable.display(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(Self::boulder_record(request).as_bytes())
                .map_err(|e| KrispError::Primer(format!("could not write to primer3: {}", e)))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| KrispError::Primer(format!("primer3 did not finish: {}", e)))?;
        if !output.status.success() {
            return Err(KrispError::Primer(format!(
                "primer3 exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let pair = parse_boulder(&String::from_utf8_lossy(&output.stdout))?;
        if pair.is_none() {
            debug!("primer3 found no pair for {}", request.id);
        }
        Ok(pair)
    }
}

/// Extract the first primer pair from primer3 Boulder-IO output
///
/// Only the first record is read. A `PRIMER_ERROR` tag is an error; a
/// record without a pair yields `None`.
pub fn parse_boulder(text: &str) -> Result<Option<PrimerPair>> {
    let mut tags: AHashMap<&str, &str> = AHashMap::new();
    for line in text.lines() {
        if line == "=" {
            break;
        }
        if let Some((key, value)) = line.split_once('=') {
            tags.insert(key, value);
        }
    }

    if let Some(message) = tags.get("PRIMER_ERROR") {
        return Err(KrispError::Primer(message.to_string()));
    }
    if tags.get("PRIMER_PAIR_NUM_RETURNED").is_some_and(|n| n.trim() == "0") {
        return Ok(None);
    }
    let (Some(left), Some(right)) = (tags.get("PRIMER_LEFT_0_SEQUENCE"), tags.get("PRIMER_RIGHT_0_SEQUENCE")) else {
        return Ok(None);
    };

    let number = |key: &str| -> Result<f64> {
        let value = tags
            .get(key)
            .ok_or_else(|| KrispError::Primer(format!("missing {} in primer3 output", key)))?;
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| KrispError::Primer(format!("bad {} in primer3 output: {}", key, value)))
    };

    Ok(Some(PrimerPair {
        left: left.to_string(),
        right: right.to_string(),
        left_tm: number("PRIMER_LEFT_0_TM")?,
        right_tm: number("PRIMER_RIGHT_0_TM")?,
        product_size: number("PRIMER_PAIR_0_PRODUCT_SIZE")? as usize,
    }))
}

/// In-memory designer returning canned pairs by template
#[derive(Debug, Clone, Default)]
pub struct StaticPrimerDesigner {
    pairs: AHashMap<Vec<u8>, PrimerPair>,
}

impl StaticPrimerDesigner {
    /// Designer that knows no pairs
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `pair` for requests whose template is `template`
    pub fn with_pair(mut self, template: impl Into<Vec<u8>>, pair: PrimerPair) -> Self {
        self.pairs.insert(template.into(), pair);
        self
    }
}

impl PrimerDesigner for StaticPrimerDesigner {
    fn design(&self, request: &PrimerRequest) -> Result<Option<PrimerPair>> {
        Ok(self.pairs.get(&request.template).cloned())
    }
}
