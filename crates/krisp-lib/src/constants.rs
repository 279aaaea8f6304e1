//! Constants and defaults for krisp
//!
//! Defaults shared by the library and the command-line front end,
//! including the sort memory ceiling and the ambiguity codes dropped
//! during k-mer extraction.

/// Fraction of available memory (in percent) shared by all concurrently
/// running sort jobs
pub const DEFAULT_SORT_MEMORY_PERCENT: u8 = 80;

/// Bytes that make a window unusable (ambiguous bases)
pub const DEFAULT_DISALLOWED: &[u8] = b"Nn";

/// Bytes per MiB
pub const MIB: usize = 1024 * 1024;

/// Write buffer for spilled sort segments
pub const SEGMENT_WRITE_BUFFER: usize = MIB;

/// Write buffer for final sorted k-mer files
pub const OUTPUT_WRITE_BUFFER: usize = 4 * MIB;

/// Smallest sort buffer ever used, whatever the memory ceiling resolves to
pub const MIN_SORT_BUFFER_BYTES: u64 = 64 * 1024;

/// Segment merges log progress every this many records
pub const MERGE_PROGRESS_INTERVAL: u64 = 100_000_000;

/// Name of the primer3 executable used by the production primer designer
pub const PRIMER3_EXECUTABLE: &str = "primer3_core";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(DEFAULT_SORT_MEMORY_PERCENT, 80);
        assert!(DEFAULT_DISALLOWED.contains(&b'N'));
        assert!(DEFAULT_DISALLOWED.contains(&b'n'));
        assert!(OUTPUT_WRITE_BUFFER > SEGMENT_WRITE_BUFFER);
    }
}
