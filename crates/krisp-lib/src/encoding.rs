//! Nucleotide handling for window extraction
//!
//! Classifies raw bytes from a genome file, folds soft-masked bases and
//! computes reverse complements. Only the four canonical bases are
//! complemented; every other byte makes a window unusable.

/// How lowercase (soft-masked) bases are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoftMaskMode {
    /// Windows touching a soft-masked base are dropped
    Omit,
    /// Soft-masked bases are folded to uppercase and kept
    #[default]
    Map,
}

/// Outcome of looking at one byte of a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseClass {
    /// Usable base, uppercase
    Base(u8),
    /// Byte that invalidates every window containing it
    Invalid,
}

/// Classify a sequence byte under the given soft-mask mode and disallowed set
#[inline]
pub fn classify_base(byte: u8, mode: SoftMaskMode, disallowed: &[u8]) -> BaseClass {
    if disallowed.contains(&byte) {
        return BaseClass::Invalid;
    }
    match byte {
        b'A' | b'C' | b'G' | b'T' => BaseClass::Base(byte),
        b'a' | b'c' | b'g' | b't' => match mode {
            SoftMaskMode::Map => BaseClass::Base(byte.to_ascii_uppercase()),
            SoftMaskMode::Omit => BaseClass::Invalid,
        },
        _ => BaseClass::Invalid,
    }
}

/// Complement of an uppercase base
///
/// Bytes other than A/C/G/T are returned unchanged.
#[inline]
pub const fn complement_base(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        other => other,
    }
}

/// Write the reverse complement of `seq` into `out`, replacing its contents
pub fn reverse_complement_into(seq: &[u8], out: &mut Vec<u8>) {
    out.clear();
    out.extend(seq.iter().rev().map(|&b| complement_base(b)));
}

/// Reverse complement of an uppercase sequence
pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(seq.len());
    reverse_complement_into(seq, &mut out);
    out
}
