//! Diagnostic-pattern filter
//!
//! A locus is diagnostic when every ingroup occurrence carries the same
//! middle sequence and no outgroup occurrence carries that sequence. An
//! outgroup genome may lack the locus entirely or show a different middle;
//! both count in favour of the locus. When the amplicon has no diagnostic
//! region every locus passes unfiltered.

use std::collections::BTreeSet;

use ahash::AHashSet;

use crate::{merge_join::LocusGroup, params::AmpliconParams};

/// How many ingroup genomes must contain a locus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngroupCoverage {
    /// At least one; those present must agree
    #[default]
    Present,
    /// Every ingroup genome
    All,
}

/// Why a locus was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No ingroup genome has the locus
    NoIngroup,
    /// Ingroup occurrences carry different middles
    IngroupDisagreement,
    /// Some ingroup genome lacks the locus (`IngroupCoverage::All` only)
    MissingIngroup,
    /// An outgroup occurrence carries the ingroup middle
    OutgroupShares,
}

/// Filter outcome for one locus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The locus discriminates ingroup from outgroup
    Accepted,
    /// The locus does not
    Rejected(RejectReason),
}

/// A locus group with its verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticCall {
    /// The joined records
    pub group: LocusGroup,
    /// Outcome
    pub verdict: Verdict,
    /// Middle sequence shared by the ingroup, when the ingroup agrees
    pub ingroup_diag: Option<Vec<u8>>,
    /// Distinct middles seen in outgroup genomes (possibly none)
    pub outgroup_diags: BTreeSet<Vec<u8>>,
}

impl DiagnosticCall {
    /// Whether the locus was accepted
    pub fn is_accepted(&self) -> bool {
        self.verdict == Verdict::Accepted
    }
}

/// Classifies locus groups
#[derive(Debug, Clone)]
pub struct DiagnosticFilter {
    passthrough: bool,
    coverage: IngroupCoverage,
    ingroup_sources: usize,
}

impl DiagnosticFilter {
    /// Filter for a run with `ingroup_sources` ingroup genomes
    ///
    /// Becomes a passthrough when `params` leaves no diagnostic region.
    pub fn new(params: &AmpliconParams, ingroup_sources: usize, coverage: IngroupCoverage) -> Self {
        Self {
            passthrough: !params.has_diagnostic_region(),
            coverage,
            ingroup_sources,
        }
    }

    /// Whether every locus is accepted unexamined
    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    /// Classify one group
    pub fn classify(&self, group: LocusGroup) -> DiagnosticCall {
        let mut shared: Option<&[u8]> = None;
        let mut disagree = false;
        let mut present: AHashSet<u32> = AHashSet::new();

        for record in group.ingroup() {
            present.insert(record.source.index);
            match shared {
                None => shared = Some(record.diag()),
                Some(diag) if diag != record.diag() => disagree = true,
                Some(_) => {}
            }
        }

        let outgroup_diags: BTreeSet<Vec<u8>> = group.outgroup().map(|r| r.diag().to_vec()).collect();

        let verdict = if self.passthrough {
            Verdict::Accepted
        } else {
            match shared {
                None => Verdict::Rejected(RejectReason::NoIngroup),
                Some(_) if disagree => Verdict::Rejected(RejectReason::IngroupDisagreement),
                Some(_) if self.coverage == IngroupCoverage::All && present.len() < self.ingroup_sources => {
                    Verdict::Rejected(RejectReason::MissingIngroup)
                }
                Some(diag) if outgroup_diags.contains(diag) => Verdict::Rejected(RejectReason::OutgroupShares),
                Some(_) => Verdict::Accepted,
            }
        };

        let ingroup_diag = if disagree { None } else { shared.map(<[u8]>::to_vec) };

        DiagnosticCall {
            group,
            verdict,
            ingroup_diag,
            outgroup_diags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{KmerRecord, SourceId, Strand};

    const LEFT: &[u8] = b"ACGTACGTAC";
    const RIGHT: &[u8] = b"GGCCGGCCTA";

    fn member(source: SourceId, diag: &str) -> KmerRecord {
        KmerRecord::new(LEFT, diag.as_bytes(), RIGHT, source, 0, 100, Strand::Forward)
    }

    fn group(members: Vec<KmerRecord>) -> LocusGroup {
        LocusGroup {
            key: members[0].flank_key(),
            members,
        }
    }

    fn filter(ingroup: usize) -> DiagnosticFilter {
        DiagnosticFilter::new(&AmpliconParams::new(10, 4, 10).unwrap(), ingroup, IngroupCoverage::Present)
    }

    #[test]
    fn test_accepted_with_differing_outgroup() {
        let call = filter(2).classify(group(vec![
            member(SourceId::ingroup(0), "AAAA"),
            member(SourceId::ingroup(1), "AAAA"),
            member(SourceId::outgroup(2), "GGGG"),
        ]));
        assert!(call.is_accepted());
        assert_eq!(call.ingroup_diag.as_deref(), Some(&b"AAAA"[..]));
        assert_eq!(call.outgroup_diags.len(), 1);
        assert!(call.outgroup_diags.contains(&b"GGGG".to_vec()));
    }

    #[test]
    fn test_accepted_with_absent_outgroup() {
        let call = filter(2).classify(group(vec![
            member(SourceId::ingroup(0), "AAAA"),
            member(SourceId::ingroup(1), "AAAA"),
        ]));
        assert!(call.is_accepted());
        assert!(call.outgroup_diags.is_empty());
    }

    #[test]
    fn test_rejected_when_outgroup_shares() {
        let call = filter(2).classify(group(vec![
            member(SourceId::ingroup(0), "AAAA"),
            member(SourceId::ingroup(1), "AAAA"),
            member(SourceId::outgroup(2), "GGGG"),
            member(SourceId::outgroup(3), "AAAA"),
        ]));
        assert_eq!(call.verdict, Verdict::Rejected(RejectReason::OutgroupShares));
    }

    #[test]
    fn test_rejected_when_ingroup_disagrees() {
        let call = filter(2).classify(group(vec![
            member(SourceId::ingroup(0), "AAAA"),
            member(SourceId::ingroup(1), "TTTT"),
        ]));
        assert_eq!(call.verdict, Verdict::Rejected(RejectReason::IngroupDisagreement));
        assert!(call.ingroup_diag.is_none());
    }

    #[test]
    fn test_same_source_repeat_disagreement() {
        let call = filter(1).classify(group(vec![
            member(SourceId::ingroup(0), "AAAA"),
            member(SourceId::ingroup(0), "ACAA"),
        ]));
        assert_eq!(call.verdict, Verdict::Rejected(RejectReason::IngroupDisagreement));
    }

    #[test]
    fn test_outgroup_only_locus() {
        let call = filter(1).classify(group(vec![member(SourceId::outgroup(1), "GGGG")]));
        assert_eq!(call.verdict, Verdict::Rejected(RejectReason::NoIngroup));
    }

    #[test]
    fn test_all_coverage() {
        let strict = DiagnosticFilter::new(&AmpliconParams::new(10, 4, 10).unwrap(), 2, IngroupCoverage::All);
        let partial = group(vec![member(SourceId::ingroup(0), "AAAA")]);
        assert_eq!(strict.classify(partial.clone()).verdict, Verdict::Rejected(RejectReason::MissingIngroup));
        assert!(filter(2).classify(partial).is_accepted());

        let full = group(vec![member(SourceId::ingroup(0), "AAAA"), member(SourceId::ingroup(1), "AAAA")]);
        assert!(strict.classify(full).is_accepted());
    }

    #[test]
    fn test_passthrough_without_diagnostic_region() {
        let f = DiagnosticFilter::new(&AmpliconParams::new(10, 0, 10).unwrap(), 1, IngroupCoverage::All);
        assert!(f.is_passthrough());
        let call = f.classify(group(vec![
            KmerRecord::new(LEFT, b"", RIGHT, SourceId::ingroup(0), 0, 0, Strand::Forward),
            KmerRecord::new(LEFT, b"", RIGHT, SourceId::outgroup(1), 0, 0, Strand::Forward),
        ]));
        assert!(call.is_accepted());
    }
}
