//! Multi-file merge-join on conserved flanks
//!
//! Every per-genome sorted k-mer file gets one read cursor. Each step finds
//! the smallest `(left_flank, right_flank)` key under any cursor, moves
//! every record with that key from every cursor into one [`LocusGroup`] and
//! emits it. Groups come out in strictly ascending key order and are
//! emitted whether or not every file contributed (outer join), so memory
//! stays at one cursor per file plus the current group.
//!
//! The minimum is found with a linear scan over the cursors, which is
//! cheap for the tens of genomes a run compares.

use std::path::Path;

use crate::{
    error::{KrispError, Result},
    record::{FlankKey, KmerRecord},
    sorted_file::SortedKmerReader,
};

/// All records sharing one flank key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocusGroup {
    /// Shared left and right flanks
    pub key: FlankKey,
    /// Records from every file with this key, file by file in input order
    pub members: Vec<KmerRecord>,
}

impl LocusGroup {
    /// Members coming from ingroup genomes
    pub fn ingroup(&self) -> impl Iterator<Item = &KmerRecord> {
        self.members.iter().filter(|r| r.source.is_ingroup())
    }

    /// Members coming from outgroup genomes
    pub fn outgroup(&self) -> impl Iterator<Item = &KmerRecord> {
        self.members.iter().filter(|r| !r.source.is_ingroup())
    }
}

/// One sorted file plus its look-ahead record
struct Cursor {
    reader: SortedKmerReader,
    head: Option<KmerRecord>,
}

impl Cursor {
    fn open(path: &Path) -> Result<Self> {
        let mut reader = SortedKmerReader::open(path)?;
        let head = reader.next_record()?;
        Ok(Self { reader, head })
    }

    fn advance(&mut self) -> Result<()> {
        self.head = self.reader.next_record()?;
        Ok(())
    }
}

/// Lazy iterator of locus groups in ascending key order
pub struct LocusMerger {
    cursors: Vec<Cursor>,
    last_key: Option<FlankKey>,
    failed: bool,
}

impl LocusMerger {
    /// Open a cursor on every sorted file
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let cursors = paths
            .iter()
            .map(|p| Cursor::open(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            cursors,
            last_key: None,
            failed: false,
        })
    }

    /// Index of a cursor holding the smallest key, if any cursor has records
    fn min_cursor(&self) -> Option<usize> {
        let mut best: Option<(usize, (&[u8], &[u8]))> = None;
        for (i, cursor) in self.cursors.iter().enumerate() {
            let Some(head) = &cursor.head else { continue };
            let key = head.flanks();
            match best {
                Some((_, best_key)) if key >= best_key => {}
                _ => best = Some((i, key)),
            }
        }
        best.map(|(i, _)| i)
    }

    fn next_group(&mut self) -> Result<Option<LocusGroup>> {
        let Some(min) = self.min_cursor() else {
            return Ok(None);
        };
        let key = match &self.cursors[min].head {
            Some(head) => head.flank_key(),
            None => return Ok(None),
        };

        if let Some(last) = &self.last_key {
            if key <= *last {
                return Err(KrispError::Consistency {
                    path: self.cursors[min].reader.path().to_path_buf(),
                    record: self.cursors[min].reader.records_read(),
                    detail: format!("flank key {key} repeated after the join moved past it"),
                });
            }
        }

        let mut members = Vec::new();
        for cursor in self.cursors.iter_mut() {
            while let Some(head) = cursor.head.take() {
                if head.flanks() != (key.left.as_slice(), key.right.as_slice()) {
                    cursor.head = Some(head);
                    break;
                }
                members.push(head);
                cursor.advance()?;
            }
        }

        self.last_key = Some(key.clone());
        Ok(Some(LocusGroup { key, members }))
    }
}

impl Iterator for LocusMerger {
    type Item = Result<LocusGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = self.next_group().transpose();
        if matches!(result, Some(Err(_))) {
            self.failed = true;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{SourceId, Strand};
    use crate::sorted_file::write_sorted;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn rec(left: &str, diag: &str, right: &str, source: SourceId, position: u64) -> KmerRecord {
        KmerRecord::new(left.as_bytes(), diag.as_bytes(), right.as_bytes(), source, 0, position, Strand::Forward)
    }

    fn write_file(dir: &Path, name: &str, mut records: Vec<KmerRecord>) -> PathBuf {
        records.sort();
        let path = dir.join(name);
        write_sorted(&records, &path).unwrap();
        path
    }

    /// Fixed-seed LCG so the checks are reproducible
    fn random_file_records(source: SourceId, n: usize, mut state: u64) -> Vec<KmerRecord> {
        let mut next = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            state >> 33
        };
        (0..n)
            .map(|i| {
                let left: Vec<u8> = (0..2).map(|_| b"ACGT"[(next() % 4) as usize]).collect();
                let right: Vec<u8> = (0..2).map(|_| b"ACGT"[(next() % 4) as usize]).collect();
                let diag: Vec<u8> = vec![b"ACGT"[(next() % 4) as usize]];
                KmerRecord::new(&left, &diag, &right, source, 0, i as u64, Strand::Forward)
            })
            .collect()
    }

    #[test]
    fn test_outer_join_groups() {
        let dir = TempDir::new().unwrap();
        let a = SourceId::ingroup(0);
        let b = SourceId::outgroup(1);
        let fa = write_file(dir.path(), "a", vec![rec("AAA", "C", "TTT", a, 1), rec("CCC", "G", "GGG", a, 2)]);
        let fb = write_file(dir.path(), "b", vec![rec("AAA", "T", "TTT", b, 5), rec("GGG", "A", "AAA", b, 6)]);

        let groups: Vec<LocusGroup> = LocusMerger::open(&[fa, fb]).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(groups.len(), 3);

        assert_eq!(groups[0].key.left, b"AAA");
        assert_eq!(groups[0].members.len(), 2);
        assert_eq!(groups[0].ingroup().count(), 1);
        assert_eq!(groups[0].outgroup().count(), 1);

        // Keys present in only one file still come out
        assert_eq!(groups[1].key.left, b"CCC");
        assert_eq!(groups[1].members.len(), 1);
        assert_eq!(groups[2].key.left, b"GGG");
    }

    #[test]
    fn test_repeated_key_within_one_file() {
        let dir = TempDir::new().unwrap();
        let a = SourceId::ingroup(0);
        let fa = write_file(
            dir.path(),
            "a",
            vec![rec("AAA", "C", "TTT", a, 1), rec("AAA", "G", "TTT", a, 9), rec("AAA", "C", "TTG", a, 3)],
        );
        let groups: Vec<LocusGroup> = LocusMerger::open(&[fa]).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key.right, b"TTG");
        assert_eq!(groups[1].members.len(), 2);
    }

    #[test]
    fn test_ascending_unique_and_complete() {
        let dir = TempDir::new().unwrap();
        let mut paths = Vec::new();
        let mut all = Vec::new();
        for i in 0..4u32 {
            let source = if i < 2 { SourceId::ingroup(i) } else { SourceId::outgroup(i) };
            let records = random_file_records(source, 300, u64::from(i) + 17);
            all.extend(records.iter().cloned());
            paths.push(write_file(dir.path(), &format!("f{i}"), records));
        }

        let groups: Vec<LocusGroup> = LocusMerger::open(&paths).unwrap().collect::<Result<_>>().unwrap();

        assert!(groups.windows(2).all(|w| w[0].key < w[1].key));
        let keys: HashSet<&FlankKey> = groups.iter().map(|g| &g.key).collect();
        assert_eq!(keys.len(), groups.len());

        for g in &groups {
            assert!(g.members.iter().all(|r| r.flank_key() == g.key));
        }

        let mut emitted: Vec<KmerRecord> = groups.into_iter().flat_map(|g| g.members).collect();
        emitted.sort();
        all.sort();
        assert_eq!(emitted, all);
    }

    #[test]
    fn test_empty_inputs() {
        let dir = TempDir::new().unwrap();
        let fa = write_file(dir.path(), "a", Vec::new());
        let fb = write_file(dir.path(), "b", vec![rec("AAA", "C", "TTT", SourceId::ingroup(1), 0)]);
        let groups: Vec<LocusGroup> = LocusMerger::open(&[fa, fb]).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(groups.len(), 1);

        let none: Vec<PathBuf> = Vec::new();
        assert_eq!(LocusMerger::open(&none).unwrap().count(), 0);
    }

    #[test]
    fn test_corrupt_input_stops_the_join() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad");
        let unsorted = vec![rec("CCC", "A", "AAA", SourceId::ingroup(0), 0), rec("AAA", "A", "AAA", SourceId::ingroup(0), 1)];
        write_sorted(&unsorted, &path).unwrap();

        let mut merger = LocusMerger::open(&[path]).unwrap();
        let first = merger.next();
        assert!(matches!(first, Some(Err(KrispError::Consistency { .. }))));
        assert!(merger.next().is_none());
    }
}
