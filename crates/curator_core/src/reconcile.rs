use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::CurateError;
use crate::list_file::{PathMapping, conflict_copies, read_list};
use crate::resolve::ResolvedEntry;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub kept: usize,
    pub added: usize,
    pub pruned: usize,
    pub rewritten: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub entries: Vec<PathBuf>,
    pub report: ReconcileReport,
}

/// What a list looked like before this run, in local paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorList {
    pub header: Vec<String>,
    pub entries: Vec<PathBuf>,
    /// Sync-conflict copies merged into `entries`; delete once the list is written.
    pub conflicts: Vec<PathBuf>,
}

/// Read the current list file and any sync-conflict copies of it. Entries of
/// the main file come first; conflict entries follow and the first occurrence
/// of a path wins.
pub fn load_prior(list_path: &Path, mapping: &PathMapping) -> Result<PriorList, CurateError> {
    let mut prior = PriorList::default();
    let mut seen = HashSet::new();

    let main = read_list(list_path)?;
    let conflicts = conflict_copies(list_path)?;
    let mut sources = Vec::with_capacity(conflicts.len() + 1);
    if let Some(list) = main {
        sources.push(list);
    }
    for conflict in &conflicts {
        if let Some(list) = read_list(conflict)? {
            sources.push(list);
        }
    }

    for list in sources {
        if prior.header.is_empty() {
            prior.header = list.header;
        }
        for entry in list.entries {
            let local = mapping.to_local(&entry);
            if seen.insert(local.clone()) {
                prior.entries.push(local);
            }
        }
    }
    prior.conflicts = conflicts;
    Ok(prior)
}

/// Merge the freshly resolved membership into the prior entry order.
///
/// Prior entries still in the fresh set keep their relative order. A prior
/// entry naming another rendition of a still-qualifying article (`foo.pdf`
/// now listed as `foo.epub`, or back again once the EPUB is gone) is replaced
/// in place. Every other prior entry is pruned. Fresh entries not yet emitted
/// are appended in resolver order.
pub fn reconcile(prior: &[PathBuf], fresh: &[ResolvedEntry]) -> Reconciled {
    let outputs: HashSet<&Path> = fresh.iter().map(|entry| entry.output.as_path()).collect();
    let mut rewrites: HashMap<PathBuf, &Path> = HashMap::new();
    for entry in fresh {
        for rendition in entry.renditions() {
            if rendition != entry.output {
                rewrites.entry(rendition).or_insert(entry.output.as_path());
            }
        }
    }

    let mut emitted: HashSet<&Path> = HashSet::new();
    let mut entries = Vec::with_capacity(fresh.len());
    let mut report = ReconcileReport::default();

    for entry in prior {
        let entry = entry.as_path();
        if outputs.contains(entry) {
            if emitted.insert(entry) {
                entries.push(entry.to_path_buf());
                report.kept += 1;
            } else {
                report.pruned += 1;
            }
            continue;
        }
        match rewrites.get(entry) {
            Some(&output) if emitted.insert(output) => {
                entries.push(output.to_path_buf());
                report.rewritten += 1;
            }
            _ => report.pruned += 1,
        }
    }

    for entry in fresh {
        if emitted.insert(entry.output.as_path()) {
            entries.push(entry.output.clone());
            report.added += 1;
        }
    }

    Reconciled { entries, report }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::model::ArticleFormat;

    fn plain(path: &str) -> ResolvedEntry {
        ResolvedEntry {
            source: PathBuf::from(path),
            source_format: ArticleFormat::from_path(Path::new(path)).expect("format"),
            output: PathBuf::from(path),
        }
    }

    fn rewritten(source: &str, output: &str) -> ResolvedEntry {
        ResolvedEntry {
            source: PathBuf::from(source),
            source_format: ArticleFormat::Pdf,
            output: PathBuf::from(output),
        }
    }

    fn paths(values: &[&str]) -> Vec<PathBuf> {
        values.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn no_op_keeps_prior_order() {
        let prior = paths(&["c.epub", "a.epub", "b.epub"]);
        let fresh = vec![plain("a.epub"), plain("b.epub"), plain("c.epub")];

        let merged = reconcile(&prior, &fresh);
        assert_eq!(merged.entries, prior);
        assert_eq!(
            merged.report,
            ReconcileReport {
                kept: 3,
                ..ReconcileReport::default()
            }
        );
    }

    #[test]
    fn vanished_and_disqualified_entries_are_pruned() {
        let prior = paths(&["gone.epub", "b.epub", "untagged.epub"]);
        let fresh = vec![plain("a.epub"), plain("b.epub")];

        let merged = reconcile(&prior, &fresh);
        assert_eq!(merged.entries, paths(&["b.epub", "a.epub"]));
        assert_eq!(merged.report.kept, 1);
        assert_eq!(merged.report.pruned, 2);
        assert_eq!(merged.report.added, 1);
    }

    #[test]
    fn rewritten_source_is_substituted_in_place() {
        let prior = paths(&["x.epub", "foo.pdf", "y.epub"]);
        let fresh = vec![rewritten("foo.pdf", "foo.epub"), plain("x.epub"), plain("y.epub")];

        let merged = reconcile(&prior, &fresh);
        assert_eq!(merged.entries, paths(&["x.epub", "foo.epub", "y.epub"]));
        assert_eq!(merged.report.rewritten, 1);
        assert_eq!(merged.report.added, 0);
    }

    #[test]
    fn vanished_epub_falls_back_to_pdf_in_place() {
        let prior = paths(&["foo.epub", "a.epub"]);
        let fresh = vec![plain("a.epub"), plain("foo.pdf")];

        let merged = reconcile(&prior, &fresh);
        assert_eq!(merged.entries, paths(&["foo.pdf", "a.epub"]));
        assert_eq!(
            merged.report,
            ReconcileReport {
                kept: 1,
                rewritten: 1,
                ..ReconcileReport::default()
            }
        );
    }

    #[test]
    fn epub_of_a_different_article_is_not_substituted() {
        let prior = paths(&["bar.epub", "a.epub"]);
        let fresh = vec![plain("a.epub"), plain("foo.pdf")];

        let merged = reconcile(&prior, &fresh);
        assert_eq!(merged.entries, paths(&["a.epub", "foo.pdf"]));
        assert_eq!(merged.report.pruned, 1);
        assert_eq!(merged.report.added, 1);
    }

    #[test]
    fn prior_with_both_renditions_emits_one() {
        let prior = paths(&["foo.pdf", "foo.epub"]);
        let fresh = vec![rewritten("foo.pdf", "foo.epub")];

        let merged = reconcile(&prior, &fresh);
        assert_eq!(merged.entries, paths(&["foo.epub"]));
        assert_eq!(merged.report.rewritten, 1);
        assert_eq!(merged.report.pruned, 1);
    }

    #[test]
    fn reconcile_is_stable_when_rerun_on_its_own_output() {
        let fresh = vec![plain("a.epub"), rewritten("b.pdf", "b.epub"), plain("c.html")];
        let first = reconcile(&paths(&["c.html"]), &fresh);
        let second = reconcile(&first.entries, &fresh);
        assert_eq!(first.entries, second.entries);
        assert_eq!(second.report.kept, 3);
    }

    #[test]
    fn load_prior_merges_conflict_copies_after_main_file() {
        let temp = tempdir().expect("tempdir");
        let list_path = temp.path().join("ai.rlst");
        fs::write(&list_path, "ai\n:p=1\n/reader/a.epub\n/reader/b.epub\n").expect("main");
        let conflict = temp.path().join("ai.sync-conflict-20240101-000000-XYZ.rlst");
        fs::write(&conflict, "/reader/b.epub\n/reader/c.epub\n").expect("conflict");

        let mapping = PathMapping::new("/local", Some(PathBuf::from("/reader")));
        let prior = load_prior(&list_path, &mapping).expect("load");
        assert_eq!(prior.header, vec!["ai", ":p=1"]);
        assert_eq!(
            prior.entries,
            paths(&["/local/a.epub", "/local/b.epub", "/local/c.epub"])
        );
        assert_eq!(prior.conflicts, vec![conflict]);
    }

    #[test]
    fn load_prior_of_missing_list_is_empty() {
        let temp = tempdir().expect("tempdir");
        let mapping = PathMapping::new(temp.path(), None);
        let prior = load_prior(&temp.path().join("new.rlst"), &mapping).expect("load");
        assert_eq!(prior, PriorList::default());
    }
}
