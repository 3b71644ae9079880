use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use similar::TextDiff;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::config::{ListSpec, ValidatedConfig};
use crate::error::CurateError;
use crate::filesystem::ArticleFs;
use crate::list_file::{ListFile, PathMapping, remove_list, write_list_atomic};
use crate::model::Article;
use crate::reconcile::{ReconcileReport, load_prior, reconcile};
use crate::resolve::resolve_membership;

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Generate only this list.
    pub only: Option<String>,
    /// Compute every list and report a diff instead of writing.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListAction {
    Written,
    Unchanged,
    /// Disabled list whose file was deleted.
    Removed,
    /// Disabled list with no file on disk.
    Skipped,
}

impl ListAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::Unchanged => "unchanged",
            Self::Removed => "removed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListSummary {
    pub action: ListAction,
    pub entries: usize,
    pub report: ReconcileReport,
    pub changed: bool,
    /// Unified diff against the current file; dry runs only.
    pub diff: Option<String>,
    /// Merged sync-conflict copies that could not be deleted after the write.
    pub leftover_conflicts: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct ListOutcome {
    pub name: String,
    pub path: PathBuf,
    pub result: Result<ListSummary, CurateError>,
}

#[derive(Debug, Default)]
pub struct GenerateReport {
    pub lists: Vec<ListOutcome>,
}

impl GenerateReport {
    pub fn failures(&self) -> impl Iterator<Item = (&str, &CurateError)> {
        self.lists.iter().filter_map(|outcome| {
            outcome
                .result
                .as_ref()
                .err()
                .map(|err| (outcome.name.as_str(), err))
        })
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }
}

/// Resolve, reconcile and write every configured list.
///
/// The catalog is read once up front; if that fails nothing is written. A
/// filesystem failure aborts only the list that hit it.
pub fn generate_lists<F>(
    config: &ValidatedConfig,
    db_path: &Path,
    fs_view: &F,
    options: &GenerateOptions,
) -> Result<GenerateReport, CurateError>
where
    F: ArticleFs + ?Sized,
{
    let selected: Vec<&ListSpec> = match options.only.as_deref() {
        Some(name) => vec![config.list(name)?],
        None => config.lists.values().collect(),
    };

    let snapshot = load_snapshot(db_path)?;
    let mapping = PathMapping::from_config(config);

    let mut report = GenerateReport::default();
    for spec in selected {
        let path = config.list_path(&spec.name);
        let result = if spec.enabled {
            generate_one(
                spec,
                &path,
                &snapshot,
                &mapping,
                fs_view,
                options.dry_run,
                config.catalog.display_columns,
            )
        } else {
            retire_one(&path, options.dry_run)
        };

        match &result {
            Ok(summary) => info!(
                list = %spec.name,
                action = summary.action.as_str(),
                entries = summary.entries,
                kept = summary.report.kept,
                added = summary.report.added,
                pruned = summary.report.pruned,
                rewritten = summary.report.rewritten,
                changed = summary.changed,
                dry_run = options.dry_run,
                "list generated"
            ),
            Err(err) => warn!(list = %spec.name, error = %err, "list generation failed"),
        }
        report.lists.push(ListOutcome {
            name: spec.name.clone(),
            path,
            result,
        });
    }
    Ok(report)
}

fn load_snapshot(db_path: &Path) -> Result<Vec<Article>, CurateError> {
    let unavailable = |err: anyhow::Error| CurateError::CatalogUnavailable {
        path: db_path.to_path_buf(),
        message: format!("{err:#}"),
    };
    let catalog = Catalog::open(db_path).map_err(unavailable)?;
    catalog.snapshot().map_err(unavailable)
}

fn generate_one<F>(
    spec: &ListSpec,
    path: &Path,
    snapshot: &[Article],
    mapping: &PathMapping,
    fs_view: &F,
    dry_run: bool,
    display_columns: bool,
) -> Result<ListSummary, CurateError>
where
    F: ArticleFs + ?Sized,
{
    let prior = load_prior(path, mapping)?;
    let fresh = resolve_membership(snapshot, &spec.query, fs_view)?;
    let merged = reconcile(&prior.entries, &fresh);

    let file = ListFile {
        header: prior.header,
        entries: merged
            .entries
            .iter()
            .map(|entry| mapping.to_reader(entry))
            .collect(),
    };
    let rendered = if display_columns {
        file.render_with_display_columns()
    } else {
        file.render()
    };

    if dry_run {
        let current = read_or_empty(path)?;
        let diff = render_diff(path, &current, &rendered);
        return Ok(ListSummary {
            action: if current == rendered {
                ListAction::Unchanged
            } else {
                ListAction::Written
            },
            entries: file.entries.len(),
            report: merged.report,
            changed: current != rendered,
            diff: Some(diff),
            leftover_conflicts: Vec::new(),
        });
    }

    let changed = write_list_atomic(path, &rendered)?;
    let leftover_conflicts = remove_merged_conflicts(&prior.conflicts);

    Ok(ListSummary {
        action: if changed {
            ListAction::Written
        } else {
            ListAction::Unchanged
        },
        entries: file.entries.len(),
        report: merged.report,
        changed,
        diff: None,
        leftover_conflicts,
    })
}

/// Delete conflict copies whose entries are now in the written list. A copy
/// that cannot be deleted is merged again next run, so it only warrants a
/// warning; the paths are returned.
fn remove_merged_conflicts(conflicts: &[PathBuf]) -> Vec<PathBuf> {
    let mut leftover = Vec::new();
    for conflict in conflicts {
        match fs::remove_file(conflict) {
            Ok(()) => info!(path = %conflict.display(), "merged and removed sync conflict copy"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %conflict.display(), error = %err, "could not remove merged sync conflict copy");
                leftover.push(conflict.clone());
            }
        }
    }
    leftover
}

fn retire_one(path: &Path, dry_run: bool) -> Result<ListSummary, CurateError> {
    let removed = if dry_run {
        path.exists()
    } else {
        remove_list(path)?
    };
    Ok(ListSummary {
        action: if removed {
            ListAction::Removed
        } else {
            ListAction::Skipped
        },
        entries: 0,
        report: ReconcileReport::default(),
        changed: removed,
        diff: None,
        leftover_conflicts: Vec::new(),
    })
}

fn read_or_empty(path: &Path) -> Result<String, CurateError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(CurateError::filesystem(path, err)),
    }
}

fn render_diff(path: &Path, current: &str, rendered: &str) -> String {
    let label = path.display().to_string();
    TextDiff::from_lines(current, rendered)
        .unified_diff()
        .context_radius(3)
        .header(&label, &label)
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::catalog::tests::{definitions, new_article};
    use crate::config::{CatalogSettings, TagDefinition};
    use crate::filesystem::LocalFs;
    use crate::model::{ArticleFormat, TagName, tag_set};
    use crate::predicate::{ListQuery, TagCriteria};
    use crate::resolve::tests::FakeFs;
    use std::collections::BTreeMap;

    struct Fixture {
        _temp: TempDir,
        articles: PathBuf,
        db_path: PathBuf,
        config: ValidatedConfig,
    }

    fn list(name: &str, any: &[&str], formats: &[ArticleFormat]) -> (String, ListSpec) {
        (
            name.to_string(),
            ListSpec {
                name: name.to_string(),
                query: ListQuery {
                    criteria: TagCriteria {
                        any_tags: tag_set(any).expect("tags"),
                        ..TagCriteria::default()
                    },
                    formats: formats.iter().copied().collect(),
                    read_state: None,
                },
                enabled: true,
            },
        )
    }

    /// Catalog with `infofi` articles a.epub, foo.pdf (+ foo.epub sibling on
    /// disk) and an `ai` article b.html.
    fn fixture() -> Fixture {
        let temp = tempdir().expect("tempdir");
        let articles = temp.path().join("articles");
        fs::create_dir_all(&articles).expect("articles");
        for name in ["a.epub", "foo.pdf", "foo.epub", "b.html"] {
            fs::write(articles.join(name), name).expect("article");
        }

        let db_path = temp.path().join("catalog.db");
        let mut catalog = Catalog::open_or_create(&db_path).expect("catalog");
        let tags: BTreeMap<TagName, TagDefinition> = definitions(&["infofi", "ai"]);
        catalog.sync_tag_definitions(&tags).expect("sync");
        for (name, format, tag) in [
            ("a.epub", ArticleFormat::Epub, "infofi"),
            ("foo.pdf", ArticleFormat::Pdf, "infofi"),
            ("b.html", ArticleFormat::Html, "ai"),
        ] {
            let path = articles.join(name);
            catalog.upsert_article(&new_article(&path, format)).expect("upsert");
            catalog
                .set_tag(&path, &TagName::new(tag).expect("tag"), true)
                .expect("tag");
        }

        let config = ValidatedConfig {
            article_dir: articles.clone(),
            lists_dir: temp.path().join("lists"),
            reader_root: None,
            catalog: CatalogSettings {
                doc_formats: ArticleFormat::ALL.into_iter().collect(),
                file_names_to_skip: Vec::new(),
                list_extension: "rlst".to_string(),
                display_columns: false,
            },
            tags,
            lists: [
                list("infofi", &["infofi"], &[ArticleFormat::Epub, ArticleFormat::Html]),
                list("ai", &["ai"], &[]),
            ]
            .into_iter()
            .collect(),
        };
        Fixture {
            _temp: temp,
            articles,
            db_path,
            config,
        }
    }

    fn summary<'a>(report: &'a GenerateReport, name: &str) -> &'a ListSummary {
        report
            .lists
            .iter()
            .find(|outcome| outcome.name == name)
            .expect("outcome")
            .result
            .as_ref()
            .expect("list succeeded")
    }

    #[test]
    fn generates_lists_with_rewrites() {
        let fx = fixture();
        let report = generate_lists(&fx.config, &fx.db_path, &LocalFs, &GenerateOptions::default())
            .expect("generate");
        assert_eq!(report.failed_count(), 0);

        let infofi = fs::read_to_string(fx.config.list_path("infofi")).expect("infofi");
        assert_eq!(
            infofi,
            format!(
                "{}\n{}\n",
                fx.articles.join("a.epub").display(),
                fx.articles.join("foo.epub").display()
            )
        );
        let ai = fs::read_to_string(fx.config.list_path("ai")).expect("ai");
        assert_eq!(ai, format!("{}\n", fx.articles.join("b.html").display()));
        assert_eq!(summary(&report, "infofi").action, ListAction::Written);
    }

    #[test]
    fn second_run_is_byte_identical() {
        let fx = fixture();
        generate_lists(&fx.config, &fx.db_path, &LocalFs, &GenerateOptions::default())
            .expect("first run");
        let first = fs::read(fx.config.list_path("infofi")).expect("first");

        let report = generate_lists(&fx.config, &fx.db_path, &LocalFs, &GenerateOptions::default())
            .expect("second run");
        let second = fs::read(fx.config.list_path("infofi")).expect("second");
        assert_eq!(first, second);
        let infofi = summary(&report, "infofi");
        assert!(!infofi.changed);
        assert_eq!(infofi.action, ListAction::Unchanged);
        assert_eq!(infofi.report.kept, 2);
    }

    #[test]
    fn deleted_file_is_pruned_and_order_is_kept() {
        let fx = fixture();
        let list_path = fx.config.list_path("infofi");
        fs::create_dir_all(list_path.parent().expect("parent")).expect("lists dir");
        fs::write(
            &list_path,
            format!(
                "infofi\n:p=0\n{}\n{}\n",
                fx.articles.join("foo.epub").display(),
                fx.articles.join("a.epub").display()
            ),
        )
        .expect("prior list");
        fs::remove_file(fx.articles.join("a.epub")).expect("delete a");

        let report = generate_lists(&fx.config, &fx.db_path, &LocalFs, &GenerateOptions::default())
            .expect("generate");
        let written = fs::read_to_string(&list_path).expect("list");
        assert_eq!(
            written,
            format!("infofi\n:p=0\n{}\n", fx.articles.join("foo.epub").display())
        );
        let infofi = summary(&report, "infofi");
        assert_eq!(infofi.report.pruned, 1);
        assert_eq!(infofi.report.kept, 1);
    }

    #[test]
    fn conflict_copies_are_merged_then_removed() {
        let fx = fixture();
        let list_path = fx.config.list_path("infofi");
        let lists_dir = list_path.parent().expect("parent").to_path_buf();
        fs::create_dir_all(&lists_dir).expect("lists dir");
        let conflict = lists_dir.join("infofi.sync-conflict-20240101-000000-AAA.rlst");
        fs::write(&conflict, format!("{}\n", fx.articles.join("foo.epub").display()))
            .expect("conflict");

        generate_lists(&fx.config, &fx.db_path, &LocalFs, &GenerateOptions::default())
            .expect("generate");
        assert!(!conflict.exists());
        let written = fs::read_to_string(&list_path).expect("list");
        assert!(written.starts_with(&fx.articles.join("foo.epub").display().to_string()));
    }

    #[test]
    fn dry_run_reports_diff_without_writing() {
        let fx = fixture();
        let options = GenerateOptions {
            only: Some("ai".to_string()),
            dry_run: true,
        };
        let report = generate_lists(&fx.config, &fx.db_path, &LocalFs, &options).expect("dry run");
        assert_eq!(report.lists.len(), 1);
        let ai = summary(&report, "ai");
        assert!(ai.changed);
        assert!(ai.diff.as_deref().expect("diff").contains("+"));
        assert!(!fx.config.list_path("ai").exists());
    }

    #[test]
    fn unknown_only_list_is_a_configuration_error() {
        let fx = fixture();
        let options = GenerateOptions {
            only: Some("missing".to_string()),
            dry_run: false,
        };
        let error = generate_lists(&fx.config, &fx.db_path, &LocalFs, &options).expect_err("must fail");
        assert!(matches!(error, CurateError::Configuration(_)));
    }

    #[test]
    fn missing_catalog_aborts_before_writing() {
        let fx = fixture();
        let error = generate_lists(
            &fx.config,
            &fx.db_path.with_file_name("absent.db"),
            &LocalFs,
            &GenerateOptions::default(),
        )
        .expect_err("must fail");
        assert!(matches!(error, CurateError::CatalogUnavailable { .. }));
        assert!(!fx.config.list_path("infofi").exists());
        assert!(!fx.config.list_path("ai").exists());
    }

    #[test]
    fn filesystem_failure_is_isolated_to_one_list() {
        let fx = fixture();
        let mut fake = FakeFs::default();
        fake.live = ["a.epub", "foo.pdf", "foo.epub"]
            .into_iter()
            .map(|name| fx.articles.join(name))
            .collect::<BTreeSet<_>>();
        fake.broken.insert(fx.articles.join("b.html"));

        let report = generate_lists(&fx.config, &fx.db_path, &fake, &GenerateOptions::default())
            .expect("generate");
        assert_eq!(report.failed_count(), 1);
        let (name, error) = report.failures().next().expect("failure");
        assert_eq!(name, "ai");
        assert!(matches!(error, CurateError::Filesystem { .. }));
        assert!(!fx.config.list_path("ai").exists());
        assert!(fx.config.list_path("infofi").exists());
    }

    #[test]
    fn disabled_list_file_is_removed() {
        let mut fx = fixture();
        let list_path = fx.config.list_path("ai");
        fs::create_dir_all(list_path.parent().expect("parent")).expect("lists dir");
        fs::write(&list_path, "stale\n").expect("stale");
        fx.config.lists.get_mut("ai").expect("ai").enabled = false;

        let report = generate_lists(&fx.config, &fx.db_path, &LocalFs, &GenerateOptions::default())
            .expect("generate");
        assert_eq!(summary(&report, "ai").action, ListAction::Removed);
        assert!(!list_path.exists());
    }

    #[test]
    fn reader_root_entries_round_trip_across_runs() {
        let mut fx = fixture();
        fx.config.reader_root = Some(PathBuf::from("/sdcard/Books"));

        generate_lists(&fx.config, &fx.db_path, &LocalFs, &GenerateOptions::default())
            .expect("first run");
        let list_path = fx.config.list_path("infofi");
        let first = fs::read_to_string(&list_path).expect("first");
        assert_eq!(first, "/sdcard/Books/a.epub\n/sdcard/Books/foo.epub\n");

        let report = generate_lists(&fx.config, &fx.db_path, &LocalFs, &GenerateOptions::default())
            .expect("second run");
        assert_eq!(fs::read_to_string(&list_path).expect("second"), first);
        let infofi = summary(&report, "infofi");
        assert_eq!(infofi.action, ListAction::Unchanged);
        assert_eq!(infofi.report.kept, 2);
        assert_eq!(infofi.report.added, 0);
    }

    #[test]
    fn display_columns_are_written_and_stable() {
        let mut fx = fixture();
        fx.config.reader_root = Some(PathBuf::from("/sdcard/Books"));
        fx.config.catalog.display_columns = true;

        generate_lists(&fx.config, &fx.db_path, &LocalFs, &GenerateOptions::default())
            .expect("first run");
        let list_path = fx.config.list_path("infofi");
        assert_eq!(
            fs::read_to_string(&list_path).expect("list"),
            "/sdcard/Books/a.epub\t# a\n/sdcard/Books/foo.epub\t# foo\n"
        );

        let report = generate_lists(&fx.config, &fx.db_path, &LocalFs, &GenerateOptions::default())
            .expect("second run");
        assert!(!summary(&report, "infofi").changed);
    }

    #[test]
    fn undeletable_conflict_copy_is_reported_not_fatal() {
        let temp = tempdir().expect("tempdir");
        let gone = temp.path().join("ai.sync-conflict-1-A.rlst");
        let stuck = temp.path().join("ai.sync-conflict-2-B.rlst");
        fs::create_dir_all(&stuck).expect("directory in the way");
        let merged = temp.path().join("ai.sync-conflict-3-C.rlst");
        fs::write(&merged, "/a.epub\n").expect("conflict");

        let leftover = remove_merged_conflicts(&[gone, stuck.clone(), merged.clone()]);
        assert_eq!(leftover, vec![stuck]);
        assert!(!merged.exists());
    }
}
