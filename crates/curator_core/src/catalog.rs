use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::TagDefinition;
use crate::filesystem::{ArticleFs, ScannedArticle};
use crate::migrate::{
    LATEST_VERSION, current_version, ensure_db_parent, migrate_connection, open_connection,
};
use crate::model::{Article, ArticleFormat, ReadState, TagName, TagSet};
use crate::predicate::ListQuery;
use crate::runtime::MIGRATIONS_POLICY_MESSAGE;

const ARTICLE_COLUMNS: &str =
    "path, format, read_state, summary, source_url, content_hash";

/// Values written by an upsert. `None` for the optional text fields keeps
/// whatever the catalog already holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub path: PathBuf,
    pub format: ArticleFormat,
    pub read_state: ReadState,
    pub summary: Option<String>,
    pub source_url: Option<String>,
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TagSyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub cleared_assignments: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct IngestReport {
    pub scanned: usize,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

pub struct Catalog {
    connection: Connection,
}

impl Catalog {
    /// Open an existing, fully migrated catalog.
    pub fn open(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            bail!("catalog database not found: {}", db_path.display());
        }
        let connection = open_connection(db_path)?;
        let version = current_version(&connection)?;
        if version == 0 {
            bail!(
                "catalog at {} has no schema. {MIGRATIONS_POLICY_MESSAGE}",
                db_path.display()
            );
        }
        if version < LATEST_VERSION {
            bail!(
                "catalog at {} is at schema v{version:03}, expected v{LATEST_VERSION:03}. {MIGRATIONS_POLICY_MESSAGE}",
                db_path.display()
            );
        }
        Ok(Self { connection })
    }

    /// Open the catalog, creating it and applying pending migrations first.
    pub fn open_or_create(db_path: &Path) -> Result<Self> {
        ensure_db_parent(db_path)?;
        let connection = open_connection(db_path)?;
        migrate_connection(&connection)?;
        Ok(Self { connection })
    }

    pub fn upsert_article(&self, article: &NewArticle) -> Result<UpsertOutcome> {
        let key = path_key(&article.path)?;
        let now = unix_timestamp()?;
        let existed = self.contains(&article.path)?;
        self.connection
            .execute(
                "INSERT INTO articles (
                    path, format, read_state, summary, source_url, content_hash,
                    created_at_unix, updated_at_unix
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                ON CONFLICT(path) DO UPDATE SET
                    format = excluded.format,
                    read_state = excluded.read_state,
                    summary = COALESCE(excluded.summary, articles.summary),
                    source_url = COALESCE(excluded.source_url, articles.source_url),
                    content_hash = COALESCE(excluded.content_hash, articles.content_hash),
                    updated_at_unix = excluded.updated_at_unix",
                params![
                    key,
                    article.format.as_str(),
                    article.read_state.as_str(),
                    article.summary,
                    article.source_url,
                    article.content_hash,
                    now,
                ],
            )
            .with_context(|| format!("failed to upsert article {key}"))?;
        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    pub fn contains(&self, path: &Path) -> Result<bool> {
        let key = path_key(path)?;
        let exists: i64 = self
            .connection
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM articles WHERE path = ?1)",
                [key],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to look up article {key}"))?;
        Ok(exists == 1)
    }

    pub fn get_article(&self, path: &Path) -> Result<Option<Article>> {
        let key = path_key(path)?;
        let row = self
            .connection
            .query_row(
                &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE path = ?1"),
                [key],
                read_article_row,
            )
            .optional()
            .with_context(|| format!("failed to load article {key}"))?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut article = row.into_article()?;
        let mut statement = self
            .connection
            .prepare(
                "SELECT tag_name FROM article_tags
                 WHERE article_path = ?1 AND matches = 1
                 ORDER BY tag_name",
            )
            .context("failed to prepare article tag query")?;
        let names = statement
            .query_map([key], |row| row.get::<_, String>(0))
            .context("failed to run article tag query")?;
        for name in names {
            let name = name.context("failed to decode article tag row")?;
            article.tags.insert(stored_tag_name(&name)?);
        }
        Ok(Some(article))
    }

    /// Every article ordered by path, with its carried tags.
    pub fn snapshot(&self) -> Result<Vec<Article>> {
        self.load_articles(&format!("SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY path"), &[])
    }

    /// Articles admitted by `query`, ordered by path. Format and read-state
    /// filters run in SQL; tag criteria run over the loaded tag sets.
    pub fn search(&self, query: &ListQuery) -> Result<Vec<Article>> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if !query.formats.is_empty() {
            let placeholders = vec!["?"; query.formats.len()].join(", ");
            clauses.push(format!("format IN ({placeholders})"));
            values.extend(query.formats.iter().map(|format| format.as_str().to_string()));
        }
        if let Some(state) = query.read_state {
            clauses.push("read_state = ?".to_string());
            values.push(state.as_str().to_string());
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles{where_clause} ORDER BY path");
        let articles = self.load_articles(&sql, &values)?;
        Ok(articles
            .into_iter()
            .filter(|article| query.admits(article))
            .collect())
    }

    fn load_articles(&self, sql: &str, values: &[String]) -> Result<Vec<Article>> {
        let mut tags_by_path = self.load_carried_tags()?;

        let mut statement = self
            .connection
            .prepare(sql)
            .context("failed to prepare article query")?;
        let rows = statement
            .query_map(params_from_iter(values.iter()), read_article_row)
            .context("failed to run article query")?;

        let mut out = Vec::new();
        for row in rows {
            let row = row.context("failed to decode article row")?;
            let tags = tags_by_path.remove(&row.path).unwrap_or_default();
            let mut article = row.into_article()?;
            article.tags = tags;
            out.push(article);
        }
        Ok(out)
    }

    fn load_carried_tags(&self) -> Result<BTreeMap<String, TagSet>> {
        let mut statement = self
            .connection
            .prepare("SELECT article_path, tag_name FROM article_tags WHERE matches = 1")
            .context("failed to prepare tag query")?;
        let rows = statement
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("failed to run tag query")?;

        let mut out: BTreeMap<String, TagSet> = BTreeMap::new();
        for row in rows {
            let (path, tag) = row.context("failed to decode tag row")?;
            out.entry(path).or_default().insert(stored_tag_name(&tag)?);
        }
        Ok(out)
    }

    /// Record a tag evaluation. `matches = false` keeps the row so the tagger
    /// knows the article was already evaluated for this tag.
    pub fn set_tag(&self, path: &Path, tag: &TagName, matches: bool) -> Result<()> {
        let key = path_key(path)?;
        if !self.contains(path)? {
            bail!("article not in catalog: {key}");
        }
        if !self.has_tag_definition(tag)? {
            bail!("tag `{tag}` is not in the catalog; run `curator catalog sync-tags`");
        }
        self.connection
            .execute(
                "INSERT INTO article_tags (article_path, tag_name, matches)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(article_path, tag_name) DO UPDATE SET matches = excluded.matches",
                params![key, tag.as_str(), i64::from(matches)],
            )
            .with_context(|| format!("failed to tag {key} with {tag}"))?;
        Ok(())
    }

    pub fn remove_tag(&self, path: &Path, tag: &TagName) -> Result<bool> {
        let key = path_key(path)?;
        let deleted = self
            .connection
            .execute(
                "DELETE FROM article_tags WHERE article_path = ?1 AND tag_name = ?2",
                params![key, tag.as_str()],
            )
            .with_context(|| format!("failed to untag {key}"))?;
        Ok(deleted > 0)
    }

    pub fn set_read_state(&self, path: &Path, state: ReadState) -> Result<bool> {
        let key = path_key(path)?;
        let updated = self
            .connection
            .execute(
                "UPDATE articles SET read_state = ?1, updated_at_unix = ?2 WHERE path = ?3",
                params![state.as_str(), unix_timestamp()?, key],
            )
            .with_context(|| format!("failed to update read state of {key}"))?;
        Ok(updated > 0)
    }

    /// Delete rows for articles whose files are gone. Returns the removed paths.
    pub fn prune_missing<F>(&mut self, fs: &F) -> Result<Vec<PathBuf>>
    where
        F: ArticleFs + ?Sized,
    {
        let paths = {
            let mut statement = self
                .connection
                .prepare("SELECT path FROM articles ORDER BY path")
                .context("failed to prepare article path query")?;
            let rows = statement
                .query_map([], |row| row.get::<_, String>(0))
                .context("failed to run article path query")?;
            let mut out = Vec::new();
            for row in rows {
                out.push(PathBuf::from(row.context("failed to decode article path")?));
            }
            out
        };

        let mut missing = Vec::new();
        for path in paths {
            let live = fs
                .is_article_live(&path)
                .with_context(|| format!("failed to check {}", path.display()))?;
            if !live {
                missing.push(path);
            }
        }
        if missing.is_empty() {
            return Ok(missing);
        }

        let transaction = self
            .connection
            .transaction()
            .context("failed to start prune transaction")?;
        for path in &missing {
            let key = path_key(path)?;
            transaction
                .execute("DELETE FROM article_tags WHERE article_path = ?1", [key])
                .with_context(|| format!("failed to delete tags of {key}"))?;
            transaction
                .execute("DELETE FROM articles WHERE path = ?1", [key])
                .with_context(|| format!("failed to delete {key}"))?;
            debug!(path = %path.display(), "removed missing article from catalog");
        }
        transaction
            .commit()
            .context("failed to commit prune transaction")?;
        Ok(missing)
    }

    /// Mirror configured tag definitions into the catalog. A definition whose
    /// properties changed loses its assignments so the tagger re-evaluates it;
    /// a definition no longer configured is removed along with its assignments.
    pub fn sync_tag_definitions(
        &mut self,
        definitions: &BTreeMap<TagName, TagDefinition>,
    ) -> Result<TagSyncReport> {
        let now = unix_timestamp()?;
        let transaction = self
            .connection
            .transaction()
            .context("failed to start tag sync transaction")?;

        let existing: BTreeMap<String, String> = {
            let mut statement = transaction
                .prepare("SELECT name, property_hash FROM tag_definitions")
                .context("failed to prepare tag definition query")?;
            let rows = statement
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .context("failed to run tag definition query")?;
            let mut out = BTreeMap::new();
            for row in rows {
                let (name, hash) = row.context("failed to decode tag definition row")?;
                out.insert(name, hash);
            }
            out
        };

        let mut report = TagSyncReport::default();
        for (name, definition) in definitions {
            let hash = tag_property_hash(definition);
            let criteria = &definition.applies_to;
            let all_tags = encode_tag_list(&criteria.all_tags)?;
            let any_tags = encode_tag_list(&criteria.any_tags)?;
            let not_any_tags = encode_tag_list(&criteria.not_any_tags)?;

            match existing.get(name.as_str()) {
                Some(stored) if *stored == hash => {}
                Some(_) => {
                    transaction
                        .execute(
                            "UPDATE tag_definitions
                             SET description = ?1, use_summary = ?2, all_tags = ?3,
                                 any_tags = ?4, not_any_tags = ?5,
                                 property_hash = ?6, updated_at_unix = ?7
                             WHERE name = ?8",
                            params![
                                definition.description,
                                i64::from(definition.use_summary),
                                all_tags,
                                any_tags,
                                not_any_tags,
                                hash,
                                now,
                                name.as_str()
                            ],
                        )
                        .with_context(|| format!("failed to update tag definition {name}"))?;
                    report.cleared_assignments += transaction
                        .execute("DELETE FROM article_tags WHERE tag_name = ?1", [name.as_str()])
                        .with_context(|| format!("failed to clear assignments of {name}"))?;
                    report.updated += 1;
                    debug!(tag = %name, "tag definition changed; cleared assignments");
                }
                None => {
                    transaction
                        .execute(
                            "INSERT INTO tag_definitions
                                (name, description, use_summary, all_tags, any_tags,
                                 not_any_tags, property_hash, updated_at_unix)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                            params![
                                name.as_str(),
                                definition.description,
                                i64::from(definition.use_summary),
                                all_tags,
                                any_tags,
                                not_any_tags,
                                hash,
                                now
                            ],
                        )
                        .with_context(|| format!("failed to insert tag definition {name}"))?;
                    report.added += 1;
                }
            }
        }

        for name in existing.keys() {
            if definitions.contains_key(name.as_str()) {
                continue;
            }
            report.cleared_assignments += transaction
                .execute("DELETE FROM article_tags WHERE tag_name = ?1", [name])
                .with_context(|| format!("failed to clear assignments of {name}"))?;
            transaction
                .execute("DELETE FROM tag_definitions WHERE name = ?1", [name])
                .with_context(|| format!("failed to delete tag definition {name}"))?;
            report.removed += 1;
            debug!(tag = %name, "removed tag definition no longer configured");
        }

        transaction
            .commit()
            .context("failed to commit tag sync transaction")?;
        Ok(report)
    }

    fn has_tag_definition(&self, tag: &TagName) -> Result<bool> {
        let exists: i64 = self
            .connection
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM tag_definitions WHERE name = ?1)",
                [tag.as_str()],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to look up tag definition {tag}"))?;
        Ok(exists == 1)
    }

    pub fn article_count(&self) -> Result<usize> {
        let count: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))
            .context("failed to count articles")?;
        usize::try_from(count).context("article count does not fit into usize")
    }

    /// Carried assignments per configured tag, including tags with none.
    pub fn tag_counts(&self) -> Result<BTreeMap<String, usize>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT t.name, COUNT(at.article_path)
                 FROM tag_definitions t
                 LEFT JOIN article_tags at ON at.tag_name = t.name AND at.matches = 1
                 GROUP BY t.name
                 ORDER BY t.name",
            )
            .context("failed to prepare tag count query")?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .context("failed to run tag count query")?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (name, count) = row.context("failed to decode tag count row")?;
            out.insert(
                name,
                usize::try_from(count).context("tag count does not fit into usize")?,
            );
        }
        Ok(out)
    }
}

/// Upsert every scanned file and drop catalog rows whose files vanished.
///
/// A `hidden` or `deleted` state set by the user survives rescans; otherwise
/// the state observed on disk wins.
pub fn ingest_scan<F>(catalog: &mut Catalog, scanned: &[ScannedArticle], fs: &F) -> Result<IngestReport>
where
    F: ArticleFs + ?Sized,
{
    let existing: BTreeMap<PathBuf, Article> = catalog
        .snapshot()?
        .into_iter()
        .map(|article| (article.path.clone(), article))
        .collect();

    let mut report = IngestReport {
        scanned: scanned.len(),
        ..IngestReport::default()
    };
    for item in scanned {
        let previous = existing.get(&item.path);
        let read_state = match previous {
            Some(article) if article.read_state.is_user_set() => article.read_state,
            _ => item.read_state,
        };
        let unchanged = previous.is_some_and(|article| {
            article.format == item.format
                && article.read_state == read_state
                && article.content_hash.as_deref() == Some(item.content_hash.as_str())
        });
        if unchanged {
            continue;
        }

        let outcome = catalog.upsert_article(&NewArticle {
            path: item.path.clone(),
            format: item.format,
            read_state,
            summary: None,
            source_url: None,
            content_hash: Some(item.content_hash.clone()),
        })?;
        match outcome {
            UpsertOutcome::Inserted => report.added += 1,
            UpsertOutcome::Updated => report.updated += 1,
        }
    }

    report.removed = catalog.prune_missing(fs)?.len();
    info!(
        scanned = report.scanned,
        added = report.added,
        updated = report.updated,
        removed = report.removed,
        "catalog scan complete"
    );
    Ok(report)
}

/// SHA-256 over everything that decides where a tag applies. Clauses are
/// joined in sorted order so equal definitions hash equally.
pub fn tag_property_hash(definition: &TagDefinition) -> String {
    let joined = |tags: &TagSet| tags.iter().map(TagName::as_str).collect::<Vec<_>>().join("|");
    let criteria = &definition.applies_to;
    let property = format!(
        "{}|{}|{}|{}|{}",
        definition.description,
        definition.use_summary,
        joined(&criteria.any_tags),
        joined(&criteria.all_tags),
        joined(&criteria.not_any_tags),
    );
    let mut hasher = Sha256::new();
    hasher.update(property.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn encode_tag_list(tags: &TagSet) -> Result<String> {
    serde_json::to_string(&tags.iter().map(TagName::as_str).collect::<Vec<_>>())
        .context("failed to encode tag list")
}

struct ArticleRow {
    path: String,
    format: String,
    read_state: String,
    summary: Option<String>,
    source_url: Option<String>,
    content_hash: Option<String>,
}

impl ArticleRow {
    fn into_article(self) -> Result<Article> {
        let format = self
            .format
            .parse::<ArticleFormat>()
            .with_context(|| format!("catalog row {} has an invalid format", self.path))?;
        let read_state = self
            .read_state
            .parse::<ReadState>()
            .with_context(|| format!("catalog row {} has an invalid read state", self.path))?;
        Ok(Article {
            path: PathBuf::from(self.path),
            format,
            tags: BTreeSet::new(),
            read_state,
            summary: self.summary,
            source_url: self.source_url,
            content_hash: self.content_hash,
        })
    }
}

fn read_article_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArticleRow> {
    Ok(ArticleRow {
        path: row.get(0)?,
        format: row.get(1)?,
        read_state: row.get(2)?,
        summary: row.get(3)?,
        source_url: row.get(4)?,
        content_hash: row.get(5)?,
    })
}

fn stored_tag_name(name: &str) -> Result<TagName> {
    TagName::new(name).with_context(|| format!("catalog holds an invalid tag name {name:?}"))
}

fn path_key(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow::anyhow!("article path is not valid UTF-8: {}", path.display()))
}

fn unix_timestamp() -> Result<i64> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock error")?
        .as_secs();
    i64::try_from(seconds).context("timestamp does not fit into i64")
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::filesystem::LocalFs;
    use crate::model::tag_set;
    use crate::predicate::TagCriteria;

    pub(crate) fn definitions(names: &[&str]) -> BTreeMap<TagName, TagDefinition> {
        names
            .iter()
            .map(|name| {
                let tag = TagName::new(name).expect("tag");
                (
                    tag.clone(),
                    TagDefinition {
                        name: tag,
                        description: format!("{name} articles"),
                        use_summary: true,
                        applies_to: TagCriteria::default(),
                    },
                )
            })
            .collect()
    }

    pub(crate) fn new_article(path: &Path, format: ArticleFormat) -> NewArticle {
        NewArticle {
            path: path.to_path_buf(),
            format,
            read_state: ReadState::Unread,
            summary: None,
            source_url: None,
            content_hash: None,
        }
    }

    fn tag(name: &str) -> TagName {
        TagName::new(name).expect("tag")
    }

    #[test]
    fn open_requires_existing_migrated_catalog() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("data").join("catalog.db");
        let missing = Catalog::open(&db_path).err().expect("must fail");
        assert!(missing.to_string().contains("catalog database not found"));

        fs::create_dir_all(db_path.parent().expect("parent")).expect("data dir");
        Connection::open(&db_path).expect("create empty db");
        let unmigrated = Catalog::open(&db_path).err().expect("must fail");
        assert!(unmigrated.to_string().contains("has no schema"));

        Catalog::open_or_create(&db_path).expect("create");
        Catalog::open(&db_path).expect("open migrated");
    }

    #[test]
    fn upsert_preserves_summary_and_reports_outcome() {
        let temp = tempdir().expect("tempdir");
        let catalog = Catalog::open_or_create(&temp.path().join("catalog.db")).expect("catalog");
        let path = temp.path().join("a.pdf");

        let mut first = new_article(&path, ArticleFormat::Pdf);
        first.summary = Some("A paper about markets".to_string());
        first.source_url = Some("https://example.org/a".to_string());
        assert_eq!(
            catalog.upsert_article(&first).expect("insert"),
            UpsertOutcome::Inserted
        );

        let mut second = new_article(&path, ArticleFormat::Pdf);
        second.read_state = ReadState::Read;
        second.content_hash = Some("abc".to_string());
        assert_eq!(
            catalog.upsert_article(&second).expect("update"),
            UpsertOutcome::Updated
        );

        let stored = catalog.get_article(&path).expect("get").expect("present");
        assert_eq!(stored.summary.as_deref(), Some("A paper about markets"));
        assert_eq!(stored.source_url.as_deref(), Some("https://example.org/a"));
        assert_eq!(stored.content_hash.as_deref(), Some("abc"));
        assert_eq!(stored.read_state, ReadState::Read);
        assert_eq!(catalog.article_count().expect("count"), 1);
        assert!(catalog
            .get_article(&temp.path().join("missing.pdf"))
            .expect("get")
            .is_none());
    }

    #[test]
    fn search_applies_all_filters() {
        let temp = tempdir().expect("tempdir");
        let mut catalog =
            Catalog::open_or_create(&temp.path().join("catalog.db")).expect("catalog");
        catalog
            .sync_tag_definitions(&definitions(&["infofi", "ai"]))
            .expect("sync");

        let a = temp.path().join("a.epub");
        let b = temp.path().join("b.pdf");
        let c = temp.path().join("c.html");
        catalog.upsert_article(&new_article(&a, ArticleFormat::Epub)).expect("a");
        catalog.upsert_article(&new_article(&b, ArticleFormat::Pdf)).expect("b");
        catalog.upsert_article(&new_article(&c, ArticleFormat::Html)).expect("c");
        catalog.set_tag(&a, &tag("infofi"), true).expect("tag a");
        catalog.set_tag(&b, &tag("infofi"), true).expect("tag b");
        catalog.set_tag(&b, &tag("ai"), true).expect("tag b ai");
        catalog.set_tag(&c, &tag("infofi"), false).expect("evaluated c");
        catalog.set_read_state(&c, ReadState::Read).expect("read c");

        let query = ListQuery {
            criteria: TagCriteria {
                any_tags: tag_set(["infofi"]).expect("tags"),
                ..Default::default()
            },
            formats: [
                ArticleFormat::Epub,
                ArticleFormat::Mobi,
                ArticleFormat::Html,
                ArticleFormat::Mhtml,
            ]
            .into_iter()
            .collect(),
            read_state: None,
        };
        let found: Vec<_> = catalog
            .search(&query)
            .expect("search")
            .into_iter()
            .map(|article| article.path)
            .collect();
        assert_eq!(found, vec![a.clone()]);

        let read_only = ListQuery {
            read_state: Some(ReadState::Read),
            ..ListQuery::default()
        };
        let found = catalog.search(&read_only).expect("search");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, c);
        assert!(found[0].tags.is_empty());

        let snapshot = catalog.snapshot().expect("snapshot");
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot[1].has_tag("ai"));
    }

    #[test]
    fn set_tag_requires_known_article_and_definition() {
        let temp = tempdir().expect("tempdir");
        let mut catalog =
            Catalog::open_or_create(&temp.path().join("catalog.db")).expect("catalog");
        let path = temp.path().join("a.epub");

        let error = catalog.set_tag(&path, &tag("ai"), true).expect_err("no article");
        assert!(error.to_string().contains("article not in catalog"));

        catalog.upsert_article(&new_article(&path, ArticleFormat::Epub)).expect("insert");
        let error = catalog.set_tag(&path, &tag("ai"), true).expect_err("no definition");
        assert!(error.to_string().contains("sync-tags"));

        catalog.sync_tag_definitions(&definitions(&["ai"])).expect("sync");
        catalog.set_tag(&path, &tag("ai"), true).expect("tag");
        assert!(catalog.remove_tag(&path, &tag("ai")).expect("untag"));
        assert!(!catalog.remove_tag(&path, &tag("ai")).expect("untag again"));
    }

    #[test]
    fn sync_tag_definitions_clears_changed_and_removed_tags() {
        let temp = tempdir().expect("tempdir");
        let mut catalog =
            Catalog::open_or_create(&temp.path().join("catalog.db")).expect("catalog");
        let path = temp.path().join("a.epub");
        catalog.upsert_article(&new_article(&path, ArticleFormat::Epub)).expect("insert");

        let mut defs = definitions(&["ai", "crypto", "infofi"]);
        let first = catalog.sync_tag_definitions(&defs).expect("first sync");
        assert_eq!(first.added, 3);

        for name in ["ai", "crypto", "infofi"] {
            catalog.set_tag(&path, &tag(name), true).expect("tag");
        }

        let unchanged = catalog.sync_tag_definitions(&defs).expect("noop sync");
        assert_eq!(unchanged, TagSyncReport::default());

        defs.get_mut("ai").expect("ai").description = "Machine learning".to_string();
        defs.remove("crypto");
        let second = catalog.sync_tag_definitions(&defs).expect("second sync");
        assert_eq!(second.added, 0);
        assert_eq!(second.updated, 1);
        assert_eq!(second.removed, 1);
        assert_eq!(second.cleared_assignments, 2);

        let article = catalog.get_article(&path).expect("get").expect("present");
        assert_eq!(article.tags, tag_set(["infofi"]).expect("tags"));
        let counts = catalog.tag_counts().expect("counts");
        assert_eq!(counts.get("ai"), Some(&0));
        assert_eq!(counts.get("infofi"), Some(&1));
        assert!(!counts.contains_key("crypto"));
    }

    #[test]
    fn ingest_scan_adds_updates_and_prunes() {
        let temp = tempdir().expect("tempdir");
        let mut catalog =
            Catalog::open_or_create(&temp.path().join("catalog.db")).expect("catalog");
        let kept = temp.path().join("kept.epub");
        let gone = temp.path().join("gone.pdf");
        fs::write(&kept, "kept").expect("kept");
        catalog.upsert_article(&new_article(&gone, ArticleFormat::Pdf)).expect("gone");
        let mut hidden = new_article(&kept, ArticleFormat::Epub);
        hidden.read_state = ReadState::Hidden;
        catalog.upsert_article(&hidden).expect("hidden");

        let scanned = vec![ScannedArticle {
            path: kept.clone(),
            format: ArticleFormat::Epub,
            read_state: ReadState::Unread,
            content_hash: "h1".to_string(),
        }];
        let report = ingest_scan(&mut catalog, &scanned, &LocalFs).expect("ingest");
        assert_eq!(
            report,
            IngestReport {
                scanned: 1,
                added: 0,
                updated: 1,
                removed: 1,
            }
        );
        let stored = catalog.get_article(&kept).expect("get").expect("present");
        assert_eq!(stored.read_state, ReadState::Hidden);
        assert!(!catalog.contains(&gone).expect("contains"));

        let again = ingest_scan(&mut catalog, &scanned, &LocalFs).expect("ingest again");
        assert_eq!(again.updated, 0);
        assert_eq!(again.added, 0);
    }

    #[test]
    fn property_hash_covers_every_applicability_clause() {
        let defs = definitions(&["ai_safety"]);
        let base = defs.values().next().expect("definition").clone();
        assert_eq!(tag_property_hash(&base), tag_property_hash(&base.clone()));

        let narrowings = [
            TagCriteria {
                any_tags: tag_set(["ai"]).expect("tags"),
                ..TagCriteria::default()
            },
            TagCriteria {
                all_tags: tag_set(["ai"]).expect("tags"),
                ..TagCriteria::default()
            },
            TagCriteria {
                not_any_tags: tag_set(["ai"]).expect("tags"),
                ..TagCriteria::default()
            },
        ];
        let mut hashes: BTreeSet<String> = BTreeSet::from([tag_property_hash(&base)]);
        for applies_to in narrowings {
            let narrowed = TagDefinition {
                applies_to,
                ..base.clone()
            };
            hashes.insert(tag_property_hash(&narrowed));
        }
        assert_eq!(hashes.len(), 4);
    }

    #[test]
    fn changing_all_tags_clause_clears_assignments() {
        let temp = tempdir().expect("tempdir");
        let mut catalog = Catalog::open_or_create(&temp.path().join("catalog.db")).expect("catalog");
        let mut defs = definitions(&["ai", "ai_policy"]);
        catalog.sync_tag_definitions(&defs).expect("sync");
        let path = temp.path().join("paper.epub");
        catalog
            .upsert_article(&new_article(&path, ArticleFormat::Epub))
            .expect("upsert");
        catalog
            .set_tag(&path, &TagName::new("ai_policy").expect("tag"), true)
            .expect("tag");

        defs.get_mut("ai_policy").expect("policy").applies_to.all_tags =
            tag_set(["ai"]).expect("tags");
        let report = catalog.sync_tag_definitions(&defs).expect("resync");
        assert_eq!(report.updated, 1);
        assert_eq!(report.cleared_assignments, 1);

        let stored: String = catalog
            .connection
            .query_row(
                "SELECT all_tags FROM tag_definitions WHERE name = 'ai_policy'",
                [],
                |row| row.get(0),
            )
            .expect("stored clause");
        assert_eq!(stored, r#"["ai"]"#);
    }
}
