use std::path::Path;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::warn;

use crate::catalog::Catalog;
use crate::config::{TagDefinition, ValidatedConfig};
use crate::model::{TagName, TagSet};
use crate::predicate::prerequisites_met;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TagEditReport {
    pub applied: Vec<TagName>,
    pub already_present: Vec<TagName>,
    /// Tags whose applicability clauses the article does not satisfy.
    pub skipped: Vec<TagName>,
}

/// Assign configured tags to a catalogued article by hand.
///
/// Each tag's `all_tags` / `any_tags` / `not_any_tags` clauses are checked
/// against the tags the article carries at that point, including ones applied
/// earlier in the same call, so tags given together may satisfy each other's
/// prerequisites regardless of argument order. With `force`, the clauses are
/// ignored.
pub fn apply_manual_tags(
    catalog: &Catalog,
    config: &ValidatedConfig,
    path: &Path,
    tags: &[String],
    force: bool,
) -> Result<TagEditReport> {
    let mut pending: Vec<&TagDefinition> = Vec::with_capacity(tags.len());
    for name in tags {
        let definition = config.tag(name)?;
        if !pending.iter().any(|seen| seen.name == definition.name) {
            pending.push(definition);
        }
    }

    let Some(article) = catalog.get_article(path)? else {
        bail!("article not in catalog: {}", path.display());
    };
    let mut carried = article.tags;
    let mut report = TagEditReport::default();

    pending.retain(|definition| {
        if carried.contains(&definition.name) {
            report.already_present.push(definition.name.clone());
            return false;
        }
        true
    });

    // One at a time: an assignment can satisfy a later tag's clauses or, through
    // `not_any_tags`, rule it out.
    while let Some(index) = pending
        .iter()
        .position(|definition| force || prerequisites_met(definition, &carried))
    {
        let definition = pending.remove(index);
        catalog.set_tag(path, &definition.name, true)?;
        carried.insert(definition.name.clone());
        report.applied.push(definition.name.clone());
    }

    for definition in pending {
        let criteria = &definition.applies_to;
        fn names(tags: &TagSet) -> Vec<&str> {
            tags.iter().map(TagName::as_str).collect()
        }
        warn!(
            path = %path.display(),
            tag = %definition.name,
            all_tags = ?names(&criteria.all_tags),
            any_tags = ?names(&criteria.any_tags),
            not_any_tags = ?names(&criteria.not_any_tags),
            "skipping tag the article does not qualify for; pass --force to assign anyway"
        );
        report.skipped.push(definition.name.clone());
    }
    Ok(report)
}

/// Remove tag assignments. Returns the tags that were actually assigned.
pub fn remove_manual_tags(
    catalog: &Catalog,
    config: &ValidatedConfig,
    path: &Path,
    tags: &[String],
) -> Result<Vec<TagName>> {
    let mut removed = Vec::new();
    for name in tags {
        let definition = config.tag(name)?;
        if catalog.remove_tag(path, &definition.name)? {
            removed.push(definition.name.clone());
        }
    }
    Ok(removed)
}
