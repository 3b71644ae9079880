use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::CurateError;
use crate::filesystem::ArticleFs;
use crate::model::{Article, ArticleFormat};
use crate::predicate::ListQuery;

/// One qualifying list entry. `output` differs from `source` when a converted
/// sibling is listed in place of the catalogued file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub source: PathBuf,
    pub source_format: ArticleFormat,
    pub output: PathBuf,
}

impl ResolvedEntry {
    pub fn is_rewritten(&self) -> bool {
        self.source != self.output
    }

    /// Every path this article can be listed under: the catalogued file and,
    /// for a PDF, its EPUB sibling whether or not that exists right now.
    pub fn renditions(&self) -> Vec<PathBuf> {
        let mut out = vec![self.source.clone()];
        if self.source_format == ArticleFormat::Pdf {
            out.push(self.source.with_extension(ArticleFormat::Epub.as_str()));
        }
        out
    }
}

/// The rendition a reader should get for `article`: a PDF with an EPUB next to
/// it is listed as the EPUB.
pub fn preferred_rendition<F>(article: &Article, fs: &F) -> io::Result<(PathBuf, ArticleFormat)>
where
    F: ArticleFs + ?Sized,
{
    if article.format == ArticleFormat::Pdf
        && let Some(epub) = fs.sibling_with_extension(&article.path, ArticleFormat::Epub.as_str())?
    {
        return Ok((epub, ArticleFormat::Epub));
    }
    Ok((article.path.clone(), article.format))
}

/// Qualifying entries for one list, in `articles` order with duplicate output
/// paths dropped.
///
/// Articles whose files are gone never qualify. The format filter is checked
/// against the preferred rendition first and falls back to the catalogued file,
/// so a pdf-only list still lists PDFs that also have an EPUB.
pub fn resolve_membership<F>(
    articles: &[Article],
    query: &ListQuery,
    fs: &F,
) -> Result<Vec<ResolvedEntry>, CurateError>
where
    F: ArticleFs + ?Sized,
{
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut out = Vec::new();

    for article in articles {
        if !query.admits_tags_and_state(article) {
            continue;
        }
        if !is_live(fs, &article.path)? {
            debug!(path = %article.path.display(), "skipping article missing on disk");
            continue;
        }

        let (preferred, preferred_format) = preferred_rendition(article, fs)
            .map_err(|err| CurateError::filesystem(&article.path, err))?;
        let output = if query.admits_format(preferred_format) {
            preferred
        } else if query.admits_format(article.format) {
            article.path.clone()
        } else {
            continue;
        };

        if !seen.insert(output.clone()) {
            continue;
        }
        out.push(ResolvedEntry {
            source: article.path.clone(),
            source_format: article.format,
            output,
        });
    }
    Ok(out)
}

fn is_live<F>(fs: &F, path: &Path) -> Result<bool, CurateError>
where
    F: ArticleFs + ?Sized,
{
    fs.is_article_live(path)
        .map_err(|err| CurateError::filesystem(path, err))
}
