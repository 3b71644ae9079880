use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::{DirEntry, WalkDir};

use crate::config::CatalogSettings;
use crate::model::{ArticleFormat, ReadState};

const HASH_WINDOW_BYTES: u64 = 4096;

/// Filesystem facts the list pipeline depends on.
pub trait ArticleFs {
    /// An article whose file is gone is logically deleted. `NotFound` is a
    /// plain `false`; any other failure is surfaced.
    fn is_article_live(&self, path: &Path) -> io::Result<bool>;

    /// `<dir>/<stem>.<extension>` next to `path`, if that file is live.
    fn sibling_with_extension(&self, path: &Path, extension: &str) -> io::Result<Option<PathBuf>> {
        let sibling = path.with_extension(extension);
        if sibling == path {
            return Ok(None);
        }
        Ok(self.is_article_live(&sibling)?.then_some(sibling))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl ArticleFs for LocalFs {
    fn is_article_live(&self, path: &Path) -> io::Result<bool> {
        match fs::metadata(path) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScannedArticle {
    pub path: PathBuf,
    pub format: ArticleFormat,
    pub read_state: ReadState,
    pub content_hash: String,
}

/// Walk the article folder and collect every ingestible document, sorted by path.
///
/// Files inside dot-folders and files whose names contain a skip substring are
/// ignored. A dot-prefixed file name marks the article as read, since the
/// reader app hides read files that way.
pub fn scan_article_dir(article_dir: &Path, settings: &CatalogSettings) -> Result<Vec<ScannedArticle>> {
    let mut out = Vec::new();
    if !article_dir.exists() {
        return Ok(out);
    }

    let walker = WalkDir::new(article_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden_dir(entry));
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", article_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if settings
            .file_names_to_skip
            .iter()
            .any(|skip| file_name.contains(skip.as_str()))
        {
            continue;
        }
        let Some(format) = ArticleFormat::from_path(path) else {
            continue;
        };
        if !settings.doc_formats.contains(&format) {
            continue;
        }

        let read_state = if file_name.starts_with('.') {
            ReadState::Read
        } else {
            ReadState::Unread
        };
        out.push(ScannedArticle {
            path: path.to_path_buf(),
            format,
            read_state,
            content_hash: content_hash(path)?,
        });
    }
    out.sort_by(|left, right| left.path.cmp(&right.path));
    Ok(out)
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name().to_string_lossy().starts_with('.')
}

/// SHA-256 of the whole file when small, otherwise of a window centred in the
/// file. Cheap enough to run over large PDF folders on every scan.
pub fn content_hash(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let size = file
        .metadata()
        .with_context(|| format!("failed to inspect {}", path.display()))?
        .len();

    let mut buffer = Vec::new();
    if size < HASH_WINDOW_BYTES {
        file.read_to_end(&mut buffer)
            .with_context(|| format!("failed to read {}", path.display()))?;
    } else {
        let offset = (size - HASH_WINDOW_BYTES) / 2;
        file.seek(SeekFrom::Start(offset))
            .with_context(|| format!("failed to seek {}", path.display()))?;
        buffer.resize(HASH_WINDOW_BYTES as usize, 0);
        file.read_exact(&mut buffer)
            .with_context(|| format!("failed to read {}", path.display()))?;
    }

    let mut hasher = Sha256::new();
    hasher.update(&buffer);
    Ok(format!("{:x}", hasher.finalize()))
}
