//! On-disk reading list files.
//!
//! A list file is UTF-8 text with one path per line. The reader app may keep a
//! metadata header at the top (lines starting with `:`) and may append
//! tab-separated display columns to entries; both are tolerated on read and the
//! header is written back untouched.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::config::ValidatedConfig;
use crate::error::CurateError;
use crate::model::ArticleFormat;

const HEADER_MARKER: char = ':';
const CONFLICT_INFIX: &str = ".sync-conflict-";
/// Mode of a newly created list file; rewrites keep the existing file's mode.
#[cfg(unix)]
const NEW_LIST_MODE: u32 = 0o644;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFile {
    pub header: Vec<String>,
    pub entries: Vec<PathBuf>,
}

impl ListFile {
    pub fn parse(text: &str) -> Self {
        let lines: Vec<&str> = text
            .lines()
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .collect();

        let header_len = if lines
            .get(1)
            .is_some_and(|line| line.starts_with(HEADER_MARKER))
        {
            lines
                .iter()
                .rposition(|line| line.starts_with(HEADER_MARKER))
                .map_or(0, |last| last + 1)
        } else {
            0
        };

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for line in &lines[header_len..] {
            let path = line.split('\t').next().unwrap_or_default().trim();
            if path.is_empty() {
                continue;
            }
            if seen.insert(path) {
                entries.push(PathBuf::from(path));
            }
        }

        Self {
            header: lines[..header_len]
                .iter()
                .map(|line| (*line).to_string())
                .collect(),
            entries,
        }
    }

    pub fn render(&self) -> String {
        self.render_entries(|_| None)
    }

    /// Like [`ListFile::render`], with the reader's display column after each
    /// path: a format indicator and the file stem as title.
    pub fn render_with_display_columns(&self) -> String {
        self.render_entries(|entry| {
            let title = entry.file_stem()?.to_string_lossy();
            Some(format!("{} {title}", format_indicator(entry)))
        })
    }

    fn render_entries<F>(&self, column: F) -> String
    where
        F: Fn(&Path) -> Option<String>,
    {
        let mut out = String::new();
        for line in &self.header {
            out.push_str(line);
            out.push('\n');
        }
        for entry in &self.entries {
            out.push_str(&entry.to_string_lossy());
            if let Some(text) = column(entry.as_path()) {
                out.push('\t');
                out.push_str(&text);
            }
            out.push('\n');
        }
        out
    }
}

fn format_indicator(path: &Path) -> &'static str {
    match ArticleFormat::from_path(path) {
        Some(ArticleFormat::Pdf) => "!",
        Some(ArticleFormat::Epub | ArticleFormat::Mobi) => "#",
        Some(ArticleFormat::Html | ArticleFormat::Mhtml) => "*",
        _ => "",
    }
}

/// Maps article paths between this machine and the reader device, which sees
/// the article folder under a different root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    local_root: PathBuf,
    reader_root: Option<PathBuf>,
}

impl PathMapping {
    pub fn new(local_root: impl Into<PathBuf>, reader_root: Option<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            reader_root,
        }
    }

    pub fn from_config(config: &ValidatedConfig) -> Self {
        Self::new(config.article_dir.clone(), config.reader_root.clone())
    }

    pub fn to_reader(&self, path: &Path) -> PathBuf {
        match &self.reader_root {
            Some(reader_root) => swap_root(path, &self.local_root, reader_root),
            None => path.to_path_buf(),
        }
    }

    pub fn to_local(&self, path: &Path) -> PathBuf {
        match &self.reader_root {
            Some(reader_root) => swap_root(path, reader_root, &self.local_root),
            None => path.to_path_buf(),
        }
    }
}

fn swap_root(path: &Path, from: &Path, to: &Path) -> PathBuf {
    match path.strip_prefix(from) {
        Ok(rest) => to.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// `Ok(None)` when the file does not exist.
pub fn read_list(path: &Path) -> Result<Option<ListFile>, CurateError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(ListFile::parse(&text))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(CurateError::filesystem(path, err)),
    }
}

/// Replace `path` with `contents` through a temp file in the same directory.
/// Returns `false` without touching the file when it already holds `contents`.
pub fn write_list_atomic(path: &Path, contents: &str) -> Result<bool, CurateError> {
    match fs::read(path) {
        Ok(existing) if existing == contents.as_bytes() => return Ok(false),
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(CurateError::filesystem(path, err)),
    }

    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| CurateError::filesystem(parent, err))?;

    let permissions = list_permissions(path)?;
    let mut temp = NamedTempFile::new_in(parent).map_err(|err| CurateError::filesystem(parent, err))?;
    if let Some(permissions) = permissions {
        temp.as_file()
            .set_permissions(permissions)
            .map_err(|err| CurateError::filesystem(temp.path(), err))?;
    }
    temp.write_all(contents.as_bytes())
        .and_then(|()| temp.flush())
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|err| CurateError::filesystem(temp.path(), err))?;
    temp.persist(path)
        .map_err(|err| CurateError::filesystem(path, err.error))?;
    Ok(true)
}

/// Permissions the written list should end up with. Temp files are created
/// owner-only, so they are widened to match the file being replaced.
fn list_permissions(path: &Path) -> Result<Option<fs::Permissions>, CurateError> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.permissions())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(new_list_permissions()),
        Err(err) => Err(CurateError::filesystem(path, err)),
    }
}

#[cfg(unix)]
fn new_list_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(NEW_LIST_MODE))
}

#[cfg(not(unix))]
fn new_list_permissions() -> Option<fs::Permissions> {
    None
}

/// Drop every entry but keep the header. Returns whether the file changed.
pub fn clear_list(path: &Path) -> Result<bool, CurateError> {
    let Some(mut list) = read_list(path)? else {
        return Ok(false);
    };
    list.entries.clear();
    write_list_atomic(path, &list.render())
}

/// Returns whether a file was removed.
pub fn remove_list(path: &Path) -> Result<bool, CurateError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(CurateError::filesystem(path, err)),
    }
}

/// Sync-conflict copies of `list_path` left by the file synchroniser:
/// `<name>.sync-conflict-<stamp>.<ext>` in the same directory, sorted by name.
pub fn conflict_copies(list_path: &Path) -> Result<Vec<PathBuf>, CurateError> {
    let (Some(dir), Some(stem), Some(extension)) = (
        list_path.parent(),
        list_path.file_stem().and_then(|stem| stem.to_str()),
        list_path.extension().and_then(|ext| ext.to_str()),
    ) else {
        return Ok(Vec::new());
    };
    let prefix = format!("{stem}{CONFLICT_INFIX}");
    let suffix = format!(".{extension}");

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(CurateError::filesystem(dir, err)),
    };

    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| CurateError::filesystem(dir, err))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(&prefix) && name.ends_with(&suffix) && name.len() > prefix.len() + suffix.len() {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}
