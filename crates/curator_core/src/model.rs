use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleFormat {
    Pdf,
    Epub,
    Mobi,
    Azw3,
    Html,
    Mhtml,
    Djvu,
    Txt,
}

impl ArticleFormat {
    pub const ALL: [ArticleFormat; 8] = [
        Self::Pdf,
        Self::Epub,
        Self::Mobi,
        Self::Azw3,
        Self::Html,
        Self::Mhtml,
        Self::Djvu,
        Self::Txt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Epub => "epub",
            Self::Mobi => "mobi",
            Self::Azw3 => "azw3",
            Self::Html => "html",
            Self::Mhtml => "mhtml",
            Self::Djvu => "djvu",
            Self::Txt => "txt",
        }
    }

    /// Format implied by the file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        extension.parse().ok()
    }
}

impl FromStr for ArticleFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_start_matches('.').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownFormat(value.to_string()))
    }
}

impl fmt::Display for ArticleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadState {
    #[default]
    Unread,
    Read,
    Hidden,
    Deleted,
}

impl ReadState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::Read => "read",
            Self::Hidden => "hidden",
            Self::Deleted => "deleted",
        }
    }

    /// States set by the user that a filesystem scan must not overwrite.
    pub fn is_user_set(self) -> bool {
        matches!(self, Self::Hidden | Self::Deleted)
    }
}

impl FromStr for ReadState {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unread" => Ok(Self::Unread),
            "read" => Ok(Self::Read),
            "hidden" => Ok(Self::Hidden),
            "deleted" => Ok(Self::Deleted),
            _ => Err(ConfigError::UnknownReadState(value.to_string())),
        }
    }
}

impl fmt::Display for ReadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated tag identifier. Tag names are an open set, so they stay strings,
/// but they never carry surrounding whitespace or control characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TagName(String);

impl TagName {
    pub fn new(value: &str) -> Result<Self, ConfigError> {
        let trimmed = value.trim();
        if trimmed.is_empty()
            || trimmed.len() != value.len()
            || trimmed.chars().any(char::is_control)
        {
            return Err(ConfigError::InvalidTagName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TagName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TagName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type TagSet = BTreeSet<TagName>;

/// One document file tracked by the catalog. `path` is the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    pub path: PathBuf,
    pub format: ArticleFormat,
    pub tags: TagSet,
    pub read_state: ReadState,
    pub summary: Option<String>,
    pub source_url: Option<String>,
    pub content_hash: Option<String>,
}

impl Article {
    pub fn new(path: impl Into<PathBuf>, format: ArticleFormat) -> Self {
        Self {
            path: path.into(),
            format,
            tags: TagSet::new(),
            read_state: ReadState::Unread,
            summary: None,
            source_url: None,
            content_hash: None,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

pub fn tag_set<I, S>(names: I) -> Result<TagSet, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| TagName::new(name.as_ref()))
        .collect()
}
