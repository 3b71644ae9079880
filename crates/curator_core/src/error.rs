//! Typed failures for list generation.
//!
//! Configuration problems are rejected when the config is loaded, before any
//! catalog read or list write. Catalog failures abort the whole run. Filesystem
//! failures abort only the list that hit them.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("list `{list}` references undeclared tag `{tag}` in {clause}")]
    UndeclaredTag {
        list: String,
        clause: &'static str,
        tag: String,
    },

    #[error("tag `{tag}` references undeclared tag `{prerequisite}` in {clause}")]
    UndeclaredPrerequisite {
        tag: String,
        clause: &'static str,
        prerequisite: String,
    },

    #[error("list `{list}` has no tag, format, or read-state filter")]
    EmptyListSpec { list: String },

    #[error("invalid list name `{0}`")]
    InvalidListName(String),

    #[error("unknown document format `{0}`")]
    UnknownFormat(String),

    #[error("unknown read state `{0}`")]
    UnknownReadState(String),

    #[error("invalid tag name `{0:?}`")]
    InvalidTagName(String),

    #[error("unknown tag `{0}` (declare it under [article_tags])")]
    UnknownTag(String),

    #[error("unknown list `{0}`")]
    UnknownList(String),

    #[error("{list}: {source}")]
    InList {
        list: String,
        #[source]
        source: Box<ConfigError>,
    },
}

impl ConfigError {
    pub(crate) fn in_list(self, list: &str) -> Self {
        Self::InList {
            list: list.to_string(),
            source: Box::new(self),
        }
    }
}

#[derive(Debug, Error)]
pub enum CurateError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("catalog unavailable at {path}: {message}")]
    CatalogUnavailable { path: PathBuf, message: String },

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CurateError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}
