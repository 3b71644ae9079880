use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::{ArticleFormat, ReadState, TagName, TagSet, tag_set};
use crate::predicate::{ListQuery, TagCriteria};

pub const DEFAULT_ARTICLE_DIR: &str = "articles";
pub const DEFAULT_LISTS_DIR: &str = "lists";
pub const DEFAULT_LIST_EXTENSION: &str = "rlst";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CuratorConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub article_tags: BTreeMap<String, TagDefinitionConfig>,
    #[serde(default)]
    pub lists: BTreeMap<String, ListConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PathsSection {
    pub article_dir: Option<String>,
    pub lists_dir: Option<String>,
    pub reader_root: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CatalogSection {
    #[serde(default)]
    pub doc_formats: Vec<String>,
    #[serde(default)]
    pub file_names_to_skip: Vec<String>,
    pub list_extension: Option<String>,
    /// Append `\t<indicator> <title>` display columns to list entries.
    #[serde(default)]
    pub display_columns: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TagDefinitionConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub use_summary: bool,
    #[serde(default)]
    pub all_tags: Vec<String>,
    #[serde(default)]
    pub any_tags: Vec<String>,
    #[serde(default)]
    pub not_any_tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ListConfig {
    #[serde(default)]
    pub all_tags: Vec<String>,
    #[serde(default)]
    pub any_tags: Vec<String>,
    #[serde(default)]
    pub not_any_tags: Vec<String>,
    #[serde(default)]
    pub formats: Vec<String>,
    pub read_state: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl CuratorConfig {
    /// Resolve the article folder: env CURATOR_ARTICLE_DIR > config > DEFAULT_ARTICLE_DIR.
    pub fn article_dir_owned(&self) -> String {
        if let Ok(value) = env::var("CURATOR_ARTICLE_DIR") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.paths
            .article_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_ARTICLE_DIR.to_string())
    }

    /// Resolve the lists folder: env CURATOR_LISTS_DIR > config > DEFAULT_LISTS_DIR.
    pub fn lists_dir_owned(&self) -> String {
        if let Ok(value) = env::var("CURATOR_LISTS_DIR") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.paths
            .lists_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_LISTS_DIR.to_string())
    }

    pub fn list_extension(&self) -> &str {
        self.catalog
            .list_extension
            .as_deref()
            .map(|ext| ext.trim_start_matches('.'))
            .filter(|ext| !ext.is_empty())
            .unwrap_or(DEFAULT_LIST_EXTENSION)
    }

    /// Check every cross-reference and convert to typed values. Relative paths
    /// are resolved against `project_root`.
    pub fn validate(&self, project_root: &Path) -> Result<ValidatedConfig, ConfigError> {
        let tags = validate_tag_definitions(&self.article_tags)?;

        let mut lists = BTreeMap::new();
        for (name, list) in &self.lists {
            validate_list_name(name)?;
            let spec = validate_list(name, list, &tags)?;
            lists.insert(name.clone(), spec);
        }

        let doc_formats = if self.catalog.doc_formats.is_empty() {
            ArticleFormat::ALL.into_iter().collect()
        } else {
            parse_formats(&self.catalog.doc_formats)?
        };

        Ok(ValidatedConfig {
            article_dir: absolutize(Path::new(&self.article_dir_owned()), project_root),
            lists_dir: absolutize(Path::new(&self.lists_dir_owned()), project_root),
            reader_root: self
                .paths
                .reader_root
                .as_deref()
                .map(str::trim)
                .filter(|root| !root.is_empty())
                .map(PathBuf::from),
            catalog: CatalogSettings {
                doc_formats,
                file_names_to_skip: self
                    .catalog
                    .file_names_to_skip
                    .iter()
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect(),
                list_extension: self.list_extension().to_string(),
                display_columns: self.catalog.display_columns,
            },
            tags,
            lists,
        })
    }
}

/// Load and parse a CuratorConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<CuratorConfig> {
    if !config_path.exists() {
        return Ok(CuratorConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: CuratorConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Configuration after the load-time validation pass. Built once per run and
/// handed to each component explicitly.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub article_dir: PathBuf,
    pub lists_dir: PathBuf,
    pub reader_root: Option<PathBuf>,
    pub catalog: CatalogSettings,
    pub tags: BTreeMap<TagName, TagDefinition>,
    pub lists: BTreeMap<String, ListSpec>,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub doc_formats: BTreeSet<ArticleFormat>,
    pub file_names_to_skip: Vec<String>,
    pub list_extension: String,
    pub display_columns: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagDefinition {
    pub name: TagName,
    pub description: String,
    pub use_summary: bool,
    /// Narrows which articles the tag may be assigned to, judged against the
    /// tags an article already carries.
    pub applies_to: TagCriteria,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSpec {
    pub name: String,
    pub query: ListQuery,
    pub enabled: bool,
}

impl ValidatedConfig {
    pub fn list_path(&self, list_name: &str) -> PathBuf {
        self.lists_dir
            .join(format!("{list_name}.{}", self.catalog.list_extension))
    }

    pub fn tag(&self, name: &str) -> Result<&TagDefinition, ConfigError> {
        self.tags
            .get(name)
            .ok_or_else(|| ConfigError::UnknownTag(name.to_string()))
    }

    pub fn list(&self, name: &str) -> Result<&ListSpec, ConfigError> {
        self.lists
            .get(name)
            .ok_or_else(|| ConfigError::UnknownList(name.to_string()))
    }
}

fn validate_tag_definitions(
    raw: &BTreeMap<String, TagDefinitionConfig>,
) -> Result<BTreeMap<TagName, TagDefinition>, ConfigError> {
    let declared = tag_set(raw.keys())?;

    let mut out = BTreeMap::new();
    for (name, definition) in raw {
        let tag = TagName::new(name)?;
        let clause = |clause: &'static str, values: &[String]| -> Result<TagSet, ConfigError> {
            let tags = tag_set(values)?;
            if let Some(missing) = tags.iter().find(|prereq| !declared.contains(*prereq)) {
                return Err(ConfigError::UndeclaredPrerequisite {
                    tag: name.clone(),
                    clause,
                    prerequisite: missing.to_string(),
                });
            }
            Ok(tags)
        };
        let applies_to = TagCriteria {
            all_tags: clause("all_tags", &definition.all_tags)?,
            any_tags: clause("any_tags", &definition.any_tags)?,
            not_any_tags: clause("not_any_tags", &definition.not_any_tags)?,
        };
        out.insert(
            tag.clone(),
            TagDefinition {
                name: tag,
                description: definition.description.trim().to_string(),
                use_summary: definition.use_summary,
                applies_to,
            },
        );
    }
    Ok(out)
}

fn validate_list_name(name: &str) -> Result<(), ConfigError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed.len() != name.len()
        || trimmed.starts_with('.')
        || trimmed
            .chars()
            .any(|ch| matches!(ch, '/' | '\\') || ch.is_control())
    {
        return Err(ConfigError::InvalidListName(name.to_string()));
    }
    Ok(())
}

fn validate_list(
    name: &str,
    list: &ListConfig,
    declared: &BTreeMap<TagName, TagDefinition>,
) -> Result<ListSpec, ConfigError> {
    let clause = |clause: &'static str, values: &[String]| -> Result<TagSet, ConfigError> {
        let tags = tag_set(values).map_err(|err| err.in_list(name))?;
        if let Some(missing) = tags.iter().find(|tag| !declared.contains_key(*tag)) {
            return Err(ConfigError::UndeclaredTag {
                list: name.to_string(),
                clause,
                tag: missing.to_string(),
            });
        }
        Ok(tags)
    };

    let criteria = TagCriteria {
        all_tags: clause("all_tags", &list.all_tags)?,
        any_tags: clause("any_tags", &list.any_tags)?,
        not_any_tags: clause("not_any_tags", &list.not_any_tags)?,
    };
    let formats = parse_formats(&list.formats).map_err(|err| err.in_list(name))?;
    let read_state = match list.read_state.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(
            value
                .parse::<ReadState>()
                .map_err(|err| err.in_list(name))?,
        ),
    };

    let query = ListQuery {
        criteria,
        formats,
        read_state,
    };
    if query.is_unconstrained() {
        return Err(ConfigError::EmptyListSpec {
            list: name.to_string(),
        });
    }

    Ok(ListSpec {
        name: name.to_string(),
        query,
        enabled: list.enabled,
    })
}

fn parse_formats(values: &[String]) -> Result<BTreeSet<ArticleFormat>, ConfigError> {
    values.iter().map(|value| value.parse()).collect()
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
