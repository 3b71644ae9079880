//! Where a curator project lives on disk: the project root, its `.curator`
//! state directory, the catalog database and the TOML configuration.
//!
//! Flags win over environment variables, which win over discovery from the
//! working directory.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::config::{DEFAULT_ARTICLE_DIR, DEFAULT_LISTS_DIR};

pub const STATE_DIR_NAME: &str = ".curator";
pub const DB_FILENAME: &str = "catalog.db";
pub const CONFIG_FILENAME: &str = "config.toml";
pub const MIGRATIONS_POLICY_MESSAGE: &str =
    "Catalog schema is behind; run `curator db migrate` before using the catalog.";

const ENV_PROJECT_ROOT: &str = "CURATOR_PROJECT_ROOT";
const ENV_DATA_DIR: &str = "CURATOR_DATA_DIR";
const ENV_CONFIG: &str = "CURATOR_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Discovered,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Discovered => "discovered",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSources {
    pub root: ValueSource,
    pub data: ValueSource,
    pub config: ValueSource,
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub sources: PathSources,
}

impl ResolvedPaths {
    /// Default layout beneath `root`, as if it had been passed with `--project-root`.
    pub fn under_root(root: &Path) -> Self {
        let state_dir = root.join(STATE_DIR_NAME);
        let data_dir = state_dir.join("data");
        Self {
            project_root: root.to_path_buf(),
            db_path: data_dir.join(DB_FILENAME),
            config_path: state_dir.join(CONFIG_FILENAME),
            state_dir,
            data_dir,
            sources: PathSources {
                root: ValueSource::Flag,
                data: ValueSource::Default,
                config: ValueSource::Default,
            },
        }
    }

    pub fn diagnostics(&self) -> String {
        let rows = [
            ("project_root", &self.project_root, Some(self.sources.root)),
            ("state_dir", &self.state_dir, None),
            ("data_dir", &self.data_dir, Some(self.sources.data)),
            ("db_path", &self.db_path, None),
            ("config_path", &self.config_path, Some(self.sources.config)),
        ];
        let mut lines: Vec<String> = rows
            .iter()
            .map(|(label, path, source)| match source {
                Some(source) => format!(
                    "{label}: {} ({})",
                    normalize_for_display(path),
                    source.as_str()
                ),
                None => format!("{label}: {}", normalize_for_display(path)),
            })
            .collect();
        lines.push(format!("migrations: {MIGRATIONS_POLICY_MESSAGE}"));
        lines.join("\n")
    }
}

pub fn resolve_paths(context: &ResolutionContext, overrides: &PathOverrides) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

/// Same as [`resolve_paths`] with an injectable environment.
pub fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let env_value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    let (project_root, root_source) = match pick_override(
        overrides.project_root.as_deref(),
        env_value(ENV_PROJECT_ROOT),
        &context.cwd,
    ) {
        Some(found) => found,
        None => match discover_project_root(&context.cwd) {
            Some(root) => (root, ValueSource::Discovered),
            None => (context.cwd.clone(), ValueSource::Default),
        },
    };

    let state_dir = project_root.join(STATE_DIR_NAME);
    let (data_dir, data_source) = pick_override(
        overrides.data_dir.as_deref(),
        env_value(ENV_DATA_DIR),
        &project_root,
    )
    .unwrap_or_else(|| (state_dir.join("data"), ValueSource::Default));
    let (config_path, config_source) = pick_override(
        overrides.config.as_deref(),
        env_value(ENV_CONFIG),
        &project_root,
    )
    .unwrap_or_else(|| (state_dir.join(CONFIG_FILENAME), ValueSource::Default));

    Ok(ResolvedPaths {
        db_path: data_dir.join(DB_FILENAME),
        project_root,
        state_dir,
        data_dir,
        config_path,
        sources: PathSources {
            root: root_source,
            data: data_source,
            config: config_source,
        },
    })
}

fn pick_override(
    flag: Option<&Path>,
    env_value: Option<String>,
    base: &Path,
) -> Option<(PathBuf, ValueSource)> {
    if let Some(path) = flag {
        return Some((absolutize(base, path), ValueSource::Flag));
    }
    env_value.map(|value| (absolutize(base, Path::new(&value)), ValueSource::Env))
}

/// Nearest ancestor of `start` (itself included) holding a state directory.
fn discover_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(STATE_DIR_NAME).is_dir())
        .map(Path::to_path_buf)
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub state_dir_exists: bool,
    pub data_dir_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let db_size_bytes = match fs::metadata(&paths.db_path) {
        Ok(metadata) => Some(metadata.len()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to inspect {}", paths.db_path.display()));
        }
    };

    let status = RuntimeStatus {
        project_root_exists: paths.project_root.is_dir(),
        state_dir_exists: paths.state_dir.is_dir(),
        data_dir_exists: paths.data_dir.is_dir(),
        db_exists: db_size_bytes.is_some(),
        db_size_bytes,
        config_exists: paths.config_path.is_file(),
        warnings: Vec::new(),
    };

    let checks = [
        (status.project_root_exists, "project root does not exist"),
        (status.state_dir_exists, "state directory missing; run `curator init`"),
        (status.config_exists, "config file missing; built-in defaults apply"),
        (status.db_exists, "catalog missing; run `curator catalog scan`"),
    ];
    let warnings = checks
        .iter()
        .filter(|(ok, _)| !ok)
        .map(|(_, message)| (*message).to_string())
        .collect();

    Ok(RuntimeStatus { warnings, ..status })
}

pub fn ensure_catalog_ready(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if status.data_dir_exists && status.db_exists {
        return Ok(());
    }
    let mark = |present: bool| if present { "ok" } else { "missing" };
    bail!(
        "Catalog is not initialized.\n  data_dir: {} ({})\n  db_path: {} ({})\nRun `curator init` and `curator catalog scan` first.",
        normalize_for_display(&paths.data_dir),
        mark(status.data_dir_exists),
        normalize_for_display(&paths.db_path),
        mark(status.db_exists),
    );
}

#[derive(Debug, Clone, Copy)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

/// Create the project layout. Existing directories are left alone; the config
/// file is only replaced with `force`.
pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let wanted = [
        paths.state_dir.clone(),
        paths.data_dir.clone(),
        paths.project_root.join(DEFAULT_ARTICLE_DIR),
        paths.project_root.join(DEFAULT_LISTS_DIR),
    ];
    let mut created_dirs = Vec::new();
    for dir in wanted {
        if dir.exists() {
            continue;
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        created_dirs.push(dir);
    }

    let wrote_config = options.materialize_config
        && write_config_file(&paths.config_path, &render_materialized_config(), options.force)?;

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

fn write_config_file(path: &Path, content: &str, overwrite: bool) -> Result<bool> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let opened = OpenOptions::new()
        .write(true)
        .truncate(true)
        .create(overwrite)
        .create_new(!overwrite)
        .open(path);
    let mut file = match opened {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open {}", path.display()));
        }
    };
    file.write_all(content.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

fn render_materialized_config() -> String {
    format!(
        r#"# curator configuration

[paths]
article_dir = "{DEFAULT_ARTICLE_DIR}"
lists_dir = "{DEFAULT_LISTS_DIR}"
# reader_root = "/sdcard/Books"

[catalog]
doc_formats = ["pdf", "epub", "html", "txt"]
file_names_to_skip = []
list_extension = "rlst"
# Append a format indicator and title column after each list entry.
display_columns = false

# [article_tags.ai]
# description = "machine learning and artificial intelligence"
#
# [article_tags.ai_safety]
# description = "alignment and safety of AI systems"
# any_tags = ["ai"]
#
# [article_tags.ai_policy]
# description = "governance of AI systems"
# all_tags = ["ai"]
# not_any_tags = ["ai_safety"]

# [lists.ai_reading]
# any_tags = ["ai"]
# formats = ["epub", "pdf"]
# read_state = "unread"
"#
    )
}

fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
