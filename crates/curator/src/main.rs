use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use curator_core::catalog::{Catalog, ingest_scan};
use curator_core::config::{ValidatedConfig, load_config};
use curator_core::filesystem::{LocalFs, scan_article_dir};
use curator_core::list_file::{clear_list, read_list};
use curator_core::migrate::{LATEST_VERSION, pending_migration_count, run_migrations};
use curator_core::model::{Article, ArticleFormat, ReadState, TagSet};
use curator_core::pipeline::{GenerateOptions, generate_lists};
use curator_core::predicate::{ListQuery, TagCriteria};
use curator_core::runtime::{
    InitOptions, MIGRATIONS_POLICY_MESSAGE, PathOverrides, ResolutionContext, ResolvedPaths,
    ensure_catalog_ready, init_layout, inspect_runtime, resolve_paths,
};
use curator_core::tagging::{apply_manual_tags, remove_manual_tags};

#[derive(Debug, Parser)]
#[command(
    name = "curator",
    version,
    about = "Catalog tagged articles and generate reading lists for reader apps"
)]
struct Cli {
    #[command(flatten)]
    runtime: RuntimeOptions,
    #[arg(short, long, global = true, help = "Log at debug level unless RUST_LOG is set")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Global path overrides, shared by every subcommand.
#[derive(Debug, Clone, Args)]
struct RuntimeOptions {
    #[arg(long, global = true, value_name = "DIR")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print resolved paths and where each came from
    #[arg(long, global = true)]
    diagnostics: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Status,
    Db(DbArgs),
    Catalog(CatalogArgs),
    Tag(TagArgs),
    Search(SearchArgs),
    Lists(ListsArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Skip writing .curator/config.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Migrate,
    Stats,
}

#[derive(Debug, Args)]
struct CatalogArgs {
    #[command(subcommand)]
    command: CatalogSubcommand,
}

#[derive(Debug, Subcommand)]
enum CatalogSubcommand {
    #[command(about = "Ingest the article folder and drop rows for vanished files")]
    Scan,
    #[command(name = "sync-tags", about = "Mirror configured tag definitions into the catalog")]
    SyncTags,
    Show {
        path: PathBuf,
        #[arg(long, help = "Print the article as JSON")]
        json: bool,
    },
    Mark {
        path: PathBuf,
        #[arg(value_name = "STATE", help = "unread, read, hidden or deleted")]
        state: String,
    },
}

#[derive(Debug, Args)]
struct TagArgs {
    #[command(subcommand)]
    command: TagSubcommand,
}

#[derive(Debug, Subcommand)]
enum TagSubcommand {
    Add {
        path: PathBuf,
        #[arg(required = true)]
        tags: Vec<String>,
        #[arg(long, help = "Assign even when prerequisite tags are missing")]
        force: bool,
    },
    Remove {
        path: PathBuf,
        #[arg(required = true)]
        tags: Vec<String>,
    },
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(long = "all", value_name = "TAG", help = "Require every one of these tags")]
    all_tags: Vec<String>,
    #[arg(long = "any", value_name = "TAG", help = "Require at least one of these tags")]
    any_tags: Vec<String>,
    #[arg(long = "not", value_name = "TAG", help = "Exclude articles with any of these tags")]
    not_any_tags: Vec<String>,
    #[arg(long = "format", value_name = "FORMAT")]
    formats: Vec<String>,
    #[arg(long = "state", value_name = "STATE")]
    read_state: Option<String>,
}

#[derive(Debug, Args)]
struct ListsArgs {
    #[command(subcommand)]
    command: ListsSubcommand,
}

#[derive(Debug, Subcommand)]
enum ListsSubcommand {
    Generate {
        #[arg(long, value_name = "NAME", help = "Generate only this list")]
        only: Option<String>,
        #[arg(long, help = "Print a diff per list instead of writing")]
        dry_run: bool,
    },
    Show {
        name: String,
    },
    Clear {
        name: String,
    },
}

fn main() -> Result<()> {
    let Cli {
        runtime,
        verbose,
        command,
    } = Cli::parse();
    init_tracing(verbose);

    match command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Migrate => run_db_migrate(&runtime),
            DbSubcommand::Stats => run_db_stats(&runtime),
        },
        Some(Commands::Catalog(CatalogArgs { command })) => match command {
            CatalogSubcommand::Scan => run_catalog_scan(&runtime),
            CatalogSubcommand::SyncTags => run_catalog_sync_tags(&runtime),
            CatalogSubcommand::Show { path, json } => run_catalog_show(&runtime, &path, json),
            CatalogSubcommand::Mark { path, state } => run_catalog_mark(&runtime, &path, &state),
        },
        Some(Commands::Tag(TagArgs { command })) => match command {
            TagSubcommand::Add { path, tags, force } => run_tag_add(&runtime, &path, &tags, force),
            TagSubcommand::Remove { path, tags } => run_tag_remove(&runtime, &path, &tags),
        },
        Some(Commands::Search(args)) => run_search(&runtime, args),
        Some(Commands::Lists(ListsArgs { command })) => match command {
            ListsSubcommand::Generate { only, dry_run } => {
                run_lists_generate(&runtime, GenerateOptions { only, dry_run })
            }
            ListsSubcommand::Show { name } => run_lists_show(&runtime, &name),
            ListsSubcommand::Clear { name } => run_lists_clear(&runtime, &name),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;
    let migrated = run_migrations(&paths)?;

    println!("Initialized curator runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("data_dir: {}", normalize_path(&paths.data_dir));
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("migrations_applied: {}", migrated.applied.len());
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    let config = load_validated_config(&paths)?;

    println!("runtime status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("data_dir_exists: {}", format_flag(status.data_dir_exists));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("article_dir: {}", normalize_path(&config.article_dir));
    println!(
        "article_dir_exists: {}",
        format_flag(config.article_dir.exists())
    );
    println!("lists_dir: {}", normalize_path(&config.lists_dir));
    println!("tags.configured: {}", config.tags.len());
    println!("lists.configured: {}", config.lists.len());
    println!(
        "lists.enabled: {}",
        config.lists.values().filter(|list| list.enabled).count()
    );
    if status.db_exists {
        print_catalog_counts(&paths)?;
    }
    print_warnings(&status.warnings);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = run_migrations(&paths)?;

    println!("db migrate");
    println!("db_path: {}", normalize_path(&paths.db_path));
    if report.applied.is_empty() {
        println!("applied: <none>");
    } else {
        for migration in &report.applied {
            println!("applied: v{:03}_{}", migration.version, migration.name);
        }
    }
    println!("schema_version: {}", report.current_version);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("db stats");
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("data_dir: {}", normalize_path(&paths.data_dir));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    let pending = pending_migration_count(&paths)?;
    println!("schema_latest: {LATEST_VERSION}");
    println!("migrations_pending: {pending}");
    if status.db_exists && pending == 0 {
        print_catalog_counts(&paths)?;
    } else if pending > 0 {
        println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_catalog_scan(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_validated_config(&paths)?;
    let mut catalog = Catalog::open_or_create(&paths.db_path)?;

    let scanned = scan_article_dir(&config.article_dir, &config.catalog)?;
    let report = ingest_scan(&mut catalog, &scanned, &LocalFs)?;

    println!("catalog scan");
    println!("article_dir: {}", normalize_path(&config.article_dir));
    println!("scanned: {}", report.scanned);
    println!("added: {}", report.added);
    println!("updated: {}", report.updated);
    println!("removed: {}", report.removed);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_catalog_sync_tags(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_validated_config(&paths)?;
    let mut catalog = Catalog::open_or_create(&paths.db_path)?;
    let report = catalog.sync_tag_definitions(&config.tags)?;

    println!("catalog sync-tags");
    println!("configured: {}", config.tags.len());
    println!("added: {}", report.added);
    println!("updated: {}", report.updated);
    println!("removed: {}", report.removed);
    println!("cleared_assignments: {}", report.cleared_assignments);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_catalog_show(runtime: &RuntimeOptions, path: &Path, json: bool) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let catalog = open_ready_catalog(&paths)?;
    let article_path = absolutize_arg(path)?;
    let Some(article) = catalog.get_article(&article_path)? else {
        bail!("article not in catalog: {}", normalize_path(&article_path));
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&article)?);
        return Ok(());
    }
    print_article(&article);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_catalog_mark(runtime: &RuntimeOptions, path: &Path, state: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let catalog = open_ready_catalog(&paths)?;
    let state: ReadState = state.parse()?;
    let article_path = absolutize_arg(path)?;
    if !catalog.set_read_state(&article_path, state)? {
        bail!("article not in catalog: {}", normalize_path(&article_path));
    }

    println!("catalog mark");
    println!("path: {}", normalize_path(&article_path));
    println!("read_state: {state}");
    Ok(())
}

fn run_tag_add(runtime: &RuntimeOptions, path: &Path, tags: &[String], force: bool) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_validated_config(&paths)?;
    let catalog = open_ready_catalog(&paths)?;
    let article_path = absolutize_arg(path)?;
    let report = apply_manual_tags(&catalog, &config, &article_path, tags, force)?;

    println!("tag add");
    println!("path: {}", normalize_path(&article_path));
    print_tag_names("applied", report.applied.iter().map(|tag| tag.as_str()));
    print_tag_names(
        "already_present",
        report.already_present.iter().map(|tag| tag.as_str()),
    );
    print_tag_names("skipped", report.skipped.iter().map(|tag| tag.as_str()));
    Ok(())
}

fn run_tag_remove(runtime: &RuntimeOptions, path: &Path, tags: &[String]) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_validated_config(&paths)?;
    let catalog = open_ready_catalog(&paths)?;
    let article_path = absolutize_arg(path)?;
    let removed = remove_manual_tags(&catalog, &config, &article_path, tags)?;

    println!("tag remove");
    println!("path: {}", normalize_path(&article_path));
    print_tag_names("removed", removed.iter().map(|tag| tag.as_str()));
    Ok(())
}

fn run_search(runtime: &RuntimeOptions, args: SearchArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_validated_config(&paths)?;
    let catalog = open_ready_catalog(&paths)?;

    let query = ListQuery {
        criteria: TagCriteria {
            all_tags: declared_tags(&config, &args.all_tags)?,
            any_tags: declared_tags(&config, &args.any_tags)?,
            not_any_tags: declared_tags(&config, &args.not_any_tags)?,
        },
        formats: args
            .formats
            .iter()
            .map(|value| value.parse::<ArticleFormat>())
            .collect::<Result<_, _>>()?,
        read_state: args
            .read_state
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::parse::<ReadState>)
            .transpose()?,
    };

    let found = catalog.search(&query)?;
    for article in &found {
        println!("{}", normalize_path(&article.path));
    }
    println!("search.count: {}", found.len());
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_lists_generate(runtime: &RuntimeOptions, options: GenerateOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_catalog_ready(&paths, &status)?;
    let config = load_validated_config(&paths)?;

    let report = generate_lists(&config, &paths.db_path, &LocalFs, &options)?;

    println!("lists generate");
    println!("lists_dir: {}", normalize_path(&config.lists_dir));
    println!("dry_run: {}", options.dry_run);
    for outcome in &report.lists {
        let prefix = format!("list.{}", outcome.name);
        match &outcome.result {
            Ok(summary) => {
                println!("{prefix}.action: {}", summary.action.as_str());
                println!("{prefix}.entries: {}", summary.entries);
                println!("{prefix}.kept: {}", summary.report.kept);
                println!("{prefix}.added: {}", summary.report.added);
                println!("{prefix}.pruned: {}", summary.report.pruned);
                println!("{prefix}.rewritten: {}", summary.report.rewritten);
                println!("{prefix}.changed: {}", format_flag(summary.changed));
                for leftover in &summary.leftover_conflicts {
                    println!("{prefix}.leftover_conflict: {}", normalize_path(leftover));
                }
                if let Some(diff) = summary.diff.as_deref().filter(|diff| !diff.is_empty()) {
                    println!("{prefix}.diff:");
                    print!("{diff}");
                }
            }
            Err(err) => println!("{prefix}.error: {err}"),
        }
    }
    print_diagnostics(runtime, &paths);

    let failed = report.failed_count();
    if failed > 0 {
        bail!("{failed} of {} list(s) failed", report.lists.len());
    }
    Ok(())
}

fn run_lists_show(runtime: &RuntimeOptions, name: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_validated_config(&paths)?;
    config.list(name)?;
    let list_path = config.list_path(name);

    println!("list: {name}");
    println!("path: {}", normalize_path(&list_path));
    match read_list(&list_path)? {
        Some(list) => {
            println!("header_lines: {}", list.header.len());
            println!("entries.count: {}", list.entries.len());
            for entry in &list.entries {
                println!("entry: {}", normalize_path(entry));
            }
        }
        None => println!("file: <not generated> (run `curator lists generate`)"),
    }
    Ok(())
}

fn run_lists_clear(runtime: &RuntimeOptions, name: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_validated_config(&paths)?;
    config.list(name)?;
    let list_path = config.list_path(name);
    let changed = clear_list(&list_path)?;

    println!("lists clear");
    println!("path: {}", normalize_path(&list_path));
    println!("changed: {}", format_flag(changed));
    Ok(())
}

fn print_catalog_counts(paths: &ResolvedPaths) -> Result<()> {
    let catalog = Catalog::open(&paths.db_path)?;
    println!("catalog.articles: {}", catalog.article_count()?);
    let counts = catalog.tag_counts()?;
    if counts.is_empty() {
        println!("catalog.tags: <none> (run `curator catalog sync-tags`)");
    } else {
        for (tag, count) in &counts {
            println!("catalog.tag.{tag}: {count}");
        }
    }
    Ok(())
}

fn print_article(article: &Article) {
    println!("path: {}", normalize_path(&article.path));
    println!("format: {}", article.format);
    println!("read_state: {}", article.read_state);
    print_tag_names("tags", article.tags.iter().map(|tag| tag.as_str()));
    println!(
        "source_url: {}",
        article.source_url.as_deref().unwrap_or("<none>")
    );
    println!(
        "content_hash: {}",
        article.content_hash.as_deref().unwrap_or("<none>")
    );
    match article.summary.as_deref() {
        Some(summary) => println!("summary: {summary}"),
        None => println!("summary: <none>"),
    }
}

fn print_tag_names<'a>(key: &str, names: impl Iterator<Item = &'a str>) {
    let joined = names.collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        println!("{key}: <none>");
    } else {
        println!("{key}: {joined}");
    }
}

fn print_warnings(warnings: &[String]) {
    if !warnings.is_empty() {
        println!("warnings:");
        for warning in warnings {
            println!("  - {warning}");
        }
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn declared_tags(config: &ValidatedConfig, names: &[String]) -> Result<TagSet> {
    names
        .iter()
        .map(|name| -> Result<_> { Ok(config.tag(name)?.name.clone()) })
        .collect()
}

fn load_validated_config(paths: &ResolvedPaths) -> Result<ValidatedConfig> {
    let config = load_config(&paths.config_path)?;
    config
        .validate(&paths.project_root)
        .with_context(|| format!("invalid configuration in {}", normalize_path(&paths.config_path)))
}

fn open_ready_catalog(paths: &ResolvedPaths) -> Result<Catalog> {
    let status = inspect_runtime(paths)?;
    ensure_catalog_ready(paths, &status)?;
    Catalog::open(&paths.db_path)
}

fn absolutize_arg(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    Ok(cwd.join(path))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    let paths = resolve_paths(&context, &overrides)?;
    tracing::debug!(
        project_root = %normalize_path(&paths.project_root),
        db_path = %normalize_path(&paths.db_path),
        config_path = %normalize_path(&paths.config_path),
        "resolved runtime paths"
    );
    Ok(paths)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
