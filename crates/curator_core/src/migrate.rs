use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::runtime::ResolvedPaths;

/// Catalog schema steps, applied in order. The schema version lives in
/// `PRAGMA user_version`; a fresh file is version 0.
const SCHEMA_STEPS: [(u32, &str, &str); 3] = [
    (1, "catalog", include_str!("migrations/v001_catalog.sql")),
    (2, "indexes", include_str!("migrations/v002_indexes.sql")),
    (3, "tag_applicability", include_str!("migrations/v003_tag_applicability.sql")),
];

pub const LATEST_VERSION: u32 = SCHEMA_STEPS[SCHEMA_STEPS.len() - 1].0;

#[derive(Debug, Clone, Serialize)]
pub struct MigrateReport {
    pub applied: Vec<AppliedMigration>,
    pub current_version: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: &'static str,
}

/// Bring the catalog at `paths.db_path` up to `LATEST_VERSION`, creating the
/// file first if needed.
pub fn run_migrations(paths: &ResolvedPaths) -> Result<MigrateReport> {
    ensure_db_parent(&paths.db_path)?;
    let connection = open_connection(&paths.db_path)?;
    migrate_connection(&connection)
}

pub(crate) fn migrate_connection(connection: &Connection) -> Result<MigrateReport> {
    let start = current_version(connection)?;
    let mut applied = Vec::new();

    for (version, name, sql) in SCHEMA_STEPS.iter().copied().filter(|step| step.0 > start) {
        let transaction = connection
            .unchecked_transaction()
            .with_context(|| format!("failed to begin migration v{version:03}_{name}"))?;
        transaction
            .execute_batch(sql)
            .with_context(|| format!("failed to apply migration v{version:03}_{name}"))?;
        transaction
            .pragma_update(None, "user_version", version)
            .with_context(|| format!("failed to record schema version {version}"))?;
        transaction
            .commit()
            .with_context(|| format!("failed to commit migration v{version:03}_{name}"))?;

        info!(version, name, "applied catalog migration");
        applied.push(AppliedMigration { version, name });
    }

    Ok(MigrateReport {
        applied,
        current_version: current_version(connection)?,
    })
}

/// Steps still to apply; every step when the catalog file does not exist yet.
pub fn pending_migration_count(paths: &ResolvedPaths) -> Result<usize> {
    let version = if paths.db_path.exists() {
        current_version(&open_connection(&paths.db_path)?)?
    } else {
        0
    };
    Ok(SCHEMA_STEPS.iter().filter(|step| step.0 > version).count())
}

pub fn current_version(connection: &Connection) -> Result<u32> {
    connection
        .pragma_query_value(None, "user_version", |row| row.get::<_, u32>(0))
        .context("failed to read catalog schema version")
}

pub(crate) fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open catalog {}", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set sqlite busy timeout")?;
    connection
        .pragma_update(None, "foreign_keys", true)
        .context("failed to enable foreign keys")?;
    let mode: String = connection
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .context("failed to switch catalog to WAL")?;
    tracing::debug!(journal_mode = %mode, path = %db_path.display(), "opened catalog");
    Ok(connection)
}

pub(crate) fn ensure_db_parent(db_path: &Path) -> Result<()> {
    match db_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .with_context(|| format!("failed to create catalog directory {}", parent.display())),
        _ => Ok(()),
    }
}
