//! Embedded schema migrations
//!
//! Each migration is a numbered SQL file compiled into the binary. Applied
//! versions are recorded in `schema_migrations`; a migration runs in its own
//! immediate transaction and re-checks the recorded versions after taking the
//! write lock, so two processes opening a fresh database do not both apply it.

use crate::core::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

/// One numbered schema change
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// All migrations in ascending version order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "init",
        sql: include_str!("migrations/0001_init.sql"),
    },
    Migration {
        version: 2,
        name: "purge_orphans",
        sql: include_str!("migrations/0002_purge_orphans.sql"),
    },
];

const CREATE_VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

/// Highest applied version, 0 for a fresh database.
///
/// # Errors
///
/// Returns `Error::Database` if the version table cannot be read.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.execute(CREATE_VERSION_TABLE, [])?;
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Applies every pending migration and returns how many ran.
///
/// # Errors
///
/// Returns `Error::Migration` naming the version that failed; that
/// migration's transaction is rolled back and later ones are not attempted.
pub fn apply_all(conn: &mut Connection) -> Result<usize> {
    let mut applied = 0;

    for migration in MIGRATIONS {
        if apply_one(conn, migration)? {
            applied += 1;
        }
    }

    if applied > 0 {
        info!("Applied {applied} schema migration(s)");
    }
    Ok(applied)
}

fn apply_one(conn: &mut Connection, migration: &Migration) -> Result<bool> {
    let version = migration.version;
    let wrap = |source| Error::Migration { version, source };

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(wrap)?;

    if current_version(&tx)? >= version {
        return Ok(false);
    }

    debug!(version, name = migration.name, "Applying migration");
    tx.execute_batch(migration.sql).map_err(wrap)?;
    tx.execute(
        "INSERT INTO schema_migrations (version) VALUES (?1)",
        [version],
    )
    .map_err(wrap)?;
    tx.commit().map_err(wrap)?;

    Ok(true)
}
