//! Version-tracked schema migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially. The
//! tables mirror the admin application's schema for the columns the engine
//! touches, so an existing SQLite directory database is left untouched by
//! `CREATE TABLE IF NOT EXISTS`.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "directory_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS mailbox (
                username TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                domain TEXT NOT NULL DEFAULT '',
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS alias (
                address TEXT PRIMARY KEY,
                goto TEXT NOT NULL,
                domain TEXT NOT NULL DEFAULT '',
                created TEXT NOT NULL DEFAULT (datetime('now')),
                modified TEXT NOT NULL DEFAULT (datetime('now')),
                active INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_alias_domain ON alias(domain);

            CREATE TABLE IF NOT EXISTS alias_domain (
                alias_domain TEXT PRIMARY KEY,
                target_domain TEXT NOT NULL,
                created TEXT NOT NULL DEFAULT (datetime('now')),
                modified TEXT NOT NULL DEFAULT (datetime('now')),
                active INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_alias_domain_target ON alias_domain(target_domain);
        "#,
    },
    Migration {
        version: 2,
        name: "vacation",
        sql: r#"
            CREATE TABLE IF NOT EXISTS vacation (
                email TEXT PRIMARY KEY,
                subject TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL DEFAULT '',
                cache TEXT NOT NULL DEFAULT '',
                domain TEXT NOT NULL DEFAULT '',
                created TEXT NOT NULL DEFAULT (datetime('now')),
                modified TEXT NOT NULL DEFAULT (datetime('now')),
                active INTEGER NOT NULL DEFAULT 1,
                activefrom TEXT NOT NULL DEFAULT '2000-01-01 00:00:00',
                activeuntil TEXT NOT NULL DEFAULT '2038-01-18 00:00:00',
                interval_time INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS vacation_notification (
                on_vacation TEXT NOT NULL REFERENCES vacation(email) ON DELETE CASCADE,
                notified TEXT NOT NULL,
                notified_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (on_vacation, notified)
            );
        "#,
    },
];

/// Run all pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::debug!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
