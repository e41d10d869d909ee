//! libSQL backend: SQLite dialect `DirectoryStore` implementation.
//!
//! Supports local file and in-memory databases. Timestamps are stored as
//! `YYYY-MM-DD HH:MM:SS` UTC text, which the admin application also writes
//! and which compares correctly as plain text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{DirectoryStore, InsertOutcome, VacationReply};

/// Primary result code for `SQLITE_CONSTRAINT`.
const SQLITE_CONSTRAINT: i32 = 19;

/// How long to wait for a concurrent writer before failing.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        // Other invocations may hold the write lock on the same file.
        conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to set busy timeout: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Create the directory tables if they are missing.
    pub async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    /// Get the connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a query expected to yield at most one text column.
    async fn query_text(
        &self,
        context: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{context}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value: Option<String> = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("{context} row parse: {e}")))?;
                Ok(value)
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{context}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Render a timestamp the way the directory tables store it.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse an SQLite datetime or RFC 3339 string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(ndt.and_utc());
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(ndt.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whether a libsql error is a uniqueness / primary key violation.
fn is_unique_violation(err: &libsql::Error) -> bool {
    match err {
        libsql::Error::SqliteFailure(code, message) => {
            code & 0xff == SQLITE_CONSTRAINT || message.contains("UNIQUE constraint failed")
        }
        other => other.to_string().contains("UNIQUE constraint failed"),
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl DirectoryStore for LibSqlBackend {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn is_vacation_active(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM vacation
                 WHERE email = ?1 AND active = 1 AND activefrom <= ?2 AND activeuntil >= ?2",
                params![email, format_datetime(now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_vacation_active: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count > 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("is_vacation_active: {e}"))),
        }
    }

    async fn vacation_reply(&self, email: &str) -> Result<Option<VacationReply>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT subject, body, activefrom, activeuntil FROM vacation WHERE email = ?1",
                params![email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("vacation_reply: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let parse = |e: libsql::Error| DatabaseError::Query(format!("vacation_reply row parse: {e}"));
                Ok(Some(VacationReply {
                    subject: row.get::<Option<String>>(0).map_err(parse)?.unwrap_or_default(),
                    body: row.get::<Option<String>>(1).map_err(parse)?.unwrap_or_default(),
                    active_from: row.get::<Option<String>>(2).map_err(parse)?.unwrap_or_default(),
                    active_until: row.get::<Option<String>>(3).map_err(parse)?.unwrap_or_default(),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("vacation_reply: {e}"))),
        }
    }

    async fn notification_interval(&self, email: &str) -> Result<Option<i64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT interval_time FROM vacation WHERE email = ?1",
                params![email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("notification_interval: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let interval: Option<i64> = row.get(0).map_err(|e| {
                    DatabaseError::Query(format!("notification_interval row parse: {e}"))
                })?;
                Ok(Some(interval.unwrap_or(0)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("notification_interval: {e}"))),
        }
    }

    async fn mailbox_name(&self, email: &str) -> Result<Option<String>, DatabaseError> {
        self.query_text(
            "mailbox_name",
            "SELECT name FROM mailbox WHERE username = ?1",
            params![email],
        )
        .await
    }

    async fn alias_destinations(&self, address: &str) -> Result<Option<String>, DatabaseError> {
        self.query_text(
            "alias_destinations",
            "SELECT goto FROM alias WHERE address = ?1 AND active = 1",
            params![address],
        )
        .await
    }

    async fn alias_domain_target(&self, domain: &str) -> Result<Option<String>, DatabaseError> {
        self.query_text(
            "alias_domain_target",
            "SELECT target_domain FROM alias_domain WHERE alias_domain = ?1 AND active = 1",
            params![domain],
        )
        .await
    }

    async fn prune_notifications(&self, owner: &str, sender: &str) -> Result<u64, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM vacation_notification
                 WHERE on_vacation = ?1 AND notified = ?2
                   AND notified_at < (SELECT activefrom FROM vacation WHERE email = ?1)",
                params![owner, sender],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("prune_notifications: {e}")))?;

        if count > 0 {
            debug!(owner, sender, count, "Pruned notifications from a previous vacation");
        }
        Ok(count)
    }

    async fn insert_notification(
        &self,
        owner: &str,
        sender: &str,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, DatabaseError> {
        let result = self
            .conn()
            .execute(
                "INSERT INTO vacation_notification (on_vacation, notified, notified_at)
                 VALUES (?1, ?2, ?3)",
                params![owner, sender, format_datetime(now)],
            )
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::AlreadyNotified),
            Err(e) => Err(DatabaseError::Query(format!("insert_notification: {e}"))),
        }
    }

    async fn last_notified(
        &self,
        owner: &str,
        sender: &str,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let raw = self
            .query_text(
                "last_notified",
                "SELECT notified_at FROM vacation_notification WHERE on_vacation = ?1 AND notified = ?2",
                params![owner, sender],
            )
            .await?;

        match raw {
            Some(s) => parse_datetime(&s)
                .map(Some)
                .ok_or_else(|| DatabaseError::Query(format!("last_notified: bad timestamp '{s}'"))),
            None => Ok(None),
        }
    }

    async fn touch_notification(
        &self,
        owner: &str,
        sender: &str,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE vacation_notification SET notified_at = ?1
                 WHERE on_vacation = ?2 AND notified = ?3 AND notified_at <= ?4",
                params![format_datetime(now), owner, sender, format_datetime(due_at)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("touch_notification: {e}")))?;
        Ok(changed == 1)
    }
}
