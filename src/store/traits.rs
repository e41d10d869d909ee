//! `DirectoryStore` trait: the only interface the engine has to storage.
//!
//! One implementation per SQL dialect. Every call is a point lookup or a
//! single-row write; the uniqueness constraint on the notification ledger is
//! the only cross-process synchronization point.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;

/// Reply template of a vacation owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VacationReply {
    pub subject: String,
    pub body: String,
    /// Start of the vacation window, in the store's own date rendering.
    pub active_from: String,
    /// End of the vacation window, in the store's own date rendering.
    pub active_until: String,
}

/// Result of trying to claim a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// No row existed; this caller now owns "notified at `now`".
    Inserted,
    /// The `(owner, sender)` row already exists.
    AlreadyNotified,
}

/// Backend-agnostic directory store.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Short backend name for log lines.
    fn backend_name(&self) -> &'static str;

    // ── Vacation configuration ──────────────────────────────────────

    /// Whether `email` has an active vacation whose window contains `now`.
    async fn is_vacation_active(&self, email: &str, now: DateTime<Utc>)
    -> Result<bool, DatabaseError>;

    /// Load the reply template for `email`, if a vacation row exists.
    async fn vacation_reply(&self, email: &str) -> Result<Option<VacationReply>, DatabaseError>;

    /// Re-notify interval in seconds (0 = notify once).
    async fn notification_interval(&self, email: &str) -> Result<Option<i64>, DatabaseError>;

    /// Display name stored on the mailbox.
    async fn mailbox_name(&self, email: &str) -> Result<Option<String>, DatabaseError>;

    // ── Aliases ─────────────────────────────────────────────────────

    /// Raw comma-separated destination list of an active alias.
    ///
    /// Also used with `@domain` keys for domain-wide wildcard aliases.
    async fn alias_destinations(&self, address: &str) -> Result<Option<String>, DatabaseError>;

    /// Target domain of an active alias domain.
    async fn alias_domain_target(&self, domain: &str) -> Result<Option<String>, DatabaseError>;

    // ── Notification ledger ─────────────────────────────────────────

    /// Delete the `(owner, sender)` row if it predates the owner's `activefrom`.
    /// Returns the number of rows removed.
    async fn prune_notifications(&self, owner: &str, sender: &str) -> Result<u64, DatabaseError>;

    /// Insert a fresh ledger row stamped `now`.
    ///
    /// A uniqueness violation is reported as [`InsertOutcome::AlreadyNotified`];
    /// any other failure is an error.
    async fn insert_notification(
        &self,
        owner: &str,
        sender: &str,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, DatabaseError>;

    /// Timestamp of the existing ledger row.
    async fn last_notified(
        &self,
        owner: &str,
        sender: &str,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError>;

    /// Refresh the ledger row's timestamp to `now`, but only while it is
    /// still at or before `due_at`.
    ///
    /// Returns `true` when this call moved the timestamp; a concurrent
    /// invocation that refreshed it first makes this return `false`.
    async fn touch_notification(
        &self,
        owner: &str,
        sender: &str,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;
}
