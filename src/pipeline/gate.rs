//! Notification gate: at most one reply per owner/sender per interval.
//!
//! Invocations run as separate processes, so the ledger's unique key on
//! `(owner, sender)` is the only mutual exclusion. The protocol is
//! sweep, insert, and on conflict read-and-decide; a re-notify only goes
//! out when the conditional refresh of the row succeeds. Any storage
//! failure resolves to "do not send".

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error};

use crate::store::{DirectoryStore, InsertOutcome};

/// Decides whether a reply is due and records it when it is.
pub struct NotificationGate<'a> {
    store: &'a dyn DirectoryStore,
}

impl<'a> NotificationGate<'a> {
    pub fn new(store: &'a dyn DirectoryStore) -> Self {
        Self { store }
    }

    /// `true` when the caller owns the right to reply now.
    pub async fn should_notify(&self, owner: &str, sender: &str, now: DateTime<Utc>) -> bool {
        if let Err(e) = self.store.prune_notifications(owner, sender).await {
            error!(owner, sender, "Notification sweep failed: {e}");
            return false;
        }

        match self.store.insert_notification(owner, sender, now).await {
            Ok(InsertOutcome::Inserted) => {
                debug!(owner, sender, "First notification recorded");
                true
            }
            Ok(InsertOutcome::AlreadyNotified) => self.renotify(owner, sender, now).await,
            Err(e) => {
                error!(owner, sender, "Failed to record notification: {e}");
                false
            }
        }
    }

    async fn renotify(&self, owner: &str, sender: &str, now: DateTime<Utc>) -> bool {
        let interval = match self.store.notification_interval(owner).await {
            Ok(interval) => interval.unwrap_or(0),
            Err(e) => {
                error!(owner, "Failed to read notification interval: {e}");
                return false;
            }
        };
        if interval <= 0 {
            debug!(owner, sender, "Already notified, interval 0");
            return false;
        }

        let last = match self.store.last_notified(owner, sender).await {
            Ok(Some(last)) => last,
            Ok(None) => {
                // Row swept by a concurrent invocation between insert and read.
                debug!(owner, sender, "Ledger row vanished");
                return false;
            }
            Err(e) => {
                error!(owner, sender, "Failed to read last notification: {e}");
                return false;
            }
        };

        let elapsed = (now - last).num_seconds();
        if elapsed < interval {
            debug!(owner, sender, elapsed, interval, "Notified too recently");
            return false;
        }

        // Only the invocation that moves the timestamp off `last` may reply.
        let due_at = now - Duration::seconds(interval);
        match self.store.touch_notification(owner, sender, due_at, now).await {
            Ok(true) => {
                debug!(owner, sender, elapsed, interval, "Interval elapsed, notifying again");
                true
            }
            Ok(false) => {
                debug!(owner, sender, "Refreshed by a concurrent invocation");
                false
            }
            Err(e) => {
                error!(owner, sender, "Failed to refresh notification: {e}");
                false
            }
        }
    }
}
