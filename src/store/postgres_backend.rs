//! PostgreSQL `DirectoryStore` implementation.
//!
//! Works against an existing admin database; no tables are created here.
//! Timestamps travel as Unix seconds and are converted with `to_timestamp`
//! and `extract(epoch from ..)` on the server side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

use crate::error::DatabaseError;
use crate::store::traits::{DirectoryStore, InsertOutcome, VacationReply};

pub struct PostgresBackend {
    client: Client,
}

impl PostgresBackend {
    /// Connect with a `postgres://` URL or a key/value connection string.
    pub async fn connect(url: &str) -> Result<Self, DatabaseError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to connect to PostgreSQL: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {e}");
            }
        });

        info!("PostgreSQL connection established");
        Ok(Self { client })
    }

    async fn query_opt(
        &self,
        context: &str,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Option<Row>, DatabaseError> {
        self.client
            .query_opt(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{context}: {e}")))
    }

    async fn query_text(
        &self,
        context: &str,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Option<String>, DatabaseError> {
        match self.query_opt(context, sql, params).await? {
            Some(row) => row
                .try_get::<_, Option<String>>(0)
                .map_err(|e| DatabaseError::Query(format!("{context} row parse: {e}"))),
            None => Ok(None),
        }
    }
}

fn epoch(dt: DateTime<Utc>) -> f64 {
    dt.timestamp() as f64
}

#[async_trait]
impl DirectoryStore for PostgresBackend {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn is_vacation_active(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let row = self
            .query_opt(
                "is_vacation_active",
                "SELECT COUNT(*) FROM vacation
                 WHERE email = $1 AND active = TRUE
                   AND activefrom <= to_timestamp($2) AND activeuntil >= to_timestamp($2)",
                &[&email, &epoch(now)],
            )
            .await?;

        let count: i64 = match row {
            Some(row) => row
                .try_get(0)
                .map_err(|e| DatabaseError::Query(format!("is_vacation_active row parse: {e}")))?,
            None => 0,
        };
        Ok(count > 0)
    }

    async fn vacation_reply(&self, email: &str) -> Result<Option<VacationReply>, DatabaseError> {
        let Some(row) = self
            .query_opt(
                "vacation_reply",
                "SELECT subject, body, activefrom::date::text, activeuntil::date::text
                 FROM vacation WHERE email = $1",
                &[&email],
            )
            .await?
        else {
            return Ok(None);
        };

        let text = |i: usize| -> Result<String, DatabaseError> {
            row.try_get::<_, Option<String>>(i)
                .map(Option::unwrap_or_default)
                .map_err(|e| DatabaseError::Query(format!("vacation_reply row parse: {e}")))
        };
        Ok(Some(VacationReply {
            subject: text(0)?,
            body: text(1)?,
            active_from: text(2)?,
            active_until: text(3)?,
        }))
    }

    async fn notification_interval(&self, email: &str) -> Result<Option<i64>, DatabaseError> {
        match self
            .query_opt(
                "notification_interval",
                "SELECT interval_time::bigint FROM vacation WHERE email = $1",
                &[&email],
            )
            .await?
        {
            Some(row) => {
                let interval: Option<i64> = row.try_get(0).map_err(|e| {
                    DatabaseError::Query(format!("notification_interval row parse: {e}"))
                })?;
                Ok(Some(interval.unwrap_or(0)))
            }
            None => Ok(None),
        }
    }

    async fn mailbox_name(&self, email: &str) -> Result<Option<String>, DatabaseError> {
        self.query_text(
            "mailbox_name",
            "SELECT name FROM mailbox WHERE username = $1",
            &[&email],
        )
        .await
    }

    async fn alias_destinations(&self, address: &str) -> Result<Option<String>, DatabaseError> {
        self.query_text(
            "alias_destinations",
            "SELECT goto FROM alias WHERE address = $1 AND active = TRUE",
            &[&address],
        )
        .await
    }

    async fn alias_domain_target(&self, domain: &str) -> Result<Option<String>, DatabaseError> {
        self.query_text(
            "alias_domain_target",
            "SELECT target_domain FROM alias_domain WHERE alias_domain = $1 AND active = TRUE",
            &[&domain],
        )
        .await
    }

    async fn prune_notifications(&self, owner: &str, sender: &str) -> Result<u64, DatabaseError> {
        let count = self
            .client
            .execute(
                "DELETE FROM vacation_notification
                 WHERE on_vacation = $1 AND notified = $2
                   AND notified_at < (SELECT activefrom FROM vacation WHERE email = $1)",
                &[&owner, &sender],
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
            .client
            .execute(
                "INSERT INTO vacation_notification (on_vacation, notified, notified_at)
                 VALUES ($1, $2, to_timestamp($3))",
                &[&owner, &sender, &epoch(now)],
            )
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                Ok(InsertOutcome::AlreadyNotified)
            }
            Err(e) => Err(DatabaseError::Query(format!("insert_notification: {e}"))),
        }
    }

    async fn last_notified(
        &self,
        owner: &str,
        sender: &str,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let Some(row) = self
            .query_opt(
                "last_notified",
                "SELECT extract(epoch from notified_at)::bigint FROM vacation_notification
                 WHERE on_vacation = $1 AND notified = $2",
                &[&owner, &sender],
            )
            .await?
        else {
            return Ok(None);
        };

        let secs: i64 = row
            .try_get(0)
            .map_err(|e| DatabaseError::Query(format!("last_notified row parse: {e}")))?;
        DateTime::from_timestamp(secs, 0)
            .map(Some)
            .ok_or_else(|| DatabaseError::Query(format!("last_notified: bad timestamp {secs}")))
    }

    async fn touch_notification(
        &self,
        owner: &str,
        sender: &str,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let changed = self
            .client
            .execute(
                "UPDATE vacation_notification SET notified_at = to_timestamp($1)
                 WHERE on_vacation = $2 AND notified = $3 AND notified_at <= to_timestamp($4)",
                &[&epoch(now), &owner, &sender, &epoch(due_at)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("touch_notification: {e}")))?;
        Ok(changed == 1)
    }
}
