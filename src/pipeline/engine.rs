//! Engine: runs one inbound message through every stage in order.
//!
//! [`Engine::prepare`] covers everything that needs no storage (header
//! filter, address sanitizing, self-mail guards), so suppressed mail never
//! opens a database connection. [`Engine::respond`] resolves the owner,
//! consults the notification gate, and composes and delivers the reply.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{ConfigError, Error};
use crate::pipeline::address::{NoReplyPolicy, convert_autoreply_recipient, sanitize_list};
use crate::pipeline::filter::HeaderFilter;
use crate::pipeline::gate::NotificationGate;
use crate::pipeline::resolver::AliasResolver;
use crate::pipeline::types::{Invocation, Outcome, PreparedMessage, Suppression};
use crate::reply::{Mailer, ReplyContext, compose};
use crate::store::DirectoryStore;

/// The autoresponder pipeline, configured once per invocation.
pub struct Engine<'a> {
    config: &'a Config,
    filter: HeaderFilter,
    noreply: NoReplyPolicy,
}

impl<'a> Engine<'a> {
    pub fn new(config: &'a Config) -> Result<Self, ConfigError> {
        let filter = HeaderFilter::new(&config.x_loop).map_err(|source| {
            ConfigError::InvalidPattern {
                key: "VACATION_X_LOOP".into(),
                source,
            }
        })?;
        let noreply = NoReplyPolicy::new(config.noreply_pattern.clone()).map_err(|source| {
            ConfigError::InvalidPattern {
                key: "VACATION_NOREPLY_PATTERN".into(),
                source,
            }
        })?;
        Ok(Self {
            config,
            filter,
            noreply,
        })
    }

    // ── Storage-free stages ─────────────────────────────────────────

    /// Filter headers and sanitize addresses.
    pub fn prepare(
        &self,
        raw: &[u8],
        invocation: &Invocation,
    ) -> Result<PreparedMessage, Suppression> {
        let headers = self.filter.scan(raw)?;

        let recipient = convert_autoreply_recipient(
            invocation.recipient.trim(),
            &self.config.vacation_domain,
            &self.config.recipient_delimiter,
        );
        let sender = invocation.sender.trim();

        for (field, value) in [
            ("From", headers.from.as_str()),
            ("To", headers.to.as_str()),
            ("Message-ID", headers.message_id.as_str()),
            ("envelope sender", sender),
            ("envelope recipient", recipient.as_str()),
        ] {
            if value.is_empty() {
                debug!(field, "Required value is empty");
                return Err(Suppression::MissingField(field));
            }
        }

        if let Some(pattern) = &self.config.no_vacation_pattern {
            if pattern.is_match(&headers.to) {
                debug!(to = %headers.to, "Recipient excluded from vacation replies");
                return Err(Suppression::NoVacationRecipient);
            }
        }

        let to = sanitize_list(&headers.to);
        let cc = sanitize_list(&headers.cc);
        self.noreply.check_and_clean("From", &headers.from)?;
        if !headers.reply_to.is_empty() {
            self.noreply.check_and_clean("Reply-To", &headers.reply_to)?;
        }
        let sender = single_address(
            "envelope sender",
            self.noreply.check_and_clean("envelope sender", sender)?,
        )?;
        let recipient = single_address(
            "envelope recipient",
            self.noreply.check_and_clean("envelope recipient", &recipient)?,
        )?;

        if sender == recipient {
            debug!(sender = %sender, "Sender and recipient are the same");
            return Err(Suppression::SelfAddressed);
        }
        if to.iter().chain(cc.iter()).any(|addr| *addr == sender) {
            debug!(sender = %sender, "Sender is among the message recipients");
            return Err(Suppression::SenderIsRecipient);
        }

        Ok(PreparedMessage {
            sender,
            recipient,
            subject: headers.subject,
            message_id: headers.message_id,
        })
    }

    // ── Storage stages ──────────────────────────────────────────────

    /// Resolve, compose, gate, and deliver (or print, in dry-run).
    ///
    /// The reply is fully composed before the gate records a notification,
    /// so a vanished template or an unusable address never consumes the
    /// sender's ledger slot. Only alias loops and storage failures while
    /// resolving or loading the template are errors; every other non-reply
    /// ends in an [`Outcome`].
    pub async fn respond(
        &self,
        store: &dyn DirectoryStore,
        mailer: &Mailer,
        prepared: &PreparedMessage,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<Outcome, Error> {
        let resolver = AliasResolver::new(
            store,
            &self.config.vacation_domain,
            self.config.max_alias_hops,
            now,
        );
        let Some(owner) = resolver.resolve(&prepared.recipient).await? else {
            debug!(recipient = %prepared.recipient, "No active vacation");
            return Ok(Suppression::NoEligibleVacation.into());
        };

        let Some(reply) = store.vacation_reply(&owner).await? else {
            warn!(owner = %owner, "Vacation removed before the reply was composed");
            return Ok(Suppression::ReplyMissing.into());
        };

        let display_name = self.display_name(store, &owner).await;
        let ctx = ReplyContext {
            owner: &owner,
            sender: &prepared.sender,
            original_subject: &prepared.subject,
            message_id: &prepared.message_id,
            display_name: display_name.as_deref(),
        };
        let message = match compose(self.config, &reply, &ctx) {
            Ok(message) => message,
            Err(e) => {
                error!(owner = %owner, "Failed to compose reply: {e}");
                return Ok(Outcome::DeliveryFailed {
                    owner,
                    reason: e.to_string(),
                });
            }
        };

        if !NotificationGate::new(store)
            .should_notify(&owner, &prepared.sender, now)
            .await
        {
            return Ok(Suppression::AlreadyNotified.into());
        }

        if dry_run {
            info!(owner = %owner, to = %prepared.sender, "Dry run, reply not sent");
            return Ok(Outcome::DryRun {
                owner,
                message: message.formatted(),
            });
        }

        match mailer.deliver(&owner, message).await {
            Ok(_) => Ok(Outcome::Sent {
                owner,
                to: prepared.sender.clone(),
            }),
            Err(e) => {
                error!(owner = %owner, to = %prepared.sender, "Reply delivery failed: {e}");
                Ok(Outcome::DeliveryFailed {
                    owner,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Run the whole pipeline against an already opened store.
    pub async fn run(
        &self,
        raw: &[u8],
        invocation: &Invocation,
        store: &dyn DirectoryStore,
        mailer: &Mailer,
        now: DateTime<Utc>,
    ) -> Result<Outcome, Error> {
        match self.prepare(raw, invocation) {
            Ok(prepared) => {
                self.respond(store, mailer, &prepared, invocation.dry_run, now)
                    .await
            }
            Err(suppression) => Ok(suppression.into()),
        }
    }

    async fn display_name(&self, store: &dyn DirectoryStore, owner: &str) -> Option<String> {
        if self.config.accountname_check {
            match store.mailbox_name(owner).await {
                Ok(Some(name)) if !name.trim().is_empty() => return Some(name),
                Ok(_) => {}
                Err(e) => warn!(owner, "Failed to read mailbox name: {e}"),
            }
        }
        self.config.friendly_from.clone()
    }
}

/// Envelope values must name exactly one address.
fn single_address(field: &'static str, cleaned: String) -> Result<String, Suppression> {
    if cleaned.contains(',') {
        debug!(field, value = %cleaned, "Envelope value holds several addresses");
        return Err(Suppression::InvalidAddress {
            field,
            value: cleaned,
        });
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::error::{DatabaseError, DeliveryError};
    use crate::reply::MxLookup;
    use crate::store::{InsertOutcome, LibSqlBackend, VacationReply};

    struct NoMx;

    #[async_trait]
    impl MxLookup for NoMx {
        async fn mx_records(&self, domain: &str) -> Result<Vec<(u16, String)>, DeliveryError> {
            Err(DeliveryError::NoMxRecord {
                domain: domain.to_string(),
                reason: "offline".into(),
            })
        }
    }

    const MESSAGE: &str = "From: Sender <sender@example.net>\r\n\
                           To: user@example.org\r\n\
                           Subject: Budget\r\n\
                           Message-ID: <1@example.net>\r\n\
                           \r\n\
                           body\r\n";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap()
    }

    fn invocation(sender: &str, recipient: &str) -> Invocation {
        Invocation {
            sender: sender.into(),
            recipient: recipient.into(),
            dry_run: true,
        }
    }

    async fn directory() -> LibSqlBackend {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.conn()
            .execute_batch(
                "INSERT INTO mailbox (username, name) VALUES ('owner@example.org', 'Owen Owner');
                 INSERT INTO vacation (email, subject, body, activefrom, activeuntil)
                   VALUES ('owner@example.org', 'Re: $SUBJECT', 'Back on <%Until_Date>',
                           '2024-05-01 00:00:00', '2024-06-01 00:00:00');
                 INSERT INTO alias (address, goto) VALUES ('user@example.org', 'owner@example.org');",
            )
            .await
            .unwrap();
        db
    }

    #[test]
    fn prepare_sanitizes_envelope() {
        let config = Config::default();
        let engine = Engine::new(&config).unwrap();
        let prepared = engine
            .prepare(
                MESSAGE.as_bytes(),
                &invocation("Sender@Example.NET", "User@example.org"),
            )
            .unwrap();
        assert_eq!(prepared.sender, "sender@example.net");
        assert_eq!(prepared.recipient, "user@example.org");
        assert_eq!(prepared.subject, "Budget");
    }

    #[test]
    fn prepare_guards() {
        let config = Config::default();
        let engine = Engine::new(&config).unwrap();

        assert_eq!(
            engine.prepare(MESSAGE.as_bytes(), &invocation("a@example.org", "A@example.org")),
            Err(Suppression::SelfAddressed)
        );
        assert_eq!(
            engine.prepare(MESSAGE.as_bytes(), &invocation("", "user@example.org")),
            Err(Suppression::MissingField("envelope sender"))
        );
        assert_eq!(
            engine.prepare(MESSAGE.as_bytes(), &invocation("user@example.org", "other@example.org")),
            Err(Suppression::SenderIsRecipient)
        );
        assert!(matches!(
            engine.prepare(MESSAGE.as_bytes(), &invocation("noreply@example.net", "user@example.org")),
            Err(Suppression::NoReplySender(_))
        ));
    }

    #[test]
    fn envelope_sender_must_be_one_address() {
        let config = Config::default();
        let engine = Engine::new(&config).unwrap();
        assert!(matches!(
            engine.prepare(
                MESSAGE.as_bytes(),
                &invocation("a@example.net, b@example.net", "user@example.org")
            ),
            Err(Suppression::InvalidAddress { field: "envelope sender", .. })
        ));
    }

    #[test]
    fn no_vacation_pattern_matches_to_header() {
        let config = Config {
            no_vacation_pattern: Some(regex::Regex::new(r"(?i)^user@").unwrap()),
            ..Config::default()
        };
        let engine = Engine::new(&config).unwrap();
        assert_eq!(
            engine.prepare(MESSAGE.as_bytes(), &invocation("sender@example.net", "user@example.org")),
            Err(Suppression::NoVacationRecipient)
        );
    }

    #[tokio::test]
    async fn dry_run_composes_reply_and_records_ledger() {
        let config = Config {
            accountname_check: true,
            ..Config::default()
        };
        let engine = Engine::new(&config).unwrap();
        let db = directory().await;
        let mailer = Mailer::new(&config, Arc::new(NoMx));
        let inv = invocation("sender@example.net", "user@example.org");

        let outcome = engine.run(MESSAGE.as_bytes(), &inv, &db, &mailer, now()).await.unwrap();
        let (owner, message) = match outcome {
            Outcome::DryRun { owner, message } => (owner, message),
            other => panic!("expected dry run, got {other:?}"),
        };
        let text = String::from_utf8(message).unwrap();
        assert_eq!(owner, "owner@example.org");
        assert!(text.contains("Owen Owner"));
        assert!(text.contains("Subject: Re: Budget"));
        assert!(text.contains("Back on 2024-06-01"));

        let again = engine.run(MESSAGE.as_bytes(), &inv, &db, &mailer, now()).await.unwrap();
        assert!(matches!(again, Outcome::Suppressed(Suppression::AlreadyNotified)));
    }

    #[tokio::test]
    async fn recipient_without_vacation_is_suppressed() {
        let config = Config::default();
        let engine = Engine::new(&config).unwrap();
        let db = directory().await;
        let mailer = Mailer::new(&config, Arc::new(NoMx));

        let outcome = engine
            .run(
                MESSAGE.as_bytes(),
                &invocation("sender@example.net", "stranger@example.org"),
                &db,
                &mailer,
                now(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Suppressed(Suppression::NoEligibleVacation)));
    }

    #[tokio::test]
    async fn mx_failure_is_a_logged_delivery_failure() {
        let mut config = Config::default();
        config.smtp.server = None;
        let engine = Engine::new(&config).unwrap();
        let db = directory().await;
        let mailer = Mailer::new(&config, Arc::new(NoMx));
        let mut inv = invocation("sender@example.net", "user@example.org");
        inv.dry_run = false;

        let outcome = engine.run(MESSAGE.as_bytes(), &inv, &db, &mailer, now()).await.unwrap();
        assert!(matches!(outcome, Outcome::DeliveryFailed { .. }));
    }

    /// Directory whose vacation template disappears after resolution.
    struct TemplateGone(LibSqlBackend);

    #[async_trait]
    impl DirectoryStore for TemplateGone {
        fn backend_name(&self) -> &'static str {
            "template-gone"
        }
        async fn is_vacation_active(&self, email: &str, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
            self.0.is_vacation_active(email, now).await
        }
        async fn vacation_reply(&self, _email: &str) -> Result<Option<VacationReply>, DatabaseError> {
            Ok(None)
        }
        async fn notification_interval(&self, email: &str) -> Result<Option<i64>, DatabaseError> {
            self.0.notification_interval(email).await
        }
        async fn mailbox_name(&self, email: &str) -> Result<Option<String>, DatabaseError> {
            self.0.mailbox_name(email).await
        }
        async fn alias_destinations(&self, address: &str) -> Result<Option<String>, DatabaseError> {
            self.0.alias_destinations(address).await
        }
        async fn alias_domain_target(&self, domain: &str) -> Result<Option<String>, DatabaseError> {
            self.0.alias_domain_target(domain).await
        }
        async fn prune_notifications(&self, owner: &str, sender: &str) -> Result<u64, DatabaseError> {
            self.0.prune_notifications(owner, sender).await
        }
        async fn insert_notification(
            &self,
            owner: &str,
            sender: &str,
            now: DateTime<Utc>,
        ) -> Result<InsertOutcome, DatabaseError> {
            self.0.insert_notification(owner, sender, now).await
        }
        async fn last_notified(
            &self,
            owner: &str,
            sender: &str,
        ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
            self.0.last_notified(owner, sender).await
        }
        async fn touch_notification(
            &self,
            owner: &str,
            sender: &str,
            due_at: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> Result<bool, DatabaseError> {
            self.0.touch_notification(owner, sender, due_at, now).await
        }
    }

    #[tokio::test]
    async fn missing_template_leaves_ledger_untouched() {
        let config = Config::default();
        let engine = Engine::new(&config).unwrap();
        let store = TemplateGone(directory().await);
        let mailer = Mailer::new(&config, Arc::new(NoMx));

        let outcome = engine
            .run(
                MESSAGE.as_bytes(),
                &invocation("sender@example.net", "user@example.org"),
                &store,
                &mailer,
                now(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Suppressed(Suppression::ReplyMissing)));
        assert_eq!(
            store.0.last_notified("owner@example.org", "sender@example.net").await.unwrap(),
            None
        );
    }
}
