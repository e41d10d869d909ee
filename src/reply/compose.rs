//! Reply composition: template substitution and the RFC 822 message.

use std::error::Error as StdError;
use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::{Address, Message};

use crate::config::Config;
use crate::error::DeliveryError;
use crate::store::VacationReply;

/// Token in the reply subject replaced by the original subject.
pub const SUBJECT_TOKEN: &str = "$SUBJECT";
/// Body token replaced by the formatted vacation start date.
pub const FROM_DATE_TOKEN: &str = "<%From_Date>";
/// Body token replaced by the formatted vacation end date.
pub const UNTIL_DATE_TOKEN: &str = "<%Until_Date>";

// ── Fixed headers ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Precedence;

impl Header for Precedence {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Precedence")
    }

    fn parse(_: &str) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        Ok(Self)
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), "junk".to_string())
    }
}

#[derive(Debug, Clone, Copy)]
struct AutoSubmitted;

impl Header for AutoSubmitted {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Auto-Submitted")
    }

    fn parse(_: &str) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        Ok(Self)
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), "auto-replied".to_string())
    }
}

#[derive(Debug, Clone)]
struct XLoop(String);

impl Header for XLoop {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Loop")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

// ── Composition ─────────────────────────────────────────────────────

/// Per-message inputs of a reply.
#[derive(Debug, Clone)]
pub struct ReplyContext<'a> {
    /// Vacation owner; the reply's `From`.
    pub owner: &'a str,
    /// Original sender; the reply's `To`.
    pub sender: &'a str,
    pub original_subject: &'a str,
    /// Original `Message-ID`, `"unknown"` when absent.
    pub message_id: &'a str,
    pub display_name: Option<&'a str>,
}

/// Render a stored date with `format`, or return it unchanged if it does
/// not parse.
pub fn format_stored_date(stored: &str, format: &str) -> String {
    let Some(datetime) = parse_stored_date(stored.trim()) else {
        return stored.to_string();
    };

    let mut out = String::new();
    if write!(out, "{}", datetime.format(format)).is_err() {
        return stored.to_string();
    }
    out
}

fn parse_stored_date(s: &str) -> Option<NaiveDateTime> {
    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_local())
}

/// Substitute the subject and date placeholders.
pub fn render(reply: &VacationReply, original_subject: &str, date_format: &str) -> (String, String) {
    let subject = reply.subject.replace(SUBJECT_TOKEN, original_subject);
    let body = reply
        .body
        .replace(FROM_DATE_TOKEN, &format_stored_date(&reply.active_from, date_format))
        .replace(UNTIL_DATE_TOKEN, &format_stored_date(&reply.active_until, date_format));
    (subject, body)
}

fn parse_address(address: &str) -> Result<Address, DeliveryError> {
    address
        .parse()
        .map_err(|e: lettre::address::AddressError| DeliveryError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Build the reply message.
pub fn compose(
    config: &Config,
    reply: &VacationReply,
    ctx: &ReplyContext<'_>,
) -> Result<Message, DeliveryError> {
    let (subject, body) = render(reply, ctx.original_subject, &config.date_format);

    let from = Mailbox::new(
        ctx.display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        parse_address(ctx.owner)?,
    );
    let to = Mailbox::new(None, parse_address(ctx.sender)?);

    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .header(Precedence)
        .header(XLoop(config.x_loop.clone()))
        .header(AutoSubmitted);

    let message_id = ctx.message_id.trim();
    if !message_id.is_empty() && message_id != "unknown" {
        builder = builder
            .in_reply_to(message_id.to_string())
            .references(message_id.to_string());
    }

    builder
        .body(body)
        .map_err(|e| DeliveryError::Build(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(body: &str) -> VacationReply {
        VacationReply {
            subject: "Out of office: $SUBJECT".into(),
            body: body.into(),
            active_from: "2024-05-01 00:00:00".into(),
            active_until: "2024-06-01".into(),
        }
    }

    fn ctx<'a>(display_name: Option<&'a str>) -> ReplyContext<'a> {
        ReplyContext {
            owner: "owner@example.org",
            sender: "sender@example.net",
            original_subject: "Budget",
            message_id: "<abc@example.net>",
            display_name,
        }
    }

    fn formatted(message: &Message) -> String {
        String::from_utf8(message.formatted()).unwrap()
    }

    #[test]
    fn until_date_placeholder() {
        let (_, body) = render(&reply("Back on <%Until_Date>"), "", "%Y-%m-%d");
        assert_eq!(body, "Back on 2024-06-01");
    }

    #[test]
    fn date_placeholders_use_display_format() {
        let (_, body) = render(
            &reply("Away <%From_Date> to <%Until_Date>"),
            "",
            "%d.%m.%Y",
        );
        assert_eq!(body, "Away 01.05.2024 to 01.06.2024");
    }

    #[test]
    fn malformed_date_passes_through() {
        let mut r = reply("Back on <%Until_Date>");
        r.active_until = "next week".into();
        let (_, body) = render(&r, "", "%Y-%m-%d");
        assert_eq!(body, "Back on next week");
    }

    #[test]
    fn subject_token_is_replaced() {
        let (subject, _) = render(&reply(""), "Budget", "%Y-%m-%d");
        assert_eq!(subject, "Out of office: Budget");
    }

    #[test]
    fn message_carries_autoreply_headers() {
        let config = Config::default();
        let message = compose(&config, &reply("Back on <%Until_Date>"), &ctx(None)).unwrap();
        let text = formatted(&message);

        assert!(text.contains("From: owner@example.org"));
        assert!(text.contains("To: sender@example.net"));
        assert!(text.contains("Subject: Out of office: Budget"));
        assert!(text.contains("Precedence: junk"));
        assert!(text.contains("X-Loop: Postfix Admin Virtual Vacation"));
        assert!(text.contains("Auto-Submitted: auto-replied"));
        assert!(text.contains("In-Reply-To: <abc@example.net>"));
        assert!(text.contains("text/plain; charset=utf-8"));
        assert!(text.contains("Back on 2024-06-01"));
    }

    #[test]
    fn display_name_is_encoded_when_not_ascii() {
        let config = Config::default();
        let message = compose(&config, &reply("x"), &ctx(Some("Jürgen Müller"))).unwrap();
        let text = formatted(&message);
        assert!(text.contains("=?"));
        assert!(!text.contains("Jürgen"));
        assert!(text.contains("<owner@example.org>"));
    }

    #[test]
    fn unknown_message_id_adds_no_threading() {
        let config = Config::default();
        let mut c = ctx(None);
        c.message_id = "unknown";
        let text = formatted(&compose(&config, &reply("x"), &c).unwrap());
        assert!(!text.contains("In-Reply-To"));
    }

    #[test]
    fn invalid_sender_is_rejected() {
        let config = Config::default();
        let mut c = ctx(None);
        c.sender = "not-an-address";
        assert!(matches!(
            compose(&config, &reply("x"), &c),
            Err(DeliveryError::InvalidAddress { .. })
        ));
    }
}
