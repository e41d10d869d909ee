//! Header scanner and bulk-mail rules.
//!
//! Reads the header block up to the first blank line, joins folded lines
//! onto the header they continue, and stops on the first line that signals
//! list, bulk, spam, or automated traffic. The body is never read.

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::pipeline::types::{InboundHeaders, Suppression};

/// A single suppression rule evaluated against raw header lines.
#[derive(Debug, Clone)]
pub struct HeaderRule {
    /// Compiled, case-insensitive pattern.
    pub regex: Regex,
    /// Lines that match `regex` but are still acceptable.
    pub unless: Option<Regex>,
    /// Why this rule triggers.
    pub reason: &'static str,
}

impl HeaderRule {
    fn new(pattern: &str, reason: &'static str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: case_insensitive(pattern)?,
            unless: None,
            reason,
        })
    }

    fn unless(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.unless = Some(case_insensitive(pattern)?);
        Ok(self)
    }

    fn matches(&self, line: &str) -> bool {
        self.regex.is_match(line) && !self.unless.as_ref().is_some_and(|u| u.is_match(line))
    }
}

fn case_insensitive(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Which captured header a line belongs to.
#[derive(Debug, Clone, Copy)]
enum Field {
    From,
    To,
    Cc,
    ReplyTo,
    Subject,
    MessageId,
}

const CAPTURED: &[(&str, Field)] = &[
    ("from:", Field::From),
    ("to:", Field::To),
    ("cc:", Field::Cc),
    ("reply-to:", Field::ReplyTo),
    ("subject:", Field::Subject),
    ("message-id:", Field::MessageId),
];

impl InboundHeaders {
    fn slot(&mut self, field: Field) -> &mut String {
        match field {
            Field::From => &mut self.from,
            Field::To => &mut self.to,
            Field::Cc => &mut self.cc,
            Field::ReplyTo => &mut self.reply_to,
            Field::Subject => &mut self.subject,
            Field::MessageId => &mut self.message_id,
        }
    }
}

/// Header scanner with the suppression rule table.
pub struct HeaderFilter {
    rules: Vec<HeaderRule>,
}

impl HeaderFilter {
    /// Build the default rule table. `x_loop` is this system's own loop marker.
    pub fn new(x_loop: &str) -> Result<Self, regex::Error> {
        let rules = vec![
            HeaderRule::new(r"^x-spam-(flag|status):\s+yes", "spam flag")?,
            HeaderRule::new(r"^x-facebook-notify:", "facebook notification")?,
            HeaderRule::new(
                r"^x-amazon-mail-relay-type:\s*notification",
                "amazon notification",
            )?,
            HeaderRule::new(r"^precedence:\s+(bulk|list|junk)", "bulk precedence")?,
            HeaderRule::new(
                &format!(r"^x-loop:\s+{}", regex::escape(x_loop)),
                "own loop marker",
            )?,
            HeaderRule::new(r"^auto-submitted:\s*\S", "auto-submitted")?
                .unless(r"^auto-submitted:\s*no\s*$")?,
            HeaderRule::new(r"^list-(id|post|unsubscribe):", "mailing list")?,
            HeaderRule::new(r"^(x-(barracuda-)?spam-status):\s+(yes)", "spam status")?,
            HeaderRule::new(r"^(x-dspam-result):\s+(spam|bl[ao]cklisted)", "dspam verdict")?,
            HeaderRule::new(r"^(x-(anti|avas-)?virus-status):\s+(infected)", "virus")?,
            HeaderRule::new(
                r"^(x-(avas-spam|spamtest|crm114|razor|pyzor)-status):\s+(spam)",
                "content filter verdict",
            )?,
            HeaderRule::new(
                r"^(x-osbf-lua-score):\s+[0-9/.\-+]+\s+\[([-S])\]",
                "osbf-lua verdict",
            )?,
            HeaderRule::new(r"^x-autogenerated:\s*reply", "autogenerated reply")?,
            HeaderRule::new(
                r"^(x-auto-response-suppress):\s*(oof|all)",
                "auto-response suppressed",
            )?,
        ];
        Ok(Self { rules })
    }

    /// Scan the header block of `raw`.
    ///
    /// Returns the captured headers, or the first suppression signal seen.
    pub fn scan(&self, raw: &[u8]) -> Result<InboundHeaders, Suppression> {
        let text = String::from_utf8_lossy(raw);
        let mut headers = InboundHeaders::default();
        let mut last: Option<Field> = None;

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                break;
            }

            if line.starts_with([' ', '\t']) {
                if let Some(field) = last {
                    let slot = headers.slot(field);
                    slot.push(' ');
                    slot.push_str(line.trim());
                }
                continue;
            }

            last = None;
            let lower = line.to_ascii_lowercase();
            if let Some((prefix, field)) = CAPTURED.iter().find(|(p, _)| lower.starts_with(p)) {
                *headers.slot(*field) = line[prefix.len()..].trim().to_string();
                last = Some(*field);
                continue;
            }

            if let Some(rule) = self.rules.iter().find(|r| r.matches(line)) {
                debug!(line, reason = rule.reason, "Header rule matched");
                return Err(Suppression::Header {
                    reason: rule.reason,
                });
            }
        }

        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_X_LOOP;

    fn filter() -> HeaderFilter {
        HeaderFilter::new(DEFAULT_X_LOOP).unwrap()
    }

    fn suppressed(raw: &str) -> bool {
        filter().scan(raw.as_bytes()).is_err()
    }

    #[test]
    fn captures_headers_and_folds_continuations() {
        let raw = "From: Alice <alice@example.org>\r\n\
                   To: bob@example.org,\r\n\
                   \tcarol@example.org\r\n\
                   Subject: Quarterly\r\n   report\r\n\
                   Message-ID: <1@example.org>\r\n\
                   \r\n\
                   Precedence: bulk\r\n";
        let headers = filter().scan(raw.as_bytes()).unwrap();

        assert_eq!(headers.from, "Alice <alice@example.org>");
        assert_eq!(headers.to, "bob@example.org, carol@example.org");
        assert_eq!(headers.subject, "Quarterly report");
        assert_eq!(headers.message_id, "<1@example.org>");
        assert!(headers.cc.is_empty());
    }

    #[test]
    fn message_id_defaults_to_unknown() {
        let headers = filter().scan(b"From: a@example.org\n\nbody").unwrap();
        assert_eq!(headers.message_id, "unknown");
    }

    #[test]
    fn continuation_of_unrecognized_header_is_dropped() {
        let raw = "Received: from mx\n\tby example.org\nTo: x@example.org\n\n";
        let headers = filter().scan(raw.as_bytes()).unwrap();
        assert_eq!(headers.to, "x@example.org");
    }

    #[test]
    fn later_occurrence_wins() {
        let raw = "Subject: first\nSubject: second\n\n";
        assert_eq!(filter().scan(raw.as_bytes()).unwrap().subject, "second");
    }

    #[test]
    fn bulk_and_list_headers_suppress() {
        assert!(suppressed("Precedence: bulk\n\n"));
        assert!(suppressed("precedence: LIST\n\n"));
        assert!(suppressed("List-Id: <dev.lists.example.org>\n\n"));
        assert!(suppressed("List-Unsubscribe: <mailto:x@example.org>\n\n"));
        assert!(!suppressed("Precedence: first-class\n\n"));
    }

    #[test]
    fn auto_submitted_only_allows_no() {
        assert!(!suppressed("Auto-Submitted: no\n\n"));
        assert!(!suppressed("Auto-Submitted: No \n\n"));
        assert!(suppressed("Auto-Submitted: auto-replied\n\n"));
        assert!(suppressed("Auto-Submitted: auto-generated\n\n"));
        assert!(suppressed("Auto-Submitted: notification\n\n"));
    }

    #[test]
    fn own_loop_marker_suppresses() {
        assert!(suppressed("X-Loop: Postfix Admin Virtual Vacation\n\n"));
        assert!(!suppressed("X-Loop: someone else\n\n"));

        let custom = HeaderFilter::new("vacation (example)").unwrap();
        assert!(custom.scan(b"X-Loop: vacation (example)\n\n").is_err());
    }

    #[test]
    fn spam_and_virus_verdicts_suppress() {
        assert!(suppressed("X-Spam-Flag: YES\n\n"));
        assert!(suppressed("X-Barracuda-Spam-Status: Yes\n\n"));
        assert!(suppressed("X-DSPAM-Result: Blocklisted\n\n"));
        assert!(suppressed("X-AVAS-Virus-Status: infected\n\n"));
        assert!(suppressed("X-CRM114-Status: SPAM ( -12.3 )\n\n"));
        assert!(suppressed("X-OSBF-Lua-Score: 0.12/0.00 [S]\n\n"));
        assert!(!suppressed("X-Spam-Status: No, score=-1.0\n\n"));
    }

    #[test]
    fn provider_notifications_suppress() {
        assert!(suppressed("X-Facebook-Notify: birthday\n\n"));
        assert!(suppressed("X-Amazon-Mail-Relay-Type: notification\n\n"));
        assert!(suppressed("X-Autogenerated: Reply\n\n"));
        assert!(suppressed("X-Auto-Response-Suppress: OOF\n\n"));
        assert!(!suppressed("X-Auto-Response-Suppress: DR\n\n"));
    }

    #[test]
    fn rules_in_body_are_ignored() {
        let raw = "From: a@example.org\n\nPrecedence: bulk\n";
        assert!(filter().scan(raw.as_bytes()).is_ok());
    }
}
