//! Address sanitizer and no-reply policy.
//!
//! Header values are parsed as RFC 822 address lists with `mail-parser`;
//! when that yields nothing, a permissive address-shaped token pattern is
//! used instead. Surviving addresses are lower-cased, validated with
//! `lettre::Address`, and de-duplicated in order.

use std::sync::LazyLock;

use lettre::Address;
use mail_parser::MessageParser;
use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::pipeline::types::Suppression;

/// Local parts and list suffixes of automated senders.
pub const DEFAULT_NOREPLY_PATTERN: &str = r"^(noreply|no\-reply|do_not_reply|no_reply|postmaster|mailer\-daemon|listserv|majordomo|owner\-|request\-|bounces\-)|(\-(owner|request|bounces)\@)";

const ADDRESS_TOKEN_PATTERN: &str = r"[\w.\-+'=_^|$/{}~?*\\&!`%]+@[\w.\-]+\w+";

static ADDRESS_TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(ADDRESS_TOKEN_PATTERN).ok());

// ── Generic sanitizer ───────────────────────────────────────────────

/// Extract valid, lower-cased, de-duplicated addresses from a header value.
pub fn sanitize_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    let mut candidates = parse_address_list(raw);
    if candidates.is_empty() {
        candidates = scan_address_tokens(raw);
    }

    let mut valid: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let lc = candidate.trim().to_lowercase();
        if is_valid_address(&lc) && !valid.contains(&lc) {
            valid.push(lc);
        }
    }
    valid
}

/// [`sanitize_list`] joined with `", "`.
pub fn sanitize(raw: &str) -> String {
    sanitize_list(raw).join(", ")
}

/// Whether `candidate` is a single syntactically valid mailbox.
pub fn is_valid_address(candidate: &str) -> bool {
    candidate.contains('@') && candidate.parse::<Address>().is_ok()
}

fn parse_address_list(raw: &str) -> Vec<String> {
    let header = format!("To: {raw}\r\n\r\n");
    let Some(message) = MessageParser::default().parse_headers(header.as_bytes()) else {
        return Vec::new();
    };

    match message.to() {
        Some(mail_parser::Address::List(addrs)) => addrs
            .iter()
            .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            .collect(),
        Some(mail_parser::Address::Group(groups)) => groups
            .iter()
            .flat_map(|g| {
                g.addresses
                    .iter()
                    .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            })
            .collect(),
        None => Vec::new(),
    }
}

fn scan_address_tokens(raw: &str) -> Vec<String> {
    match ADDRESS_TOKEN.as_ref() {
        Some(re) => re.find_iter(raw).map(|m| m.as_str().to_string()).collect(),
        None => Vec::new(),
    }
}

// ── No-reply policy ─────────────────────────────────────────────────

/// Sender sanitizer that also rejects automated senders.
pub struct NoReplyPolicy {
    builtin: Regex,
    custom: Option<Regex>,
}

impl NoReplyPolicy {
    pub fn new(custom: Option<Regex>) -> Result<Self, regex::Error> {
        let builtin = RegexBuilder::new(DEFAULT_NOREPLY_PATTERN)
            .case_insensitive(true)
            .build()?;
        Ok(Self { builtin, custom })
    }

    fn is_noreply(&self, value: &str) -> bool {
        self.builtin.is_match(value) || self.custom.as_ref().is_some_and(|re| re.is_match(value))
    }

    /// Reject no-reply senders, then sanitize.
    ///
    /// The pattern is checked against the raw value and against every
    /// extracted address, so a display name cannot hide `noreply@`.
    pub fn check_and_clean(&self, field: &'static str, raw: &str) -> Result<String, Suppression> {
        if self.is_noreply(raw.trim()) {
            debug!(field, value = raw, "Sender matches no-reply pattern");
            return Err(Suppression::NoReplySender(raw.trim().to_string()));
        }

        let addresses = sanitize_list(raw);
        if let Some(addr) = addresses.iter().find(|a| self.is_noreply(a)) {
            debug!(field, value = %addr, "Sender matches no-reply pattern");
            return Err(Suppression::NoReplySender(addr.clone()));
        }

        if addresses.is_empty() {
            return Err(Suppression::InvalidAddress {
                field,
                value: raw.to_string(),
            });
        }
        Ok(addresses.join(", "))
    }
}

// ── Autoreply recipient ─────────────────────────────────────────────

/// Turn `local#domain@vacation_domain` back into `local@domain`.
///
/// An address extension (`local+ext`) is cut from the local part. Other
/// addresses are returned unchanged.
pub fn convert_autoreply_recipient(recipient: &str, vacation_domain: &str, delimiter: &str) -> String {
    let suffix = format!("@{vacation_domain}");
    let Some(encoded) = recipient
        .len()
        .checked_sub(suffix.len())
        .filter(|&i| recipient.is_char_boundary(i) && recipient[i..].eq_ignore_ascii_case(&suffix))
        .map(|i| &recipient[..i])
    else {
        return recipient.to_string();
    };

    let converted = encoded.replace('#', "@");
    let converted = match converted.split_once('@') {
        Some((local, domain)) if !delimiter.is_empty() => match local.find(delimiter) {
            Some(idx) => format!("{}@{domain}", &local[..idx]),
            None => converted.clone(),
        },
        _ => converted.clone(),
    };
    debug!(from = recipient, to = %converted, "Converted autoreply recipient");
    converted
}

/// The `local#domain@vacation_domain` marker for `address`.
pub fn autoreply_marker(address: &str, vacation_domain: &str) -> String {
    format!("{}@{vacation_domain}", address.replace('@', "#"))
}
