//! Shared types for the autoresponder pipeline.

use std::fmt;

// ── Inbound message ─────────────────────────────────────────────────

/// Header values captured from the inbound message.
///
/// Folded continuation lines are already joined with a single space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundHeaders {
    pub from: String,
    pub to: String,
    pub cc: String,
    pub reply_to: String,
    pub subject: String,
    /// `"unknown"` when the message carries none.
    pub message_id: String,
}

impl Default for InboundHeaders {
    fn default() -> Self {
        Self {
            from: String::new(),
            to: String::new(),
            cc: String::new(),
            reply_to: String::new(),
            subject: String::new(),
            message_id: "unknown".to_string(),
        }
    }
}

/// Envelope parameters handed over by the MTA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub sender: String,
    pub recipient: String,
    /// Print the composed reply instead of delivering it.
    pub dry_run: bool,
}

/// Addresses after sanitization, ready for resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMessage {
    /// Sanitized envelope sender; the reply goes here.
    pub sender: String,
    /// Sanitized envelope recipient; the start of alias resolution.
    pub recipient: String,
    /// Original subject, substituted into `$SUBJECT`.
    pub subject: String,
    pub message_id: String,
}

// ── Outcome ─────────────────────────────────────────────────────────

/// Why no reply was produced.
///
/// Every variant is a successful, silent end of the invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suppression {
    /// A header signalled bulk, list, spam, or automated mail.
    Header { reason: &'static str },
    /// A header or envelope value required for replying is empty.
    MissingField(&'static str),
    /// The `To` header matches the operator's no-vacation pattern.
    NoVacationRecipient,
    /// Sender looks like an automated or list address.
    NoReplySender(String),
    /// A value yielded no valid address.
    InvalidAddress { field: &'static str, value: String },
    /// Envelope sender and recipient are the same.
    SelfAddressed,
    /// The sender is one of the message's own `To`/`Cc` recipients.
    SenderIsRecipient,
    /// No address reachable from the recipient has an eligible vacation.
    NoEligibleVacation,
    /// This sender was already notified within the interval.
    AlreadyNotified,
    /// The vacation row vanished between resolution and compose.
    ReplyMissing,
}

impl fmt::Display for Suppression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header { reason } => write!(f, "header rule: {reason}"),
            Self::MissingField(field) => write!(f, "missing {field}"),
            Self::NoVacationRecipient => write!(f, "recipient matches no-vacation pattern"),
            Self::NoReplySender(addr) => write!(f, "no-reply sender {addr}"),
            Self::InvalidAddress { field, value } => {
                write!(f, "no valid address in {field}: {value:?}")
            }
            Self::SelfAddressed => write!(f, "sender equals recipient"),
            Self::SenderIsRecipient => write!(f, "sender is among the message recipients"),
            Self::NoEligibleVacation => write!(f, "no eligible vacation"),
            Self::AlreadyNotified => write!(f, "sender already notified"),
            Self::ReplyMissing => write!(f, "vacation reply no longer configured"),
        }
    }
}

/// Final result of one invocation.
#[derive(Debug)]
pub enum Outcome {
    /// A reply was handed to the relay.
    Sent { owner: String, to: String },
    /// Dry-run: the fully formatted reply.
    DryRun { owner: String, message: Vec<u8> },
    /// Policy decided no reply is due.
    Suppressed(Suppression),
    /// Composing or delivering failed; logged, no retry.
    DeliveryFailed { owner: String, reason: String },
}

impl From<Suppression> for Outcome {
    fn from(s: Suppression) -> Self {
        Self::Suppressed(s)
    }
}
