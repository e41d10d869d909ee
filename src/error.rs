//! Error types for the vacation engine.
//!
//! Policy suppressions (bulk mail, no-reply senders, interval not elapsed)
//! are not errors; they travel as [`crate::pipeline::Suppression`] values.
//! Everything here is either fatal for the invocation or logged and dropped.

use std::time::Duration;

/// Top-level error type for one invocation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Alias resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required argument: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid pattern for {key}: {source}")]
    InvalidPattern {
        key: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to parse arguments: {0}")]
    ParseError(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Alias graph resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Alias loop while resolving {address}: deeper than {limit} hops")]
    LoopDetected { address: String, limit: usize },
}

/// Reply composition and delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("No MX record found for {domain}: {reason}")]
    NoMxRecord { domain: String, reason: String },

    #[error("SMTP delivery via {host}:{port} failed: {reason}")]
    Smtp {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("SMTP dialog with {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },

    #[error("Local relay {path} failed: {reason}")]
    Sendmail { path: String, reason: String },

    #[error("Delivery task failed: {0}")]
    Task(String),
}
