//! Configuration types.
//!
//! Every knob is read once from the environment by [`Config::from_env`] and
//! the resulting value is passed by reference through the pipeline.

use std::path::PathBuf;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use regex::{Regex, RegexBuilder};
use secrecy::SecretString;

use crate::error::ConfigError;

/// Default X-Loop identifier written to replies and detected on input.
pub const DEFAULT_X_LOOP: &str = "Postfix Admin Virtual Vacation";

/// Maximum number of alias lookups per invocation before giving up.
pub const MAX_ALIAS_HOPS: usize = 20;

/// Which storage backend holds the directory tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbBackend {
    Sqlite,
    Postgres,
    Mysql,
}

impl std::str::FromStr for DbBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "libsql" => Ok(Self::Sqlite),
            "postgres" | "postgresql" | "pgsql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            other => Err(ConfigError::InvalidValue {
                key: "VACATION_DB_TYPE".into(),
                message: format!("unknown database type '{other}'"),
            }),
        }
    }
}

/// Directory store connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: DbBackend,
    /// File path for SQLite, connection URL for the server backends.
    pub url: SecretString,
}

/// Outbound SMTP settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// Fixed relay host. `None` means "deliver to the owner domain's MX".
    pub server: Option<String>,
    pub port: u16,
    pub helo: String,
    /// Implicit TLS instead of opportunistic STARTTLS.
    pub ssl: bool,
    pub timeout: Duration,
    pub auth_id: Option<String>,
    pub auth_password: Option<SecretString>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: Some("localhost".to_string()),
            port: 25,
            helo: "localhost.localdomain".to_string(),
            ssl: false,
            timeout: Duration::from_secs(120),
            auth_id: None,
            auth_password: None,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Domain used for the `local#domain@autoreply` canonical form.
    pub vacation_domain: String,
    /// Address extension delimiter (usually `+`), empty to disable.
    pub recipient_delimiter: String,
    pub smtp: SmtpConfig,
    /// Absolute path to a sendmail-compatible binary. Takes priority over SMTP.
    pub sendmail_bin: Option<PathBuf>,
    pub friendly_from: Option<String>,
    /// Use the mailbox display name in the `From` header when available.
    pub accountname_check: bool,
    /// Operator supplied pattern of senders that never get a reply.
    pub noreply_pattern: Option<Regex>,
    /// Recipients (matched against the `To` header) that never auto-reply.
    pub no_vacation_pattern: Option<Regex>,
    /// `strftime` format for the `<%From_Date>` / `<%Until_Date>` placeholders.
    pub date_format: String,
    pub x_loop: String,
    pub max_alias_hops: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                backend: DbBackend::Sqlite,
                url: SecretString::from("/var/lib/vacation/postfix.db"),
            },
            vacation_domain: "autoreply.example.org".to_string(),
            recipient_delimiter: "+".to_string(),
            smtp: SmtpConfig::default(),
            sendmail_bin: None,
            friendly_from: None,
            accountname_check: false,
            noreply_pattern: None,
            no_vacation_pattern: None,
            date_format: "%Y-%m-%d".to_string(),
            x_loop: DEFAULT_X_LOOP.to_string(),
            max_alias_hops: MAX_ALIAS_HOPS,
        }
    }
}

impl Config {
    /// Build config from `VACATION_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend: DbBackend = match lookup("VACATION_DB_TYPE") {
            Some(v) if !v.trim().is_empty() => v.parse()?,
            _ => DbBackend::Sqlite,
        };
        let url = match (non_empty(lookup("VACATION_DB_URL")), backend) {
            (Some(url), _) => SecretString::from(url),
            (None, DbBackend::Sqlite) => defaults.database.url.clone(),
            (None, _) => return Err(ConfigError::MissingEnvVar("VACATION_DB_URL".into())),
        };

        let smtp = SmtpConfig {
            // An explicitly empty server selects MX delivery.
            server: match lookup("VACATION_SMTP_SERVER") {
                Some(v) => non_empty(Some(v)),
                None => defaults.smtp.server.clone(),
            },
            port: parse_or("VACATION_SMTP_PORT", lookup("VACATION_SMTP_PORT"), 25)?,
            helo: non_empty(lookup("VACATION_SMTP_HELO")).unwrap_or(defaults.smtp.helo.clone()),
            ssl: parse_bool("VACATION_SMTP_SSL", lookup("VACATION_SMTP_SSL"))?,
            timeout: Duration::from_secs(parse_or(
                "VACATION_SMTP_TIMEOUT_SECS",
                lookup("VACATION_SMTP_TIMEOUT_SECS"),
                120,
            )?),
            auth_id: non_empty(lookup("VACATION_SMTP_AUTH_ID")),
            auth_password: non_empty(lookup("VACATION_SMTP_AUTH_PASSWORD")).map(SecretString::from),
        };

        let sendmail_bin = match non_empty(lookup("VACATION_SENDMAIL_BIN")) {
            Some(path) if path.starts_with('/') => Some(PathBuf::from(path)),
            Some(path) => {
                return Err(ConfigError::InvalidValue {
                    key: "VACATION_SENDMAIL_BIN".into(),
                    message: format!("'{path}' is not an absolute path"),
                });
            }
            None => None,
        };

        let date_format =
            non_empty(lookup("VACATION_DATE_FORMAT")).unwrap_or(defaults.date_format.clone());
        if StrftimeItems::new(&date_format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::InvalidValue {
                key: "VACATION_DATE_FORMAT".into(),
                message: format!("'{date_format}' is not a valid strftime format"),
            });
        }

        Ok(Self {
            database: DatabaseConfig { backend, url },
            vacation_domain: non_empty(lookup("VACATION_DOMAIN"))
                .map(|d| d.to_lowercase())
                .unwrap_or(defaults.vacation_domain),
            recipient_delimiter: lookup("VACATION_RECIPIENT_DELIMITER")
                .unwrap_or(defaults.recipient_delimiter),
            smtp,
            sendmail_bin,
            friendly_from: non_empty(lookup("VACATION_FRIENDLY_FROM")),
            accountname_check: parse_bool(
                "VACATION_ACCOUNTNAME_CHECK",
                lookup("VACATION_ACCOUNTNAME_CHECK"),
            )?,
            noreply_pattern: compile_pattern(
                "VACATION_NOREPLY_PATTERN",
                lookup("VACATION_NOREPLY_PATTERN"),
            )?,
            no_vacation_pattern: compile_pattern(
                "VACATION_NO_VACATION_PATTERN",
                lookup("VACATION_NO_VACATION_PATTERN"),
            )?,
            date_format,
            x_loop: non_empty(lookup("VACATION_X_LOOP")).unwrap_or(defaults.x_loop),
            max_alias_hops: defaults.max_alias_hops,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match non_empty(value) {
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.into(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, value: Option<String>) -> Result<bool, ConfigError> {
    match non_empty(value).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("0" | "false" | "no" | "off") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some(other) => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("'{other}' is not a boolean"),
        }),
    }
}

fn compile_pattern(key: &str, value: Option<String>) -> Result<Option<Regex>, ConfigError> {
    non_empty(value)
        .map(|pattern| {
            RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| ConfigError::InvalidPattern {
                    key: key.into(),
                    source,
                })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.database.backend, DbBackend::Sqlite);
        assert_eq!(config.smtp.server.as_deref(), Some("localhost"));
        assert_eq!(config.smtp.port, 25);
        assert_eq!(config.smtp.timeout, Duration::from_secs(120));
        assert_eq!(config.date_format, "%Y-%m-%d");
        assert_eq!(config.x_loop, DEFAULT_X_LOOP);
        assert_eq!(config.max_alias_hops, 20);
        assert!(config.sendmail_bin.is_none());
    }

    #[test]
    fn empty_smtp_server_selects_mx() {
        let config = from_pairs(&[("VACATION_SMTP_SERVER", "")]).unwrap();
        assert!(config.smtp.server.is_none());
    }

    #[test]
    fn server_backend_requires_url() {
        let err = from_pairs(&[("VACATION_DB_TYPE", "postgres")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));

        let config = from_pairs(&[
            ("VACATION_DB_TYPE", "mariadb"),
            ("VACATION_DB_URL", "mysql://u:p@localhost/postfix"),
        ])
        .unwrap();
        assert_eq!(config.database.backend, DbBackend::Mysql);
        assert_eq!(
            config.database.url.expose_secret(),
            "mysql://u:p@localhost/postfix"
        );
    }

    #[test]
    fn unknown_backend_rejected() {
        assert!(from_pairs(&[("VACATION_DB_TYPE", "oracle")]).is_err());
    }

    #[test]
    fn invalid_pattern_rejected() {
        let err = from_pairs(&[("VACATION_NOREPLY_PATTERN", "(unclosed")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn patterns_are_case_insensitive() {
        let config = from_pairs(&[("VACATION_NO_VACATION_PATTERN", r"info@example\.org")]).unwrap();
        assert!(config.no_vacation_pattern.unwrap().is_match("INFO@Example.org"));
    }

    #[test]
    fn relative_sendmail_rejected() {
        assert!(from_pairs(&[("VACATION_SENDMAIL_BIN", "sendmail")]).is_err());
        let config = from_pairs(&[("VACATION_SENDMAIL_BIN", "/usr/sbin/sendmail")]).unwrap();
        assert_eq!(config.sendmail_bin, Some(PathBuf::from("/usr/sbin/sendmail")));
    }

    #[test]
    fn invalid_date_format_rejected() {
        assert!(from_pairs(&[("VACATION_DATE_FORMAT", "%Q")]).is_err());
        let config = from_pairs(&[("VACATION_DATE_FORMAT", "%d/%m/%Y")]).unwrap();
        assert_eq!(config.date_format, "%d/%m/%Y");
    }

    #[test]
    fn bad_numbers_and_booleans_rejected() {
        assert!(from_pairs(&[("VACATION_SMTP_PORT", "smtp")]).is_err());
        assert!(from_pairs(&[("VACATION_SMTP_SSL", "maybe")]).is_err());
        let config = from_pairs(&[("VACATION_SMTP_SSL", "yes")]).unwrap();
        assert!(config.smtp.ssl);
    }
}
