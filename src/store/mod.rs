//! Persistence layer: the admin application's directory tables.
//!
//! The engine only talks to [`DirectoryStore`]; [`open`] picks the dialect
//! from configuration.

pub mod libsql_backend;
pub mod migrations;
pub mod mysql_backend;
pub mod postgres_backend;
pub mod traits;

use std::path::Path;

use secrecy::ExposeSecret;

use crate::config::{DatabaseConfig, DbBackend};
use crate::error::DatabaseError;

pub use libsql_backend::LibSqlBackend;
pub use mysql_backend::MysqlBackend;
pub use postgres_backend::PostgresBackend;
pub use traits::{DirectoryStore, InsertOutcome, VacationReply};

/// Open the configured directory store.
pub async fn open(config: &DatabaseConfig) -> Result<Box<dyn DirectoryStore>, DatabaseError> {
    let url = config.url.expose_secret();
    match config.backend {
        DbBackend::Sqlite => {
            let path = url.strip_prefix("sqlite://").unwrap_or(url);
            Ok(Box::new(LibSqlBackend::new_local(Path::new(path)).await?))
        }
        DbBackend::Postgres => Ok(Box::new(PostgresBackend::connect(url).await?)),
        DbBackend::Mysql => Ok(Box::new(MysqlBackend::connect(url)?)),
    }
}
