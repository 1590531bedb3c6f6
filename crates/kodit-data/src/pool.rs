//! Database connection pool management
//!
//! One pool type spans both persistence dialects. The `db_url` scheme
//! selects SQLite (single file under the data dir) or PostgreSQL; all
//! query code runs against the sqlx `Any` driver with a schema restricted
//! to types both backends share.

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::sync::Once;

use crate::error::{DatabaseError, DatabaseResult};
use crate::migrations::run_migrations;

static INSTALL_DRIVERS: Once = Once::new();

/// Persistence dialect selected by the database URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Derive the dialect from a database URL
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unrecognised schemes.
    pub fn from_url(url: &str) -> DatabaseResult<Self> {
        if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else {
            Err(DatabaseError::Configuration {
                message: format!("unsupported database URL scheme: {url}"),
            })
        }
    }

    /// The auto-incrementing primary key clause for this dialect
    pub(crate) const fn pk_clause(self) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Self::Postgres => "BIGSERIAL PRIMARY KEY",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Postgres => write!(f, "postgres"),
        }
    }
}

/// Shared connection pool plus its dialect
#[derive(Clone)]
pub struct DbPool {
    pool: AnyPool,
    dialect: Dialect,
}

impl DbPool {
    /// Connect to the database named by `db_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is unsupported or the pool cannot be
    /// created.
    pub async fn connect(db_url: &str, max_connections: u32) -> DatabaseResult<Self> {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

        let dialect = Dialect::from_url(db_url)?;
        let url = match dialect {
            // Create the database file on first run
            Dialect::Sqlite if !db_url.contains("mode=") && !db_url.contains(":memory:") => {
                if db_url.contains('?') {
                    format!("{db_url}&mode=rwc")
                } else {
                    format!("{db_url}?mode=rwc")
                }
            }
            _ => db_url.to_string(),
        };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await
            .map_err(|e| DatabaseError::PoolCreationFailed {
                url: db_url.to_string(),
                message: e.to_string(),
                source: e,
            })?;

        Ok(Self { pool, dialect })
    }

    /// Connect and bring the schema up to date
    ///
    /// # Errors
    ///
    /// Returns an error if connecting or any pending migration fails.
    pub async fn initialize(db_url: &str, max_connections: u32) -> DatabaseResult<Self> {
        let db = Self::connect(db_url, max_connections).await?;
        run_migrations(&db).await?;
        Ok(db)
    }

    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub const fn inner(&self) -> &AnyPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(Dialect::from_url("sqlite::memory:").unwrap(), Dialect::Sqlite);
        assert_eq!(
            Dialect::from_url("sqlite:///var/kodit/kodit.db").unwrap(),
            Dialect::Sqlite
        );
        assert_eq!(
            Dialect::from_url("postgres://localhost/kodit").unwrap(),
            Dialect::Postgres
        );
        assert!(Dialect::from_url("mysql://localhost/kodit").is_err());
    }

    #[tokio::test]
    async fn test_initialize_in_memory() {
        let db = DbPool::initialize("sqlite::memory:", 1).await.unwrap();
        assert_eq!(db.dialect(), Dialect::Sqlite);
    }
}
