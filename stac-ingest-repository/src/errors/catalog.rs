//! Errors that can occur while reading or writing catalog items.
use thiserror::Error;

/// Represents errors that can occur within the catalog repository.
#[derive(Debug, Error)]
pub enum CatalogRepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl CatalogRepositoryError {
    /// SQLSTATE of the underlying database error, if any.
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            Self::DatabaseError(sqlx::Error::Database(db)) => db.code().map(|code| code.into_owned()),
            _ => None,
        }
    }

    /// Whether the store rejected the data itself (SQLSTATE class 23).
    ///
    /// Such a failure belongs to the rows being written and will repeat on every
    /// attempt with the same data.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::ConstraintViolation(_) => true,
            _ => self
                .sqlstate()
                .is_some_and(|code| code.starts_with("23")),
        }
    }

    /// Whether the same write may succeed when attempted again later.
    ///
    /// Covers pool and connection failures plus the SQLSTATE classes for
    /// connection exceptions (08), rollbacks such as deadlocks (40), insufficient
    /// resources (53) and operator intervention including statement timeouts (57).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::DatabaseError(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(_) => self.sqlstate().is_some_and(|code| {
                    ["08", "40", "53", "57"]
                        .iter()
                        .any(|class| code.starts_with(class))
                }),
                _ => false,
            },
            _ => false,
        }
    }
}
