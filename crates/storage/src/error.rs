//! Error types for the reference-data gateway.

use thiserror::Error;

/// Result type alias using GatewayError.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors returned by a [`ReferenceGateway`](crate::ReferenceGateway).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A referenced identifier is not registered in the store.
    #[error("{field} not found in the DB: {value}")]
    NotFound { field: &'static str, value: String },

    /// Integrity constraint violation (unique key, foreign key, check).
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// The store could not be reached or the connection failed.
    #[error("Store unavailable: {0}")]
    Transport(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl GatewayError {
    pub fn not_found(field: &'static str, value: impl Into<String>) -> Self {
        GatewayError::NotFound {
            field,
            value: value.into(),
        }
    }

    /// Classify a sqlx error, prefixing the message with `context`.
    pub fn from_sqlx(context: &str, err: sqlx::Error) -> Self {
        match &err {
            // SQLSTATE class 23: integrity constraint violation
            sqlx::Error::Database(db_err)
                if db_err.code().is_some_and(|code| code.starts_with("23")) =>
            {
                let constraint = db_err.constraint().unwrap_or("unnamed constraint");
                GatewayError::Conflict(format!(
                    "{}: {} ({})",
                    context,
                    db_err.message(),
                    constraint
                ))
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => {
                GatewayError::Transport(format!("{}: {}", context, err))
            }
            _ => GatewayError::Store(format!("{}: {}", context, err)),
        }
    }
}
