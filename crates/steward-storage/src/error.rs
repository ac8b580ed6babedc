use thiserror::Error;

/// Errors surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A migration could not be applied. Startup must abort on this —
    /// continuing against a half-migrated schema corrupts data.
    #[error("migration '{name}' failed: {reason}")]
    Migration { name: String, reason: String },

    /// The row a caller asked for does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Outbound email rejected before enqueue; nothing was written.
    #[error("email rate limit exceeded for hour {hour_bucket}: {sent} sent, max {max}")]
    RateLimited {
        hour_bucket: String,
        sent: i64,
        max: i64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
