use thiserror::Error;

#[derive(Debug, Error)]
pub enum StewardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Tmux error: {0}")]
    Tmux(String),

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Agent did not become ready within {secs}s")]
    AgentNotReady { secs: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, StewardError>;
