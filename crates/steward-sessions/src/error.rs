use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {id}")]
    NotFound { id: String },

    #[error("agent already running in window '{window}'")]
    WindowBusy { window: String },

    #[error("agent did not become ready within {secs}s")]
    ReadyTimeout { secs: u64 },

    #[error(transparent)]
    Storage(#[from] steward_storage::StorageError),

    #[error(transparent)]
    Tmux(#[from] steward_tmux::TmuxError),

    #[error(transparent)]
    Notify(#[from] steward_notify::NotifyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
