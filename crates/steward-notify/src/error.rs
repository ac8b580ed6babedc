use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Storage(#[from] steward_storage::StorageError),

    #[error(transparent)]
    Tmux(#[from] steward_tmux::TmuxError),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
