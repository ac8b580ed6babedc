use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("mission not found: {slug}")]
    MissionNotFound { slug: String },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error(transparent)]
    Storage(#[from] steward_storage::StorageError),

    #[error(transparent)]
    Session(#[from] steward_sessions::SessionError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
