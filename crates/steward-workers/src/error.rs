use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker not found: {id}")]
    NotFound { id: String },

    #[error("worker {id} is not awaiting clarification (status: {status})")]
    NotAwaitingClarification { id: String, status: String },

    #[error("no prompt template for task type '{task_type}'")]
    UnknownTaskType { task_type: String },

    #[error("agent process error: {0}")]
    Agent(String),

    #[error(transparent)]
    Storage(#[from] steward_storage::StorageError),

    #[error(transparent)]
    Notify(#[from] steward_notify::NotifyError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
