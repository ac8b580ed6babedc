use thiserror::Error;

#[derive(Debug, Error)]
pub enum TmuxError {
    /// The tmux binary could not be executed at all.
    #[error("failed to run tmux: {0}")]
    Spawn(String),

    /// tmux ran but reported failure (usually a missing target).
    #[error("tmux command failed: {0}")]
    CommandFailed(String),

    /// The named window or pane does not exist.
    #[error("target not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, TmuxError>;
