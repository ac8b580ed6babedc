//! Messaging and notification core.
//!
//! Two jobs: wake a conversation when workers finish (announcing each worker
//! at most once per conversation, ever), and deliver a session's bootstrap
//! prompt with the cadence the agent TUI needs.

pub mod error;
pub mod notifier;

pub use error::NotifyError;
pub use notifier::{Notifier, WakeOutcome};
