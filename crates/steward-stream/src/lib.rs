//! Conversation-level activity stream.
//!
//! Streams transcript and activity events for a CONVERSATION, not a session.
//! Session transitions (resets, handoffs, mode changes) are handled inside
//! the stream: the consumer sees a `session_boundary` event and keeps the
//! same connection.

pub mod conversation;
pub mod events;
pub mod status;
pub mod tailer;
pub mod tasks;

pub use conversation::{stream_conversation, SessionRef, StreamOptions};
pub use events::StreamEvent;
