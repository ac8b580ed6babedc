use serde::{Deserialize, Serialize};

/// Events delivered over the conversation SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Initial event after connecting.
    Connected {
        timestamp: String,
        conversation_id: String,
    },
    /// One transcript event from the watched JSONL file.
    Transcript { event: serde_json::Value },
    /// Live agent activity; emitted only on change.
    Activity { data: ActivityData },
    /// Context-budget warning; `should_warn: false` clears a prior warning.
    ContextWarning { data: ContextWarningData },
    /// Snapshot of the agent's todo list; emitted only on change.
    Tasks { data: TasksData },
    /// Model and cost info; emitted on change.
    SessionMeta { data: SessionMetaData },
    /// The conversation's underlying session changed.
    SessionBoundary {
        timestamp: String,
        old_session_id: String,
        new_session_id: String,
        /// reset | summarizer | mode_transition
        boundary_type: String,
        prev_mode: Option<String>,
        mode: Option<String>,
        new_role: Option<String>,
        new_mode: Option<String>,
    },
    /// No active session remained after the grace period.
    ConversationEnded {
        timestamp: String,
        last_session_id: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityData {
    pub is_thinking: bool,
    pub active_task: Option<String>,
    pub last_task: Option<String>,
    pub elapsed_time: Option<String>,
    pub token_count: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextWarningData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_used: Option<i64>,
    pub should_warn: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_force_reset: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetaData {
    pub model: Option<String>,
    pub cost_usd: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TasksData {
    pub items: Vec<TodoItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    pub status: String,
    #[serde(rename = "activeForm", skip_serializing_if = "Option::is_none")]
    pub active_form: Option<String>,
    #[serde(rename = "blockedBy", default)]
    pub blocked_by: Vec<String>,
}
