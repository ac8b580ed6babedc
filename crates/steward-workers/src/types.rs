use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Snoozed,
    Cancelled,
    AwaitingClarification,
    ClarificationAnswered,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Pending => "pending",
            WorkerStatus::Running => "running",
            WorkerStatus::Complete => "complete",
            WorkerStatus::Failed => "failed",
            WorkerStatus::Snoozed => "snoozed",
            WorkerStatus::Cancelled => "cancelled",
            WorkerStatus::AwaitingClarification => "awaiting_clarification",
            WorkerStatus::ClarificationAnswered => "clarification_answered",
        }
    }

    /// States in which the worker row must carry a report (or a synthesized
    /// failure body).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerStatus::Complete
                | WorkerStatus::Failed
                | WorkerStatus::Cancelled
                | WorkerStatus::Snoozed
        )
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkerStatus::Pending),
            "running" => Ok(WorkerStatus::Running),
            "complete" => Ok(WorkerStatus::Complete),
            "failed" => Ok(WorkerStatus::Failed),
            "snoozed" => Ok(WorkerStatus::Snoozed),
            "cancelled" => Ok(WorkerStatus::Cancelled),
            "awaiting_clarification" => Ok(WorkerStatus::AwaitingClarification),
            "clarification_answered" => Ok(WorkerStatus::ClarificationAnswered),
            other => Err(format!("unknown worker status: {}", other)),
        }
    }
}

/// What kind of attention a finished worker is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionKind {
    Result,
    Clarification,
    Alert,
    Followup,
}

impl AttentionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttentionKind::Result => "result",
            AttentionKind::Clarification => "clarification",
            AttentionKind::Alert => "alert",
            AttentionKind::Followup => "followup",
        }
    }
}

impl fmt::Display for AttentionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued LLM invocation belonging to a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRow {
    pub id: String,
    pub task_type: String,
    pub params: serde_json::Value,
    pub spawned_by_session: Option<String>,
    pub conversation_id: Option<String>,
    pub depends_on: Vec<String>,
    pub execute_at: Option<String>,
    pub status: WorkerStatus,
    pub report_md: Option<String>,
    pub report_summary: Option<String>,
    pub clarification_session_id: Option<String>,
    pub clarification_answer: Option<String>,
    pub agent_session_id: Option<String>,
    pub created_at: String,
}

impl WorkerRow {
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let status_str: String = row.get(7)?;
        let params_json: Option<String> = row.get(2)?;
        let depends_json: Option<String> = row.get(5)?;
        Ok(WorkerRow {
            id: row.get(0)?,
            task_type: row.get(1)?,
            params: params_json
                .and_then(|j| serde_json::from_str(&j).ok())
                .unwrap_or(serde_json::Value::Null),
            spawned_by_session: row.get(3)?,
            conversation_id: row.get(4)?,
            depends_on: depends_json
                .and_then(|j| serde_json::from_str(&j).ok())
                .unwrap_or_default(),
            execute_at: row.get(6)?,
            status: WorkerStatus::from_str(&status_str).unwrap_or(WorkerStatus::Pending),
            report_md: row.get(8)?,
            report_summary: row.get(9)?,
            clarification_session_id: row.get(10)?,
            clarification_answer: row.get(11)?,
            agent_session_id: row.get(12)?,
            created_at: row.get(13)?,
        })
    }
}

/// Column list matching [`WorkerRow::from_row`] ordinals.
pub const WORKER_COLUMNS: &str = "id, task_type, params_json, spawned_by_session, conversation_id, \
     depends_on_json, execute_at, status, report_md, report_summary, \
     clarification_session_id, clarification_answer, agent_session_id, created_at";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            WorkerStatus::Pending,
            WorkerStatus::AwaitingClarification,
            WorkerStatus::ClarificationAnswered,
        ] {
            assert_eq!(WorkerStatus::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn terminal_states() {
        assert!(WorkerStatus::Complete.is_terminal());
        assert!(WorkerStatus::Snoozed.is_terminal());
        assert!(!WorkerStatus::Running.is_terminal());
        assert!(!WorkerStatus::AwaitingClarification.is_terminal());
    }
}
