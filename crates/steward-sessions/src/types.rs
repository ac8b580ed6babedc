use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use steward_core::types::{Mode, Role, SessionState};

/// A persisted session row - one agent process instance in a tmux window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Short opaque id (8 hex chars).
    pub session_id: String,
    /// Logical thread this session belongs to; survives resets and handoffs.
    pub conversation_id: String,
    /// Predecessor in the same conversation, set on handoff.
    pub parent_session_id: Option<String>,
    pub role: Role,
    pub mode: Mode,
    pub window_name: Option<String>,
    pub tmux_pane: Option<String>,
    pub cwd: Option<String>,
    /// Transcript JSONL written by the external agent runtime.
    pub transcript_path: Option<String>,
    /// Full UUID handed to the agent binary via --session-id.
    pub agent_session_id: Option<String>,
    pub spec_path: Option<String>,
    pub mission_execution_id: Option<String>,
    pub description: Option<String>,
    pub status_text: Option<String>,
    pub current_state: SessionState,
    pub started_at: String,
    pub last_seen_at: String,
    pub ended_at: Option<String>,
    pub end_reason: Option<String>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Map a full `SELECT *`-ordered row (see [`crate::manager::SESSION_COLUMNS`]).
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let role_str: String = row.get(3)?;
        let mode_str: String = row.get(4)?;
        let state_str: String = row.get(14)?;
        Ok(Session {
            session_id: row.get(0)?,
            conversation_id: row.get(1)?,
            parent_session_id: row.get(2)?,
            // Unknown strings from older rows degrade to chief/interactive
            // rather than poisoning every list query.
            role: Role::from_str(&role_str).unwrap_or(Role::Chief),
            mode: Mode::from_str(&mode_str).unwrap_or(Mode::Interactive),
            window_name: row.get(5)?,
            tmux_pane: row.get(6)?,
            cwd: row.get(7)?,
            transcript_path: row.get(8)?,
            agent_session_id: row.get(9)?,
            spec_path: row.get(10)?,
            mission_execution_id: row.get(11)?,
            description: row.get(12)?,
            status_text: row.get(13)?,
            current_state: SessionState::from_str(&state_str).unwrap_or_default(),
            started_at: row.get(15)?,
            last_seen_at: row.get(16)?,
            ended_at: row.get(17)?,
            end_reason: row.get(18)?,
        })
    }
}

/// Why a session cycled to a successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffReason {
    ContextLow,
    ChiefCycle,
    DutyReset,
    ForceReset,
    MissionExecution,
}

impl HandoffReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffReason::ContextLow => "context_low",
            HandoffReason::ChiefCycle => "chief_cycle",
            HandoffReason::DutyReset => "duty_reset",
            HandoffReason::ForceReset => "force_reset",
            HandoffReason::MissionExecution => "mission_execution",
        }
    }
}

impl fmt::Display for HandoffReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandoffReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "context_low" => Ok(HandoffReason::ContextLow),
            "chief_cycle" => Ok(HandoffReason::ChiefCycle),
            "duty_reset" => Ok(HandoffReason::DutyReset),
            "force_reset" => Ok(HandoffReason::ForceReset),
            "mission_execution" => Ok(HandoffReason::MissionExecution),
            other => Err(format!("unknown handoff reason: {}", other)),
        }
    }
}

/// Everything `spawn` needs. Only role and mode are required.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    pub role: Option<Role>,
    pub mode: Option<Mode>,
    pub window_name: Option<String>,
    pub description: Option<String>,
    pub project_path: Option<String>,
    pub handoff_path: Option<String>,
    pub handoff_content: Option<String>,
    pub handoff_reason: Option<String>,
    pub mission_slug: Option<String>,
    pub mission_execution_id: Option<String>,
    pub initial_task: Option<String>,
    pub conversation_id: Option<String>,
    pub parent_session_id: Option<String>,
    pub spec_path: Option<String>,
    pub skip_ready_wait: bool,
}

impl SpawnRequest {
    pub fn new(role: Role, mode: Mode) -> Self {
        Self {
            role: Some(role),
            mode: Some(mode),
            ..Default::default()
        }
    }

    pub fn role(&self) -> Role {
        self.role.unwrap_or(Role::Chief)
    }

    pub fn mode(&self) -> Mode {
        self.mode.unwrap_or(Mode::Interactive)
    }
}

/// Result of a spawn or handoff. Failures are data here, not errors - the
/// schedulers branch on `ok` and keep their loops alive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnResult {
    pub ok: bool,
    pub session_id: Option<String>,
    pub window_name: Option<String>,
    pub conversation_id: Option<String>,
    pub error: Option<String>,
}

impl SpawnResult {
    pub fn success(session_id: String, window_name: String, conversation_id: String) -> Self {
        Self {
            ok: true,
            session_id: Some(session_id),
            window_name: Some(window_name),
            conversation_id: Some(conversation_id),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            session_id: None,
            window_name: None,
            conversation_id: None,
            error: Some(error.into()),
        }
    }
}

/// Formatted message kinds accepted by `send_to_chief`.
#[derive(Debug, Clone)]
pub enum ChiefMessage {
    /// Periodic or calendar-driven wake with full context payload.
    Wake {
        wake_type: String,
        minutes_since_last: i64,
        event_title: Option<String>,
    },
    /// Fire-and-forget note; chief files it and moves on.
    Drop(String),
    Bug(String),
    Idea(String),
    /// Rapid capture of several items at once.
    Dump(String),
    /// Verbatim passthrough.
    Say(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handoff_reason_round_trip() {
        for reason in [
            HandoffReason::ContextLow,
            HandoffReason::DutyReset,
            HandoffReason::MissionExecution,
        ] {
            assert_eq!(HandoffReason::from_str(reason.as_str()).unwrap(), reason);
        }
    }

    #[test]
    fn spawn_result_constructors() {
        let ok = SpawnResult::success("abc12345".into(), "chief".into(), "chief".into());
        assert!(ok.ok);
        assert!(ok.error.is_none());

        let err = SpawnResult::failure("window busy");
        assert!(!err.ok);
        assert_eq!(err.error.as_deref(), Some("window busy"));
        assert!(err.session_id.is_none());
    }
}
