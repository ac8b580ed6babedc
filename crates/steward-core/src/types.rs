use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Agent role a session runs as.
///
/// `Chief` is special: there is exactly one eternal chief conversation and
/// its sessions always live in the stable `chief` tmux window. Everything
/// else is a specialist spawned on demand or by the mission scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Chief,
    Builder,
    DeepWork,
    Project,
    Idea,
    Writer,
    Researcher,
    Curator,
    Worker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Chief => "chief",
            Role::Builder => "builder",
            Role::DeepWork => "deep-work",
            Role::Project => "project",
            Role::Idea => "idea",
            Role::Writer => "writer",
            Role::Researcher => "researcher",
            Role::Curator => "curator",
            Role::Worker => "worker",
        }
    }

    pub fn is_chief(&self) -> bool {
        matches!(self, Role::Chief)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "chief" => Ok(Role::Chief),
            "builder" => Ok(Role::Builder),
            "deep-work" => Ok(Role::DeepWork),
            "project" => Ok(Role::Project),
            "idea" => Ok(Role::Idea),
            "writer" => Ok(Role::Writer),
            "researcher" => Ok(Role::Researcher),
            "curator" => Ok(Role::Curator),
            "worker" => Ok(Role::Worker),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// How a session is driven.
///
/// `Preparation`, `Implementation` and `Verification` are the specialist
/// pipeline modes - they get a per-conversation workspace directory.
/// `Summarizer` sessions are short-lived context condensers; the stream
/// layer treats transitions into/out of them specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Interactive,
    Background,
    Mission,
    Preparation,
    Implementation,
    Verification,
    Summarizer,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Interactive => "interactive",
            Mode::Background => "background",
            Mode::Mission => "mission",
            Mode::Preparation => "preparation",
            Mode::Implementation => "implementation",
            Mode::Verification => "verification",
            Mode::Summarizer => "summarizer",
        }
    }

    /// Modes that get a `Desktop/conversations/{conversation_id}/` workspace.
    pub fn uses_workspace(&self) -> bool {
        matches!(
            self,
            Mode::Preparation | Mode::Implementation | Mode::Verification
        )
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "interactive" => Ok(Mode::Interactive),
            "background" => Ok(Mode::Background),
            "mission" => Ok(Mode::Mission),
            "preparation" => Ok(Mode::Preparation),
            "implementation" => Ok(Mode::Implementation),
            "verification" => Ok(Mode::Verification),
            "summarizer" => Ok(Mode::Summarizer),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Coarse liveness state of a session, mirrored to the DB for dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Active,
    ToolActive,
    Ended,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Active => "active",
            SessionState::ToolActive => "tool_active",
            SessionState::Ended => "ended",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SessionState::Idle),
            "active" => Ok(SessionState::Active),
            "tool_active" => Ok(SessionState::ToolActive),
            "ended" => Ok(SessionState::Ended),
            other => Err(format!("unknown session state: {}", other)),
        }
    }
}

/// Mint a short opaque session id (8 hex chars).
///
/// This is the *internal* id. The external agent binary gets a fresh full
/// UUID per spawn via `--session-id`; the two must never be conflated.
pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Mint a conversation id for a specialist role.
///
/// Format: `YYYYMMDD-HHMM-{role}-{rand}` so conversations sort
/// chronologically in listings. The chief conversation is the literal
/// `"chief"` and never goes through here.
pub fn specialist_conversation_id(role: Role, now_local: chrono::NaiveDateTime) -> String {
    format!(
        "{}-{}-{}",
        now_local.format("%Y%m%d-%H%M"),
        role,
        &Uuid::new_v4().simple().to_string()[..8]
    )
}

/// The chief's eternal conversation id.
pub const CHIEF_CONVERSATION_ID: &str = "chief";

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn role_round_trip() {
        for role in [Role::Chief, Role::DeepWork, Role::Worker] {
            assert_eq!(Role::from_str(role.as_str()).unwrap(), role);
        }
    }

    #[test]
    fn unknown_role_is_err() {
        assert!(Role::from_str("manager").is_err());
    }

    #[test]
    fn workspace_modes() {
        assert!(Mode::Preparation.uses_workspace());
        assert!(Mode::Verification.uses_workspace());
        assert!(!Mode::Interactive.uses_workspace());
        assert!(!Mode::Mission.uses_workspace());
    }

    #[test]
    fn short_id_is_eight_chars() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn specialist_conversation_id_sorts_by_time() {
        let t = chrono::NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(9, 26, 0)
            .unwrap();
        let id = specialist_conversation_id(Role::Researcher, t);
        assert!(id.starts_with("20260314-0926-researcher-"));
    }
}
