use std::str::FromStr;

use serde::{Deserialize, Serialize};

use steward_core::types::{Mode, Role};

/// A scheduled or triggered specialist job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    /// core_default | custom_app | user
    pub source: String,
    pub app_slug: Option<String>,
    pub prompt_file: Option<String>,
    pub prompt_inline: Option<String>,
    /// time | cron | None (triggered or manual)
    pub schedule_type: Option<String>,
    /// HH:MM in the user's home timezone.
    pub schedule_time: Option<String>,
    /// Weekday names (mon..sun); empty means every day.
    pub schedule_days: Vec<String>,
    pub schedule_cron: Option<String>,
    pub trigger_type: Option<String>,
    pub timeout_minutes: i64,
    pub role: Role,
    pub mode: Mode,
    pub enabled: bool,
    pub next_run: Option<String>,
    pub last_run: Option<String>,
    pub last_status: Option<String>,
}

impl Mission {
    pub fn is_recurring(&self) -> bool {
        self.schedule_type.is_some()
    }

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let role_str: String = row.get(13)?;
        let mode_str: String = row.get(14)?;
        let days_json: Option<String> = row.get(8)?;
        Ok(Mission {
            id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            source: row.get(4)?,
            app_slug: row.get(5)?,
            prompt_file: row.get(6)?,
            prompt_inline: row.get(7)?,
            schedule_days: days_json
                .and_then(|j| serde_json::from_str(&j).ok())
                .unwrap_or_default(),
            schedule_type: row.get(9)?,
            schedule_time: row.get(10)?,
            schedule_cron: row.get(11)?,
            trigger_type: row.get(12)?,
            role: Role::from_str(&role_str).unwrap_or(Role::Worker),
            mode: Mode::from_str(&mode_str).unwrap_or(Mode::Mission),
            timeout_minutes: row.get(15)?,
            enabled: row.get::<_, i64>(16)? != 0,
            next_run: row.get(17)?,
            last_run: row.get(18)?,
            last_status: row.get(19)?,
        })
    }
}

/// Column list matching [`Mission::from_row`] ordinals.
pub const MISSION_COLUMNS: &str = "id, slug, name, description, source, app_slug, prompt_file, \
     prompt_inline, schedule_days_json, schedule_type, schedule_time, schedule_cron, \
     trigger_type, role, mode, timeout_minutes, enabled, next_run, last_run, last_status";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionExecution {
    pub id: String,
    pub mission_id: String,
    pub mission_slug: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: String,
    pub session_id: Option<String>,
    pub output_summary: Option<String>,
    pub error: Option<String>,
    pub duration_seconds: Option<f64>,
}

impl MissionExecution {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(MissionExecution {
            id: row.get(0)?,
            mission_id: row.get(1)?,
            mission_slug: row.get(2)?,
            started_at: row.get(3)?,
            ended_at: row.get(4)?,
            status: row.get(5)?,
            session_id: row.get(6)?,
            output_summary: row.get(7)?,
            error: row.get(8)?,
            duration_seconds: row.get(9)?,
        })
    }
}

pub const MISSION_EXECUTION_COLUMNS: &str =
    "id, mission_id, mission_slug, started_at, ended_at, status, session_id, \
     output_summary, error, duration_seconds";

/// Chief-only scheduled work. Same shape as a mission but core-provided and
/// deliberately without `next_run` - due-ness is recomputed from `last_run`
/// on every check so missed days self-heal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Duty {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub prompt_file: String,
    /// HH:MM in the user's home timezone.
    pub schedule_time: String,
    pub timeout_minutes: i64,
    pub enabled: bool,
    pub last_run: Option<String>,
    pub last_status: Option<String>,
}

impl Duty {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Duty {
            id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            prompt_file: row.get(4)?,
            schedule_time: row.get(5)?,
            timeout_minutes: row.get(6)?,
            enabled: row.get::<_, i64>(7)? != 0,
            last_run: row.get(8)?,
            last_status: row.get(9)?,
        })
    }
}

pub const DUTY_COLUMNS: &str = "id, slug, name, description, prompt_file, schedule_time, \
     timeout_minutes, enabled, last_run, last_status";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DutyExecution {
    pub id: String,
    pub duty_id: String,
    pub duty_slug: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: String,
    pub session_id: Option<String>,
    pub error: Option<String>,
}

impl DutyExecution {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(DutyExecution {
            id: row.get(0)?,
            duty_id: row.get(1)?,
            duty_slug: row.get(2)?,
            started_at: row.get(3)?,
            ended_at: row.get(4)?,
            status: row.get(5)?,
            session_id: row.get(6)?,
            error: row.get(7)?,
        })
    }
}

pub const DUTY_EXECUTION_COLUMNS: &str =
    "id, duty_id, duty_slug, started_at, ended_at, status, session_id, error";
