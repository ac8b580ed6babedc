//! Query helpers for missions, duties, and their execution rows.
//!
//! The schedulers are the only writers of scheduling state; everything here
//! goes through the shared [`Database`] handle.

use chrono::Utc;
use uuid::Uuid;

use steward_core::time::{now_iso, parse_iso};
use steward_storage::Database;

use crate::error::Result;
use crate::types::{
    Duty, DutyExecution, Mission, MissionExecution, DUTY_COLUMNS, DUTY_EXECUTION_COLUMNS,
    MISSION_COLUMNS, MISSION_EXECUTION_COLUMNS,
};

// --- missions ---------------------------------------------------------------

/// Enabled non-chief missions whose next_run has arrived.
pub fn due_missions(db: &Database, now_utc_iso: &str) -> Result<Vec<Mission>> {
    Ok(db.fetch_all(
        &format!(
            "SELECT {MISSION_COLUMNS} FROM missions
             WHERE enabled = 1 AND next_run IS NOT NULL AND next_run <= ?1
               AND role != 'chief'
             ORDER BY next_run"
        ),
        [now_utc_iso],
        Mission::from_row,
    )?)
}

pub fn get_mission(db: &Database, slug: &str) -> Result<Option<Mission>> {
    Ok(db.fetch_one(
        &format!("SELECT {MISSION_COLUMNS} FROM missions WHERE slug = ?1"),
        [slug],
        Mission::from_row,
    )?)
}

pub fn clear_next_run(db: &Database, mission_id: &str) -> Result<()> {
    db.execute(
        "UPDATE missions SET next_run = NULL, updated_at = ?1 WHERE id = ?2",
        rusqlite::params![now_iso(), mission_id],
    )?;
    Ok(())
}

pub fn set_next_run(db: &Database, mission_id: &str, next_run: &str) -> Result<()> {
    db.execute(
        "UPDATE missions SET next_run = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![next_run, now_iso(), mission_id],
    )?;
    Ok(())
}

pub fn update_mission_last_run(db: &Database, mission_id: &str, status: &str) -> Result<()> {
    let now = now_iso();
    db.execute(
        "UPDATE missions SET last_run = ?1, last_status = ?2, updated_at = ?1 WHERE id = ?3",
        rusqlite::params![now, status, mission_id],
    )?;
    Ok(())
}

pub fn create_mission_execution(db: &Database, mission_id: &str, slug: &str) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    db.execute(
        "INSERT INTO mission_executions (id, mission_id, mission_slug, started_at, status)
         VALUES (?1, ?2, ?3, ?4, 'running')",
        rusqlite::params![id, mission_id, slug, now_iso()],
    )?;
    Ok(id)
}

pub fn set_execution_session(db: &Database, execution_id: &str, session_id: &str) -> Result<()> {
    db.execute(
        "UPDATE mission_executions SET session_id = ?1 WHERE id = ?2",
        rusqlite::params![session_id, execution_id],
    )?;
    Ok(())
}

pub fn complete_mission_execution(
    db: &Database,
    execution_id: &str,
    status: &str,
    error: Option<&str>,
) -> Result<()> {
    let now = Utc::now();
    let started: Option<String> = db.fetch_one(
        "SELECT started_at FROM mission_executions WHERE id = ?1",
        [execution_id],
        |row| row.get(0),
    )?;
    let duration = started
        .as_deref()
        .and_then(parse_iso)
        .map(|s| (now - s).num_milliseconds() as f64 / 1000.0);

    db.execute(
        "UPDATE mission_executions
         SET status = ?1, ended_at = ?2, error = ?3, duration_seconds = ?4
         WHERE id = ?5",
        rusqlite::params![status, now.to_rfc3339(), error, duration, execution_id],
    )?;
    Ok(())
}

pub fn get_mission_execution(db: &Database, execution_id: &str) -> Result<Option<MissionExecution>> {
    Ok(db.fetch_one(
        &format!("SELECT {MISSION_EXECUTION_COLUMNS} FROM mission_executions WHERE id = ?1"),
        [execution_id],
        MissionExecution::from_row,
    )?)
}

// --- duties -----------------------------------------------------------------

pub fn enabled_duties(db: &Database) -> Result<Vec<Duty>> {
    Ok(db.fetch_all(
        &format!("SELECT {DUTY_COLUMNS} FROM duties WHERE enabled = 1 ORDER BY schedule_time"),
        [],
        Duty::from_row,
    )?)
}

/// Register a core duty if absent. Duties are core-provided: user edits are
/// limited to the enabled flag, so existing rows only get name/prompt/time
/// refreshed.
pub fn upsert_duty(
    db: &Database,
    slug: &str,
    name: &str,
    prompt_file: &str,
    schedule_time: &str,
    timeout_minutes: i64,
) -> Result<()> {
    let now = now_iso();
    db.execute(
        "INSERT INTO duties (id, slug, name, prompt_file, schedule_time, timeout_minutes,
                             enabled, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)
         ON CONFLICT(slug) DO UPDATE SET
             name = excluded.name,
             prompt_file = excluded.prompt_file,
             schedule_time = excluded.schedule_time,
             timeout_minutes = excluded.timeout_minutes,
             updated_at = excluded.updated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            slug,
            name,
            prompt_file,
            schedule_time,
            timeout_minutes,
            now
        ],
    )?;
    Ok(())
}

pub fn update_duty_last_run(db: &Database, duty_id: &str, status: &str) -> Result<()> {
    let now = now_iso();
    db.execute(
        "UPDATE duties SET last_run = ?1, last_status = ?2, updated_at = ?1 WHERE id = ?3",
        rusqlite::params![now, status, duty_id],
    )?;
    Ok(())
}

pub fn create_duty_execution(db: &Database, duty_id: &str, slug: &str) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    db.execute(
        "INSERT INTO duty_executions (id, duty_id, duty_slug, started_at, status)
         VALUES (?1, ?2, ?3, ?4, 'running')",
        rusqlite::params![id, duty_id, slug, now_iso()],
    )?;
    Ok(id)
}

pub fn set_duty_execution_session(
    db: &Database,
    execution_id: &str,
    session_id: &str,
) -> Result<()> {
    db.execute(
        "UPDATE duty_executions SET session_id = ?1 WHERE id = ?2",
        rusqlite::params![session_id, execution_id],
    )?;
    Ok(())
}

pub fn complete_duty_execution(
    db: &Database,
    execution_id: &str,
    status: &str,
    error: Option<&str>,
) -> Result<()> {
    db.execute(
        "UPDATE duty_executions SET status = ?1, ended_at = ?2, error = ?3
         WHERE id = ?4 AND status = 'running'",
        rusqlite::params![status, now_iso(), error, execution_id],
    )?;
    Ok(())
}

pub fn get_duty_execution(db: &Database, execution_id: &str) -> Result<Option<DutyExecution>> {
    Ok(db.fetch_one(
        &format!("SELECT {DUTY_EXECUTION_COLUMNS} FROM duty_executions WHERE id = ?1"),
        [execution_id],
        DutyExecution::from_row,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_mission(db: &Database, slug: &str, role: &str, next_run: Option<&str>) {
        let now = now_iso();
        db.execute(
            "INSERT INTO missions
             (id, slug, name, role, mode, enabled, next_run, schedule_type, schedule_time,
              timeout_minutes, created_at, updated_at)
             VALUES (?1, ?2, ?2, ?3, 'mission', 1, ?4, 'time', '06:00', 30, ?5, ?5)",
            rusqlite::params![Uuid::new_v4().to_string(), slug, role, next_run, now],
        )
        .unwrap();
    }

    #[test]
    fn due_missions_excludes_chief_and_future() {
        let db = Database::open_in_memory().unwrap();
        insert_mission(&db, "inbox-sweep", "researcher", Some("2020-01-01T00:00:00+00:00"));
        insert_mission(&db, "chief-thing", "chief", Some("2020-01-01T00:00:00+00:00"));
        insert_mission(&db, "later", "writer", Some("2099-01-01T00:00:00+00:00"));
        insert_mission(&db, "triggered", "curator", None);

        let due = due_missions(&db, &now_iso()).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].slug, "inbox-sweep");
    }

    #[test]
    fn execution_lifecycle_records_duration() {
        let db = Database::open_in_memory().unwrap();
        insert_mission(&db, "inbox-sweep", "researcher", None);
        let mission = get_mission(&db, "inbox-sweep").unwrap().unwrap();

        let exec_id = create_mission_execution(&db, &mission.id, &mission.slug).unwrap();
        set_execution_session(&db, &exec_id, "abcd1234").unwrap();
        complete_mission_execution(&db, &exec_id, "completed", None).unwrap();

        let exec = get_mission_execution(&db, &exec_id).unwrap().unwrap();
        assert_eq!(exec.status, "completed");
        assert_eq!(exec.session_id.as_deref(), Some("abcd1234"));
        assert!(exec.ended_at.is_some());
        assert!(exec.duration_seconds.unwrap_or(-1.0) >= 0.0);
    }

    #[test]
    fn duty_upsert_is_idempotent_and_refreshes() {
        let db = Database::open_in_memory().unwrap();
        upsert_duty(&db, "memory-consolidation", "Memory Consolidation", "a.md", "06:00", 60)
            .unwrap();
        upsert_duty(&db, "memory-consolidation", "Memory Consolidation", "b.md", "06:30", 45)
            .unwrap();

        let duties = enabled_duties(&db).unwrap();
        assert_eq!(duties.len(), 1);
        assert_eq!(duties[0].prompt_file, "b.md");
        assert_eq!(duties[0].schedule_time, "06:30");
    }

    #[test]
    fn duty_execution_completion_is_single_shot() {
        let db = Database::open_in_memory().unwrap();
        upsert_duty(&db, "morning-prep", "Morning Prep", "p.md", "07:00", 60).unwrap();
        let duty = enabled_duties(&db).unwrap().remove(0);

        let exec_id = create_duty_execution(&db, &duty.id, &duty.slug).unwrap();
        complete_duty_execution(&db, &exec_id, "completed", None).unwrap();
        // A later failure report cannot overwrite the terminal status.
        complete_duty_execution(&db, &exec_id, "failed", Some("late")).unwrap();

        let exec = get_duty_execution(&db, &exec_id).unwrap().unwrap();
        assert_eq!(exec.status, "completed");
        assert!(exec.error.is_none());
    }
}
