//! Shared utility entities: priorities, timers, reminders.
//!
//! These are small enough that typed row structs plus free functions keep
//! the call sites honest without a service layer on top.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    Critical,
    Medium,
    Low,
}

impl PriorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::Critical => "critical",
            PriorityLevel::Medium => "medium",
            PriorityLevel::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Priority {
    pub id: String,
    pub date: String,
    pub content: String,
    pub level: String,
    pub completed: bool,
    pub position: i64,
}

pub fn create_priority(
    db: &Database,
    date: &str,
    content: &str,
    level: PriorityLevel,
) -> Result<Priority> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    // New priorities append after the current max position for the day.
    let position: i64 = db
        .fetch_one(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM priorities WHERE date = ?1",
            [date],
            |row| row.get(0),
        )?
        .unwrap_or(0);

    db.execute(
        "INSERT INTO priorities (id, date, content, level, completed, position, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?6)",
        rusqlite::params![id, date, content, level.as_str(), position, now],
    )?;

    Ok(Priority {
        id,
        date: date.to_string(),
        content: content.to_string(),
        level: level.as_str().to_string(),
        completed: false,
        position,
    })
}

pub fn list_priorities(db: &Database, date: &str) -> Result<Vec<Priority>> {
    db.fetch_all(
        "SELECT id, date, content, level, completed, position
         FROM priorities WHERE date = ?1 ORDER BY position",
        [date],
        |row| {
            Ok(Priority {
                id: row.get(0)?,
                date: row.get(1)?,
                content: row.get(2)?,
                level: row.get(3)?,
                completed: row.get::<_, i64>(4)? != 0,
                position: row.get(5)?,
            })
        },
    )
}

pub fn complete_priority(db: &Database, id: &str) -> Result<bool> {
    let n = db.execute(
        "UPDATE priorities SET completed = 1, updated_at = ?1 WHERE id = ?2",
        rusqlite::params![Utc::now().to_rfc3339(), id],
    )?;
    Ok(n > 0)
}

pub fn delete_priority(db: &Database, id: &str) -> Result<bool> {
    let n = db.execute("DELETE FROM priorities WHERE id = ?1", [id])?;
    Ok(n > 0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timer {
    pub id: String,
    pub label: String,
    pub minutes: i64,
    pub started_at: String,
    pub ends_at: String,
    pub session_id: Option<String>,
}

pub fn start_timer(
    db: &Database,
    label: &str,
    minutes: i64,
    session_id: Option<&str>,
) -> Result<Timer> {
    let id = Uuid::new_v4().to_string();
    let started = Utc::now();
    let ends = started + Duration::minutes(minutes);
    db.execute(
        "INSERT INTO timers (id, label, minutes, started_at, ends_at, session_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            id,
            label,
            minutes,
            started.to_rfc3339(),
            ends.to_rfc3339(),
            session_id
        ],
    )?;
    Ok(Timer {
        id,
        label: label.to_string(),
        minutes,
        started_at: started.to_rfc3339(),
        ends_at: ends.to_rfc3339(),
        session_id: session_id.map(str::to_string),
    })
}

/// Timers whose `ends_at` has passed. Caller deletes them after announcing.
pub fn due_timers(db: &Database) -> Result<Vec<Timer>> {
    db.fetch_all(
        "SELECT id, label, minutes, started_at, ends_at, session_id
         FROM timers WHERE ends_at <= ?1 ORDER BY ends_at",
        [Utc::now().to_rfc3339()],
        |row| {
            Ok(Timer {
                id: row.get(0)?,
                label: row.get(1)?,
                minutes: row.get(2)?,
                started_at: row.get(3)?,
                ends_at: row.get(4)?,
                session_id: row.get(5)?,
            })
        },
    )
}

pub fn delete_timer(db: &Database, id: &str) -> Result<bool> {
    let n = db.execute("DELETE FROM timers WHERE id = ?1", [id])?;
    Ok(n > 0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub message: String,
    pub remind_at: String,
    pub session_id: Option<String>,
}

pub fn create_reminder(
    db: &Database,
    message: &str,
    remind_at: &str,
    session_id: Option<&str>,
) -> Result<Reminder> {
    let id = Uuid::new_v4().to_string();
    db.execute(
        "INSERT INTO reminders (id, message, remind_at, session_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![id, message, remind_at, session_id, Utc::now().to_rfc3339()],
    )?;
    Ok(Reminder {
        id,
        message: message.to_string(),
        remind_at: remind_at.to_string(),
        session_id: session_id.map(str::to_string),
    })
}

pub fn due_reminders(db: &Database) -> Result<Vec<Reminder>> {
    db.fetch_all(
        "SELECT id, message, remind_at, session_id
         FROM reminders WHERE remind_at <= ?1 ORDER BY remind_at",
        [Utc::now().to_rfc3339()],
        |row| {
            Ok(Reminder {
                id: row.get(0)?,
                message: row.get(1)?,
                remind_at: row.get(2)?,
                session_id: row.get(3)?,
            })
        },
    )
}

pub fn delete_reminder(db: &Database, id: &str) -> Result<bool> {
    let n = db.execute("DELETE FROM reminders WHERE id = ?1", [id])?;
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_append_in_position_order() {
        let db = Database::open_in_memory().unwrap();
        let a = create_priority(&db, "2026-03-14", "ship it", PriorityLevel::Critical).unwrap();
        let b = create_priority(&db, "2026-03-14", "rest", PriorityLevel::Low).unwrap();
        assert_eq!(a.position, 0);
        assert_eq!(b.position, 1);

        // Positions are per-day.
        let c = create_priority(&db, "2026-03-15", "plan", PriorityLevel::Medium).unwrap();
        assert_eq!(c.position, 0);

        complete_priority(&db, &a.id).unwrap();
        let listed = list_priorities(&db, "2026-03-14").unwrap();
        assert!(listed[0].completed);
        assert!(!listed[1].completed);
    }

    #[test]
    fn overdue_timer_is_due() {
        let db = Database::open_in_memory().unwrap();
        // A zero-minute timer ends immediately.
        start_timer(&db, "tea", 0, None).unwrap();
        let due = due_timers(&db).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].label, "tea");
        assert!(delete_timer(&db, &due[0].id).unwrap());
        assert!(due_timers(&db).unwrap().is_empty());
    }

    #[test]
    fn reminder_due_filtering() {
        let db = Database::open_in_memory().unwrap();
        create_reminder(&db, "past", "2020-01-01T00:00:00+00:00", None).unwrap();
        create_reminder(&db, "future", "2099-01-01T00:00:00+00:00", None).unwrap();
        let due = due_reminders(&db).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message, "past");
    }
}
