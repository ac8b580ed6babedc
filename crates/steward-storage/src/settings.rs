//! Key/value settings store plus the typed readers the schedulers use.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::db::Database;
use crate::error::Result;

const MODEL_SETTING_PREFIX: &str = "model_";

/// Built-in per-role model aliases, used when the settings table carries no
/// `model_{role}` override. Roles outside this table fall back to `worker`.
const DEFAULT_MODELS: &[(&str, &str)] = &[
    ("chief", "opus"),
    ("builder", "sonnet"),
    ("deep-work", "sonnet"),
    ("project", "sonnet"),
    ("idea", "sonnet"),
    ("worker", "sonnet"),
];

pub fn get_setting(db: &Database, key: &str) -> Result<Option<String>> {
    db.fetch_one(
        "SELECT value FROM settings WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
}

pub fn set_setting(db: &Database, key: &str, value: &str) -> Result<()> {
    db.execute(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        rusqlite::params![key, value, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn delete_setting(db: &Database, key: &str) -> Result<()> {
    db.execute("DELETE FROM settings WHERE key = ?1", [key])?;
    Ok(())
}

/// Model alias to pass to the agent's `--model` flag for `role`.
pub fn model_for_role(db: &Database, role: &str) -> Option<String> {
    let lookup = if DEFAULT_MODELS.iter().any(|(r, _)| *r == role) {
        role
    } else {
        "worker"
    };
    let key = format!("{MODEL_SETTING_PREFIX}{lookup}");
    if let Ok(Some(value)) = get_setting(db, &key) {
        return Some(value);
    }
    DEFAULT_MODELS
        .iter()
        .find(|(r, _)| *r == lookup)
        .map(|(_, m)| m.to_string())
}

/// Read a future-instant setting; expired or malformed values are deleted so
/// the table never accumulates stale windows.
fn future_instant(db: &Database, key: &str) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = get_setting(db, key)? else {
        return Ok(None);
    };
    match steward_core::time::parse_iso(&raw) {
        Some(instant) if instant > Utc::now() => Ok(Some(instant)),
        _ => {
            debug!(key, "clearing expired wake setting");
            delete_setting(db, key)?;
            Ok(None)
        }
    }
}

/// Wake knobs the chief heartbeat consults every tick.
#[derive(Debug, Clone, Default)]
pub struct WakeSettings {
    /// Heartbeats only fire while this is in the future.
    pub window_until: Option<DateTime<Utc>>,
    /// Heartbeats are skipped while this is in the future.
    pub pause_until: Option<DateTime<Utc>>,
    /// Minutes between HEARTBEAT wakes.
    pub interval_minutes: i64,
}

pub fn wake_settings(db: &Database, default_interval: i64) -> WakeSettings {
    let window_until = future_instant(db, "wake_window_until").unwrap_or(None);
    let pause_until = future_instant(db, "wake_pause_until").unwrap_or(None);
    let interval_minutes = get_setting(db, "wake_interval_minutes")
        .ok()
        .flatten()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default_interval);
    WakeSettings {
        window_until,
        pause_until,
        interval_minutes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        set_setting(&db, "model_chief", "opus-4").unwrap();
        assert_eq!(
            get_setting(&db, "model_chief").unwrap().as_deref(),
            Some("opus-4")
        );
        set_setting(&db, "model_chief", "opus-5").unwrap();
        assert_eq!(
            get_setting(&db, "model_chief").unwrap().as_deref(),
            Some("opus-5")
        );
    }

    #[test]
    fn model_defaults_and_overrides() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(model_for_role(&db, "chief").as_deref(), Some("opus"));
        // Unknown roles use the worker default.
        assert_eq!(model_for_role(&db, "curator").as_deref(), Some("sonnet"));

        set_setting(&db, "model_chief", "haiku").unwrap();
        assert_eq!(model_for_role(&db, "chief").as_deref(), Some("haiku"));
    }

    #[test]
    fn expired_wake_window_is_cleared() {
        let db = Database::open_in_memory().unwrap();
        set_setting(&db, "wake_window_until", "2020-01-01T00:00:00Z").unwrap();

        let settings = wake_settings(&db, 15);
        assert!(settings.window_until.is_none());
        // Deleted on read.
        assert!(get_setting(&db, "wake_window_until").unwrap().is_none());
    }

    #[test]
    fn future_wake_window_survives() {
        let db = Database::open_in_memory().unwrap();
        let future = (Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
        set_setting(&db, "wake_window_until", &future).unwrap();
        set_setting(&db, "wake_interval_minutes", "30").unwrap();

        let settings = wake_settings(&db, 15);
        assert!(settings.window_until.is_some());
        assert_eq!(settings.interval_minutes, 30);
    }
}
