//! Wake payload assembly - the context blocks injected into chief wakes.

use std::collections::HashMap;
use std::path::Path;

use steward_storage::Database;

/// Seconds between activity-log samples written by the external sampler.
const SAMPLE_INTERVAL_SECS: f64 = 30.0;
/// A sample counts as idle when no input happened for this long before it.
const IDLE_THRESHOLD_SECS: f64 = 120.0;

/// Extract today's schedule from the daily file: the `### Today's Schedule`
/// section, first five lines.
pub fn schedule_snippet(today_md: &Path) -> String {
    let Ok(content) = std::fs::read_to_string(today_md) else {
        return "(no schedule found)".to_string();
    };

    let Some(start) = content.find("### Today's Schedule") else {
        return "(no schedule found)".to_string();
    };
    let body = &content[start + "### Today's Schedule".len()..];
    let end = body
        .find("\n###")
        .or_else(|| body.find("\n<!-- END"))
        .unwrap_or(body.len());

    let snippet: Vec<&str> = body[..end].trim().lines().take(5).collect();
    if snippet.is_empty() {
        "(no schedule found)".to_string()
    } else {
        snippet.join("\n")
    }
}

/// Top-5 foreground apps with per-app minute totals over the window, plus
/// total idle minutes. Samples arrive every 30 s; each sample attributes its
/// full interval to the app that was frontmost.
pub fn activity_summary(db: &Database, since_minutes: i64) -> (String, f64) {
    let rows: Vec<(Option<String>, Option<f64>)> = db
        .fetch_all(
            "SELECT frontmost_app, idle_seconds
             FROM activity_log
             WHERE timestamp > datetime('now', ?1 || ' minutes')
             ORDER BY timestamp ASC",
            [format!("-{since_minutes}")],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap_or_default();

    if rows.is_empty() {
        return ("(no activity data)".to_string(), 0.0);
    }

    let mut app_seconds: HashMap<String, f64> = HashMap::new();
    let mut idle_samples = 0usize;
    for (app, idle) in &rows {
        let app = app.clone().unwrap_or_else(|| "Unknown".to_string());
        *app_seconds.entry(app).or_insert(0.0) += SAMPLE_INTERVAL_SECS;
        if idle.unwrap_or(0.0) > IDLE_THRESHOLD_SECS {
            idle_samples += 1;
        }
    }

    let mut apps: Vec<(String, f64)> = app_seconds
        .into_iter()
        .map(|(app, secs)| (app, (secs / 60.0 * 10.0).round() / 10.0))
        .collect();
    apps.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let lines: Vec<String> = apps
        .iter()
        .take(5)
        .map(|(app, mins)| format!("- {}: {} min", app, mins))
        .collect();

    let idle_minutes =
        (idle_samples as f64 * SAMPLE_INTERVAL_SECS / 60.0 * 10.0).round() / 10.0;
    (lines.join("\n"), idle_minutes)
}

/// Per-session status line summary for the wake payload.
pub fn sessions_summary(db: &Database) -> String {
    let rows: Vec<(String, String, Option<String>)> = db
        .fetch_all(
            "SELECT role, session_id, status_text FROM sessions
             WHERE ended_at IS NULL ORDER BY started_at DESC",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap_or_default();

    if rows.is_empty() {
        return "(no active sessions)".to_string();
    }

    rows.iter()
        .map(|(role, id, status)| {
            let mut status = status.clone().unwrap_or_else(|| "(no status)".to_string());
            if status.len() > 40 {
                status.truncate(37);
                status.push_str("...");
            }
            format!("- {}-{}: {}", role, &id[..id.len().min(8)], status)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One-line worker counts: running / pending / complete-unacked / failed.
pub fn worker_summary(db: &Database) -> String {
    let rows: Vec<(String, i64)> = db
        .fetch_all(
            "SELECT status, COUNT(*) FROM workers
             WHERE status IN ('pending', 'running', 'complete', 'failed')
             GROUP BY status",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap_or_default();

    let counts: HashMap<String, i64> = rows.into_iter().collect();
    let running = counts.get("running").copied().unwrap_or(0);
    let pending = counts.get("pending").copied().unwrap_or(0);
    let unacked = counts.get("complete").copied().unwrap_or(0);
    let failed = counts.get("failed").copied().unwrap_or(0);

    if running + pending + unacked + failed == 0 {
        return "None active".to_string();
    }

    let mut parts = Vec::new();
    if running > 0 {
        parts.push(format!("{running} running"));
    }
    if pending > 0 {
        parts.push(format!("{pending} pending"));
    }
    if unacked > 0 {
        parts.push(format!("{unacked} complete (unacked)"));
    }
    if failed > 0 {
        parts.push(format!("{failed} failed (unacked)"));
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_snippet_extracts_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TODAY.md");
        std::fs::write(
            &path,
            "# Today\n\n### Today's Schedule\n- 09:00 standup\n- 10:00 deep work\n\n### Open Loops\n- fix bug\n",
        )
        .unwrap();

        let snippet = schedule_snippet(&path);
        assert!(snippet.contains("09:00 standup"));
        assert!(snippet.contains("10:00 deep work"));
        assert!(!snippet.contains("fix bug"));
    }

    #[test]
    fn schedule_snippet_missing_file() {
        let snippet = schedule_snippet(Path::new("/nonexistent/TODAY.md"));
        assert_eq!(snippet, "(no schedule found)");
    }

    #[test]
    fn worker_summary_counts() {
        let db = Database::open_in_memory().unwrap();
        for (i, status) in ["running", "running", "pending", "complete"].iter().enumerate() {
            db.execute(
                "INSERT INTO workers (id, task_type, status, created_at, updated_at)
                 VALUES (?1, 'research', ?2, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                rusqlite::params![format!("w{i}"), status],
            )
            .unwrap();
        }

        let summary = worker_summary(&db);
        assert!(summary.contains("2 running"));
        assert!(summary.contains("1 pending"));
        assert!(summary.contains("1 complete (unacked)"));
    }

    #[test]
    fn worker_summary_empty() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(worker_summary(&db), "None active");
    }

    #[test]
    fn sessions_summary_truncates_long_status() {
        let db = Database::open_in_memory().unwrap();
        db.execute(
            "INSERT INTO sessions
             (session_id, conversation_id, role, mode, status_text, current_state,
              started_at, last_seen_at, updated_at)
             VALUES ('abcd1234', 'chief', 'chief', 'interactive', ?1, 'active',
                     '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [&"x".repeat(60)],
        )
        .unwrap();

        let summary = sessions_summary(&db);
        assert!(summary.contains("chief-abcd1234"));
        assert!(summary.contains("..."));
    }
}
