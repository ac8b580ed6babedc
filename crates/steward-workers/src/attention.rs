//! Worker attention lifecycle: acknowledgment, snoozing, clarifications.

use chrono::{DateTime, Duration, Utc};

use steward_storage::Database;

use crate::error::{Result, WorkerError};
use crate::types::{AttentionKind, WORKER_COLUMNS};

/// Mark a worker as needing attention.
#[allow(clippy::too_many_arguments)]
pub fn add_attention(
    db: &Database,
    worker_id: &str,
    kind: AttentionKind,
    title: &str,
    domain: Option<&str>,
    data: &serde_json::Value,
    severity: &str,
    clarification_session_id: Option<&str>,
) -> Result<()> {
    db.execute(
        "UPDATE workers
         SET attention_kind = ?1,
             attention_title = ?2,
             attention_domain = ?3,
             attention_data_json = ?4,
             attention_severity = ?5,
             clarification_session_id = ?6,
             notify_after = NULL,
             updated_at = ?7
         WHERE id = ?8",
        rusqlite::params![
            kind.as_str(),
            title,
            domain,
            data.to_string(),
            severity,
            clarification_session_id,
            Utc::now().to_rfc3339(),
            worker_id
        ],
    )?;
    Ok(())
}

/// Workers waiting for eyes: unacked terminal states whose snooze (if any)
/// has elapsed.
pub fn list_pending(db: &Database, include_future: bool) -> Result<Vec<crate::types::WorkerRow>> {
    let condition = if include_future {
        ""
    } else {
        "AND (notify_after IS NULL OR notify_after <= ?1)"
    };
    let sql = format!(
        "SELECT {WORKER_COLUMNS} FROM workers
         WHERE status IN ('complete', 'failed', 'clarification_answered', 'snoozed')
         {condition}
         ORDER BY notify_after IS NULL DESC, notify_after ASC, created_at ASC"
    );
    let rows = if include_future {
        db.fetch_all(&sql, [], crate::types::WorkerRow::from_row)?
    } else {
        db.fetch_all(
            &sql,
            [Utc::now().to_rfc3339()],
            crate::types::WorkerRow::from_row,
        )?
    };
    Ok(rows)
}

/// Push a worker's attention out until `notify_after`.
pub fn snooze(db: &Database, worker_id: &str, notify_after: DateTime<Utc>) -> Result<()> {
    let n = db.execute(
        "UPDATE workers SET status = 'snoozed', notify_after = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![
            notify_after.to_rfc3339(),
            Utc::now().to_rfc3339(),
            worker_id
        ],
    )?;
    if n == 0 {
        return Err(WorkerError::NotFound {
            id: worker_id.to_string(),
        });
    }
    Ok(())
}

pub fn cancel(db: &Database, worker_id: &str) -> Result<()> {
    let n = db.execute(
        "UPDATE workers SET status = 'cancelled', updated_at = ?1 WHERE id = ?2",
        rusqlite::params![Utc::now().to_rfc3339(), worker_id],
    )?;
    if n == 0 {
        return Err(WorkerError::NotFound {
            id: worker_id.to_string(),
        });
    }
    Ok(())
}

/// Record an answer to a worker's clarification question. Returns the agent
/// session id the executor must resume.
pub fn answer_clarification(
    db: &Database,
    worker_id: &str,
    answer: &str,
) -> Result<Option<String>> {
    let row: Option<(String, Option<String>)> = db.fetch_one(
        "SELECT status, clarification_session_id FROM workers WHERE id = ?1",
        [worker_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let Some((status, session_id)) = row else {
        return Err(WorkerError::NotFound {
            id: worker_id.to_string(),
        });
    };
    if status != "awaiting_clarification" {
        return Err(WorkerError::NotAwaitingClarification {
            id: worker_id.to_string(),
            status,
        });
    }

    let now = Utc::now().to_rfc3339();
    db.execute(
        "UPDATE workers
         SET status = 'clarification_answered',
             clarification_answer = ?1,
             clarification_answered_at = ?2,
             updated_at = ?2
         WHERE id = ?3",
        rusqlite::params![answer, now, worker_id],
    )?;
    Ok(session_id)
}

/// Prune old notification-log rows so the dedupe table stays bounded.
pub fn cleanup_old_notifications(db: &Database, days: i64) -> Result<usize> {
    let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
    Ok(db.execute(
        "DELETE FROM conversation_notifications WHERE notified_at < ?1",
        [cutoff],
    )?)
}
