use std::time::Duration;

use tracing::{debug, info, instrument};

use steward_storage::Database;
use steward_tmux::TmuxDriver;

use crate::error::Result;

/// What a wake attempt actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeOutcome {
    /// No active session for the conversation; nothing sent.
    NoActiveSession,
    /// Nothing new and nothing unacked; nothing sent.
    NothingWaiting,
    /// Injection delivered. Counts of fresh announcements and reminders.
    Sent { announced: usize, reminded: usize },
}

/// A completed worker eligible for announcement.
#[derive(Debug, Clone)]
struct WorkerNotice {
    id: String,
    short_id: String,
    task_type: String,
    summary: String,
}

pub struct Notifier {
    db: Database,
    tmux: TmuxDriver,
}

impl Notifier {
    pub fn new(db: Database, tmux: TmuxDriver) -> Self {
        Self { db, tmux }
    }

    /// Wake the current session of a conversation about finished workers.
    ///
    /// Dedupe is keyed on `(conversation_id, worker_id)` - not session - so
    /// a chief reset never causes a re-announcement. Safe to call any number
    /// of times; repeat calls with no new completions send nothing (unless
    /// there are unacked earlier results, which get a reminder line).
    #[instrument(skip(self))]
    pub async fn wake_conversation(&self, conversation_id: &str) -> Result<WakeOutcome> {
        let Some(pane) = self.active_pane(conversation_id)? else {
            debug!("no active session to wake");
            return Ok(WakeOutcome::NoActiveSession);
        };

        let fresh = self.unnotified_workers(conversation_id)?;
        let unacked = if fresh.is_empty() {
            self.notified_but_unacked(conversation_id)?
        } else {
            Vec::new()
        };

        if fresh.is_empty() && unacked.is_empty() {
            return Ok(WakeOutcome::NothingWaiting);
        }

        let message = if !fresh.is_empty() {
            let mut lines = vec![format!(
                "{} new worker result{} ready:",
                fresh.len(),
                if fresh.len() == 1 { "" } else { "s" }
            )];
            for w in &fresh {
                lines.push(format!("- {} ({}): {}", w.short_id, w.task_type, w.summary));
            }
            lines.push("Review with worker_status(<id>).".to_string());
            lines.join("\n")
        } else {
            format!(
                "Reminder: {} worker result{} still unacknowledged.",
                unacked.len(),
                if unacked.len() == 1 { "" } else { "s" }
            )
        };

        self.tmux
            .inject_message(&pane, &message, Some("System"))
            .await?;

        if !fresh.is_empty() {
            self.mark_notified(conversation_id, &fresh)?;
        }

        info!(
            announced = fresh.len(),
            reminded = unacked.len(),
            "conversation woken"
        );
        Ok(WakeOutcome::Sent {
            announced: fresh.len(),
            reminded: unacked.len(),
        })
    }

    /// Deliver a freshly spawned session's bootstrap prompt.
    ///
    /// The agent TUI needs a breath after the ready banner before it accepts
    /// bulk input, and another before the submit, or the first characters
    /// get eaten.
    pub async fn send_initial_prompt(&self, target: &str, prompt: &str) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        self.tmux.send_text(target, prompt, false).await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.tmux.send_key(target, "Enter").await?;
        Ok(())
    }

    // --- queries ------------------------------------------------------------

    fn active_pane(&self, conversation_id: &str) -> Result<Option<String>> {
        let row: Option<Option<String>> = self.db.fetch_one(
            "SELECT tmux_pane FROM sessions
             WHERE conversation_id = ?1 AND ended_at IS NULL
             ORDER BY started_at DESC
             LIMIT 1",
            [conversation_id],
            |row| row.get(0),
        )?;
        Ok(row.flatten())
    }

    /// Complete result workers with no dependent children that this
    /// conversation has never been told about.
    fn unnotified_workers(&self, conversation_id: &str) -> Result<Vec<WorkerNotice>> {
        self.db
            .fetch_all(
                "SELECT w.id, SUBSTR(w.id, 1, 8), w.task_type,
                        COALESCE(w.report_summary, 'no summary')
                 FROM workers w
                 WHERE w.status = 'complete'
                   AND w.attention_kind = 'result'
                   AND w.has_dependent_children = 0
                   AND w.conversation_id = ?1
                   AND NOT EXISTS (
                     SELECT 1 FROM conversation_notifications cn
                     WHERE cn.conversation_id = ?1 AND cn.worker_id = w.id
                   )
                 ORDER BY w.completed_at ASC",
                [conversation_id],
                |row| {
                    Ok(WorkerNotice {
                        id: row.get(0)?,
                        short_id: row.get(1)?,
                        task_type: row.get(2)?,
                        summary: row.get(3)?,
                    })
                },
            )
            .map_err(Into::into)
    }

    /// Workers already announced to this conversation but still sitting in a
    /// terminal unacked state.
    fn notified_but_unacked(&self, conversation_id: &str) -> Result<Vec<WorkerNotice>> {
        self.db
            .fetch_all(
                "SELECT w.id, SUBSTR(w.id, 1, 8), w.task_type,
                        COALESCE(w.report_summary, 'no summary')
                 FROM workers w
                 INNER JOIN conversation_notifications cn ON cn.worker_id = w.id
                 WHERE cn.conversation_id = ?1
                   AND w.conversation_id = ?1
                   AND w.status IN ('complete', 'failed', 'snoozed')
                 ORDER BY cn.notified_at ASC",
                [conversation_id],
                |row| {
                    Ok(WorkerNotice {
                        id: row.get(0)?,
                        short_id: row.get(1)?,
                        task_type: row.get(2)?,
                        summary: row.get(3)?,
                    })
                },
            )
            .map_err(Into::into)
    }

    fn mark_notified(&self, conversation_id: &str, workers: &[WorkerNotice]) -> Result<()> {
        // INSERT OR IGNORE keeps this idempotent under concurrent wakes.
        let params: Vec<[String; 2]> = workers
            .iter()
            .map(|w| [conversation_id.to_string(), w.id.clone()])
            .collect();
        self.db.execute_many(
            "INSERT OR IGNORE INTO conversation_notifications (conversation_id, worker_id)
             VALUES (?1, ?2)",
            params,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn insert_session(db: &Database, conversation_id: &str, pane: Option<&str>, ended: bool) {
        let now = Utc::now().to_rfc3339();
        let id = &uuid::Uuid::new_v4().simple().to_string()[..8];
        db.execute(
            "INSERT INTO sessions
             (session_id, conversation_id, role, mode, tmux_pane, current_state,
              started_at, last_seen_at, ended_at, updated_at)
             VALUES (?1, ?2, 'chief', 'interactive', ?3, 'idle', ?4, ?4, ?5, ?4)",
            rusqlite::params![id, conversation_id, pane, now, ended.then(|| now.clone())],
        )
        .unwrap();
    }

    fn insert_complete_worker(db: &Database, conversation_id: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO workers
             (id, task_type, conversation_id, status, attention_kind, report_summary,
              has_dependent_children, completed_at, created_at, updated_at)
             VALUES (?1, 'company_research', ?2, 'complete', 'result', 'Researched Acme', 0, ?3, ?3, ?3)",
            rusqlite::params![id, conversation_id, now],
        )
        .unwrap();
        id
    }

    #[test]
    fn delta_excludes_already_notified() {
        let db = test_db();
        insert_session(&db, "chief", Some("%5"), false);
        let w1 = insert_complete_worker(&db, "chief");
        let w2 = insert_complete_worker(&db, "chief");

        let notifier = Notifier::new(db.clone(), TmuxDriver::new("test"));
        let fresh = notifier.unnotified_workers("chief").unwrap();
        assert_eq!(fresh.len(), 2);

        db.execute(
            "INSERT INTO conversation_notifications (conversation_id, worker_id) VALUES ('chief', ?1)",
            [&w1],
        )
        .unwrap();

        let fresh = notifier.unnotified_workers("chief").unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, w2);
    }

    #[test]
    fn notification_rows_unique_per_pair() {
        let db = test_db();
        let w = insert_complete_worker(&db, "chief");
        let notifier = Notifier::new(db.clone(), TmuxDriver::new("test"));

        let notice = WorkerNotice {
            id: w.clone(),
            short_id: w[..8].to_string(),
            task_type: "company_research".into(),
            summary: "done".into(),
        };
        // Marking repeatedly never duplicates the pair.
        notifier.mark_notified("chief", &[notice.clone()]).unwrap();
        notifier.mark_notified("chief", &[notice.clone()]).unwrap();
        notifier.mark_notified("chief", &[notice]).unwrap();

        let count: Option<i64> = db
            .fetch_one(
                "SELECT COUNT(*) FROM conversation_notifications WHERE conversation_id = 'chief' AND worker_id = ?1",
                [&w],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, Some(1));
    }

    #[test]
    fn dedupe_survives_session_reset() {
        let db = test_db();
        insert_session(&db, "chief", Some("%1"), true); // old, ended
        insert_session(&db, "chief", Some("%2"), false); // replacement
        let w = insert_complete_worker(&db, "chief");
        db.execute(
            "INSERT INTO conversation_notifications (conversation_id, worker_id) VALUES ('chief', ?1)",
            [&w],
        )
        .unwrap();

        let notifier = Notifier::new(db.clone(), TmuxDriver::new("test"));
        // Notified under the old session; the new session must not re-see it.
        assert!(notifier.unnotified_workers("chief").unwrap().is_empty());
        // But it shows up as an unacked reminder.
        assert_eq!(notifier.notified_but_unacked("chief").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn wake_without_active_session_is_noop() {
        let db = test_db();
        insert_session(&db, "chief", Some("%1"), true);
        insert_complete_worker(&db, "chief");

        let notifier = Notifier::new(db, TmuxDriver::new("test"));
        let outcome = notifier.wake_conversation("chief").await.unwrap();
        assert_eq!(outcome, WakeOutcome::NoActiveSession);
    }
}
