//! The `report` tool - how a worker submits its result.
//!
//! The worker's prompt names its own worker id, and its final action is a
//! `report(worker_id, status, summary, body?, artifacts?)` call through the
//! worker-tools MCP bridge. That call lands here and writes the terminal
//! row state directly.

use chrono::Utc;
use serde::Deserialize;

use steward_storage::Database;

use crate::error::{Result, WorkerError};
use crate::types::{AttentionKind, WorkerStatus};

/// Status values a worker may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Complete,
    NeedsClarification,
    Failed,
}

impl ReportStatus {
    /// Map a reported status onto the worker row status + attention kind.
    pub fn row_state(&self) -> (WorkerStatus, AttentionKind) {
        match self {
            ReportStatus::Complete => (WorkerStatus::Complete, AttentionKind::Result),
            ReportStatus::NeedsClarification => {
                (WorkerStatus::AwaitingClarification, AttentionKind::Clarification)
            }
            ReportStatus::Failed => (WorkerStatus::Failed, AttentionKind::Alert),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Complete => "complete",
            ReportStatus::NeedsClarification => "needs_clarification",
            ReportStatus::Failed => "failed",
        }
    }
}

/// Compose the frontmatter-tagged report markdown.
pub fn compose_report_md(
    status: ReportStatus,
    summary: &str,
    body: Option<&str>,
    artifacts: &[String],
) -> String {
    let artifacts_json =
        serde_json::to_string(artifacts).unwrap_or_else(|_| "[]".to_string());

    let mut md = format!(
        "---\nstatus: {}\nsummary: {}\nartifacts: {}\n---\n\n# Worker Report\n\n## Summary\n{}\n",
        status.as_str(),
        summary,
        artifacts_json,
        summary
    );
    if let Some(body) = body {
        if !body.is_empty() {
            md.push_str(&format!("\n## Details\n{}\n", body));
        }
    }
    if !artifacts.is_empty() {
        md.push_str("\n## Artifacts Created\n");
        for artifact in artifacts {
            md.push_str(&format!("- `{}`\n", artifact));
        }
    }
    md
}

/// Validate and persist a worker's report. Returns the confirmation text
/// sent back through the tool call.
pub fn submit_report(
    db: &Database,
    worker_id: &str,
    status: ReportStatus,
    summary: &str,
    body: Option<&str>,
    artifacts: &[String],
) -> Result<String> {
    let exists: Option<String> = db.fetch_one(
        "SELECT id FROM workers WHERE id = ?1",
        [worker_id],
        |row| row.get(0),
    )?;
    if exists.is_none() {
        return Err(WorkerError::NotFound {
            id: worker_id.to_string(),
        });
    }

    let report_md = compose_report_md(status, summary, body, artifacts);
    let (row_status, attention_kind) = status.row_state();
    let now = Utc::now().to_rfc3339();

    db.execute(
        "UPDATE workers
         SET status = ?1,
             report_md = ?2,
             report_summary = ?3,
             attention_kind = ?4,
             attention_title = ?3,
             completed_at = ?5,
             updated_at = ?5
         WHERE id = ?6",
        rusqlite::params![
            row_status.as_str(),
            report_md,
            summary,
            attention_kind.as_str(),
            now,
            worker_id
        ],
    )?;

    Ok(format!(
        "Report submitted successfully. Status: {}",
        status.as_str()
    ))
}

/// Terminal failure body written when a worker never called report().
pub fn synthesize_missing_report(db: &Database, worker_id: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    db.execute(
        "UPDATE workers
         SET status = 'failed',
             report_md = '# Worker Failed\n\nWorker exited without calling report().',
             report_summary = 'Worker exited without submitting report',
             attention_kind = 'alert',
             attention_title = 'Worker failed to report',
             completed_at = ?1,
             updated_at = ?1
         WHERE id = ?2",
        rusqlite::params![now, worker_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_worker(db: &Database, id: &str) {
        db.execute(
            "INSERT INTO workers (id, task_type, conversation_id, status, created_at, updated_at)
             VALUES (?1, 'company_research', 'chief', 'running',
                     '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [id],
        )
        .unwrap();
    }

    #[test]
    fn report_md_has_frontmatter_and_sections() {
        let md = compose_report_md(
            ReportStatus::Complete,
            "Researched Acme",
            Some("Strong Series B, hiring."),
            &["Desktop/Career/acme.md".to_string()],
        );
        assert!(md.starts_with("---\nstatus: complete\n"));
        assert!(md.contains("summary: Researched Acme"));
        assert!(md.contains("# Worker Report"));
        assert!(md.contains("## Details"));
        assert!(md.contains("- `Desktop/Career/acme.md`"));
    }

    #[test]
    fn submit_complete_finalizes_row() {
        let db = Database::open_in_memory().unwrap();
        insert_worker(&db, "w1");

        let reply = submit_report(
            &db,
            "w1",
            ReportStatus::Complete,
            "Researched Acme",
            Some("details"),
            &[],
        )
        .unwrap();
        assert!(reply.contains("complete"));

        let (status, kind, completed, md): (String, String, Option<String>, String) = db
            .fetch_one(
                "SELECT status, attention_kind, completed_at, report_md FROM workers WHERE id = 'w1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(status, "complete");
        assert_eq!(kind, "result");
        assert!(completed.is_some());
        assert!(md.starts_with("---\nstatus: complete"));
    }

    #[test]
    fn clarification_maps_to_awaiting() {
        let db = Database::open_in_memory().unwrap();
        insert_worker(&db, "w2");
        submit_report(
            &db,
            "w2",
            ReportStatus::NeedsClarification,
            "Which Acme?",
            None,
            &[],
        )
        .unwrap();

        let (status, kind): (String, String) = db
            .fetch_one(
                "SELECT status, attention_kind FROM workers WHERE id = 'w2'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(status, "awaiting_clarification");
        assert_eq!(kind, "clarification");
    }

    #[test]
    fn unknown_worker_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = submit_report(&db, "ghost", ReportStatus::Complete, "s", None, &[]).unwrap_err();
        assert!(matches!(err, WorkerError::NotFound { .. }));
    }

    #[test]
    fn missing_report_synthesis() {
        let db = Database::open_in_memory().unwrap();
        insert_worker(&db, "w3");
        synthesize_missing_report(&db, "w3").unwrap();

        let (status, md): (String, String) = db
            .fetch_one(
                "SELECT status, report_md FROM workers WHERE id = 'w3'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(status, "failed");
        assert!(md.contains("without calling report()"));
    }
}
