//! Worker executor - queued LLM invocations with tool-hook accounting.
//!
//! A dispatch loop claims due pending workers (dependencies complete,
//! execute_at passed) and runs each in its own task: PID marker for crash
//! detection, prompt from the catalog, agent stream consumed into per-worker
//! hooks, report finalization, and a conversation wake on completion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use steward_bus::EventBus;
use steward_core::config::StewardConfig;
use steward_notify::Notifier;
use steward_storage::Database;

use crate::agent::{AgentClient, AgentEvent, AgentInvocation};
use crate::error::Result;
use crate::hooks::WorkerHooks;
use crate::live::LiveOutput;
use crate::prompts::PromptCatalog;
use crate::report;
use crate::types::{WorkerRow, WorkerStatus, WORKER_COLUMNS};

/// Dispatch loop cadence.
const DISPATCH_TICK_SECS: u64 = 5;

pub struct WorkerExecutor {
    db: Database,
    config: StewardConfig,
    bus: Arc<EventBus>,
    notifier: Arc<Notifier>,
    agent: Arc<dyn AgentClient>,
    live: Arc<LiveOutput>,
    prompts: PromptCatalog,
    /// Cancellation handles of running workers, keyed by worker id.
    active: DashMap<String, CancellationToken>,
}

impl WorkerExecutor {
    pub fn new(
        db: Database,
        config: StewardConfig,
        bus: Arc<EventBus>,
        notifier: Arc<Notifier>,
        agent: Arc<dyn AgentClient>,
    ) -> Arc<Self> {
        let live = Arc::new(LiveOutput::new(db.clone(), bus.clone()));
        let prompts = PromptCatalog::new(config.repo_root.join(".claude/workers"));
        Arc::new(Self {
            db,
            config,
            bus,
            notifier,
            agent,
            live,
            prompts,
            active: DashMap::new(),
        })
    }

    /// Dispatch loop. Recovers crash orphans once, then claims due work
    /// every few seconds until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("worker executor starting");
        if let Err(e) = self.recover_orphans() {
            error!(error = %e, "orphan worker recovery failed");
        }

        let mut interval = tokio::time::interval(Duration::from_secs(DISPATCH_TICK_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = Arc::clone(&self).dispatch_pending().await {
                        error!(error = %e, "worker dispatch failed");
                    }
                    if let Err(e) = Arc::clone(&self).dispatch_answered_clarifications().await {
                        error!(error = %e, "clarification dispatch failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("worker executor shutting down");
                        break;
                    }
                }
            }
        }
    }

    // --- dispatch -----------------------------------------------------------

    async fn dispatch_pending(self: Arc<Self>) -> Result<()> {
        let due: Vec<WorkerRow> = self.db.fetch_all(
            &format!(
                "SELECT {WORKER_COLUMNS} FROM workers
                 WHERE status = 'pending'
                   AND (execute_at IS NULL OR execute_at <= ?1)
                 ORDER BY created_at ASC"
            ),
            [Utc::now().to_rfc3339()],
            WorkerRow::from_row,
        )?;

        for worker in due {
            if !self.dependencies_complete(&worker)? {
                continue;
            }
            // Claim: pending -> running. A zero row count means someone else
            // (or a previous tick) already took it.
            let claimed = self.db.execute(
                "UPDATE workers SET status = 'running', updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                rusqlite::params![Utc::now().to_rfc3339(), worker.id],
            )?;
            if claimed == 0 {
                continue;
            }

            let executor = Arc::clone(&self);
            tokio::spawn(async move {
                executor.execute_worker(worker, None).await;
            });
        }
        Ok(())
    }

    async fn dispatch_answered_clarifications(self: Arc<Self>) -> Result<()> {
        let answered: Vec<WorkerRow> = self.db.fetch_all(
            &format!(
                "SELECT {WORKER_COLUMNS} FROM workers
                 WHERE status = 'clarification_answered'
                 ORDER BY clarification_answered_at ASC"
            ),
            [],
            WorkerRow::from_row,
        )?;

        for worker in answered {
            let claimed = self.db.execute(
                "UPDATE workers SET status = 'running', updated_at = ?1
                 WHERE id = ?2 AND status = 'clarification_answered'",
                rusqlite::params![Utc::now().to_rfc3339(), worker.id],
            )?;
            if claimed == 0 {
                continue;
            }

            let resume_session = worker.clarification_session_id.clone();
            let answer = worker.clarification_answer.clone().unwrap_or_default();
            let resume_prompt = format!(
                "The user answered your clarification question:\n\n{answer}\n\n\
                 Continue the task with this answer and call report(worker_id=\"{id}\", ...) \
                 when done.",
                id = worker.id
            );

            let executor = Arc::clone(&self);
            tokio::spawn(async move {
                executor
                    .execute_worker(worker, Some((resume_prompt, resume_session)))
                    .await;
            });
        }
        Ok(())
    }

    fn dependencies_complete(&self, worker: &WorkerRow) -> Result<bool> {
        for dep_id in &worker.depends_on {
            let status: Option<String> = self.db.fetch_one(
                "SELECT status FROM workers WHERE id = ?1",
                [dep_id],
                |row| row.get(0),
            )?;
            if status.as_deref() != Some("complete") {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // --- execution ----------------------------------------------------------

    /// Run one worker to completion. `resume` carries (prompt, agent session)
    /// for clarification second turns.
    #[instrument(skip(self, worker, resume), fields(worker_id = %worker.short_id(), task_type = %worker.task_type))]
    async fn execute_worker(
        self: Arc<Self>,
        worker: WorkerRow,
        resume: Option<(String, Option<String>)>,
    ) {
        let marker = self.write_pid_marker(&worker);

        let (prompt, resume_session) = match resume {
            Some((prompt, session)) => (prompt, session),
            None => match self.prompts.build(&worker) {
                Ok(prompt) => (prompt, None),
                Err(e) => {
                    self.fail_worker(&worker, &e.to_string());
                    self.remove_pid_marker(marker);
                    return;
                }
            },
        };

        let cancel = CancellationToken::new();
        self.active.insert(worker.id.clone(), cancel.clone());

        let mut hooks = WorkerHooks::new(worker.id.clone(), self.live.clone());
        hooks.on_progress(0, "Starting execution...");

        let agent_session_id = uuid::Uuid::new_v4().to_string();
        let invocation = AgentInvocation {
            prompt,
            agent_session_id: agent_session_id.clone(),
            resume_session,
        };

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(64);
        let agent = Arc::clone(&self.agent);
        let agent_cancel = cancel.clone();
        let run_handle =
            tokio::spawn(async move { agent.run(invocation, tx, agent_cancel).await });

        // Consume the stream: tool starts remember their input so results
        // can be attributed with full context.
        let mut open_tools: HashMap<String, (String, serde_json::Value)> = HashMap::new();
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::Text(text) => hooks.on_text(&text),
                AgentEvent::ToolStart { id, name, input } => {
                    hooks.on_tool_start(&name, &id, &input);
                    open_tools.insert(id, (name, input));
                }
                AgentEvent::ToolResult {
                    id,
                    output,
                    success,
                } => {
                    let (name, input) = open_tools
                        .remove(&id)
                        .unwrap_or_else(|| ("unknown".to_string(), serde_json::Value::Null));
                    hooks.on_tool_result(&name, &id, &input, &output, success);
                }
                AgentEvent::Completed { .. } => {}
            }
        }

        let run_result = match run_handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(error = %e, "agent run failed");
                crate::agent::AgentRunResult::default()
            }
            Err(e) => {
                warn!(error = %e, "agent task panicked");
                crate::agent::AgentRunResult::default()
            }
        };

        hooks.metadata.finish();
        self.record_run_metadata(&worker, run_result.session_id.as_deref(), &hooks);

        if cancel.is_cancelled() {
            // User-initiated termination: the row is left exactly as the
            // interrupt found it.
            debug!("worker cancelled, skipping finalization");
        } else {
            self.finalize_worker(&worker).await;
        }

        self.active.remove(&worker.id);
        self.live.forget(&worker.id);
        self.remove_pid_marker(marker);
    }

    /// After the stream ends: ensure the row carries a report, publish the
    /// outcome, and wake the spawning conversation when everything it queued
    /// is done.
    async fn finalize_worker(&self, worker: &WorkerRow) {
        let row: Option<(String, Option<String>, Option<String>)> = self
            .db
            .fetch_one(
                "SELECT status, report_md, report_summary FROM workers WHERE id = ?1",
                [&worker.id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .ok()
            .flatten();

        let (status, summary) = match row {
            Some((status, Some(_), summary)) if status != "running" => (
                status,
                summary.unwrap_or_else(|| "Task completed".to_string()),
            ),
            _ => {
                // The worker never called report(); synthesize the failure.
                if let Err(e) = report::synthesize_missing_report(&self.db, &worker.id) {
                    error!(error = %e, "failed to synthesize missing report");
                }
                (
                    "failed".to_string(),
                    "Worker exited without submitting report".to_string(),
                )
            }
        };

        // A worker parked on a clarification question is neither done nor
        // broken; the row's attention_kind='clarification' is the signal, so
        // no completed/failed timeline event goes out for it.
        let topic = match status.as_str() {
            "awaiting_clarification" => None,
            s if s.contains("complete") => Some("worker.completed"),
            _ => Some("worker.failed"),
        };
        if let Some(topic) = topic {
            self.bus.publish(
                topic,
                serde_json::json!({
                    "worker_id": worker.id,
                    "short_id": worker.short_id(),
                    "task_type": worker.task_type,
                    "status": status,
                    "summary": summary,
                }),
            );
        } else {
            debug!(status = %status, "worker awaiting clarification, no terminal event");
        }

        if status.contains("complete") {
            if let Some(ref conversation_id) = worker.conversation_id {
                if self.conversation_quiet(conversation_id) {
                    match self.notifier.wake_conversation(conversation_id).await {
                        Ok(outcome) => debug!(?outcome, "conversation wake attempted"),
                        Err(e) => warn!(error = %e, "conversation wake failed"),
                    }
                }
            }
        }
    }

    /// True when the conversation has no workers still pending or running —
    /// waking earlier would announce a partial batch.
    fn conversation_quiet(&self, conversation_id: &str) -> bool {
        let remaining: i64 = self
            .db
            .fetch_one(
                "SELECT COUNT(*) FROM workers
                 WHERE conversation_id = ?1 AND status IN ('pending', 'running')",
                [conversation_id],
                |row| row.get(0),
            )
            .ok()
            .flatten()
            .unwrap_or(0);
        remaining == 0
    }

    fn record_run_metadata(
        &self,
        worker: &WorkerRow,
        agent_session_id: Option<&str>,
        hooks: &WorkerHooks,
    ) {
        // The agent session id enables clarification resumes later.
        let usage = serde_json::to_string(&hooks.metadata).unwrap_or_else(|_| "{}".to_string());
        if let Err(e) = self.db.execute(
            "UPDATE workers
             SET agent_session_id = COALESCE(?1, agent_session_id),
                 clarification_session_id = CASE
                     WHEN status = 'awaiting_clarification' THEN COALESCE(?1, clarification_session_id)
                     ELSE clarification_session_id
                 END,
                 attention_data_json = COALESCE(attention_data_json, ?2),
                 updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![agent_session_id, usage, Utc::now().to_rfc3339(), worker.id],
        ) {
            warn!(error = %e, "failed to record run metadata");
        }
    }

    fn fail_worker(&self, worker: &WorkerRow, error: &str) {
        let now = Utc::now().to_rfc3339();
        let report = format!(
            "---\nstatus: failed\nsummary: Task failed: {error}\n---\n\n\
             # Task Failed\n\n**Error:** {error}\n\n**Task:** {} ({})\n",
            worker.task_type,
            worker.short_id()
        );
        if let Err(e) = self.db.execute(
            "UPDATE workers
             SET status = 'failed', report_md = ?1, report_summary = ?2,
                 attention_kind = 'alert', attention_title = ?2,
                 last_error = ?3, completed_at = ?4, updated_at = ?4
             WHERE id = ?5",
            rusqlite::params![
                report,
                format!("Task failed: {error}"),
                error,
                now,
                worker.id
            ],
        ) {
            error!(error = %e, "failed to record worker failure");
        }
        self.bus.publish(
            "worker.failed",
            serde_json::json!({
                "worker_id": worker.id,
                "short_id": worker.short_id(),
                "status": "failed",
            }),
        );
    }

    // --- termination --------------------------------------------------------

    /// User-initiated termination: interrupt the agent and disconnect.
    /// Returns true when a running client was found. The row is left as-is.
    pub fn terminate(&self, worker_id: &str) -> bool {
        match self.active.remove(worker_id) {
            Some((_, cancel)) => {
                cancel.cancel();
                info!(worker_id, "worker terminated by user");
                true
            }
            None => false,
        }
    }

    // --- crash recovery -----------------------------------------------------

    fn pid_marker_path(&self, worker: &WorkerRow) -> std::path::PathBuf {
        self.config.pids_dir().join(format!("{}.pid", worker.short_id()))
    }

    fn write_pid_marker(&self, worker: &WorkerRow) -> Option<std::path::PathBuf> {
        let path = self.pid_marker_path(worker);
        if let Err(e) = std::fs::create_dir_all(self.config.pids_dir()) {
            warn!(error = %e, "could not create pids dir");
            return None;
        }
        let content = format!(
            "{}:{}:{}",
            std::process::id(),
            worker.id,
            Utc::now().to_rfc3339()
        );
        match std::fs::write(&path, content) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(error = %e, "could not write pid marker");
                None
            }
        }
    }

    fn remove_pid_marker(&self, marker: Option<std::path::PathBuf>) {
        if let Some(path) = marker {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Startup sweep: any PID marker pointing at a dead process means the
    /// executor crashed mid-run. Fail the worker and clear the marker.
    fn recover_orphans(&self) -> Result<()> {
        let pids_dir = self.config.pids_dir();
        if !pids_dir.is_dir() {
            return Ok(());
        }

        for entry in std::fs::read_dir(&pids_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pid") {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Some((pid, worker_id)) = parse_pid_marker(&content) else {
                let _ = std::fs::remove_file(&path);
                continue;
            };

            if pid_alive(pid) {
                continue;
            }

            warn!(worker_id, pid, "stale pid marker, failing crashed worker");
            let row: Option<WorkerRow> = self.db.fetch_one(
                &format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = ?1"),
                [&worker_id],
                WorkerRow::from_row,
            )?;
            if let Some(worker) = row {
                if worker.status == WorkerStatus::Running {
                    self.fail_worker(&worker, "executor process died mid-run");
                }
            }
            let _ = std::fs::remove_file(&path);
        }
        Ok(())
    }
}

/// Parse a PID marker body (`{pid}:{worker_id}:{iso_ts}`).
pub fn parse_pid_marker(content: &str) -> Option<(u32, String)> {
    let mut parts = content.trim().splitn(3, ':');
    let pid = parts.next()?.parse().ok()?;
    let worker_id = parts.next()?.to_string();
    (!worker_id.is_empty()).then_some((pid, worker_id))
}

fn pid_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use steward_tmux::TmuxDriver;

    /// Agent double that replays a scripted event stream.
    struct ScriptedAgent {
        events: Vec<AgentEvent>,
        /// Report to submit mid-stream, as the real agent would via the
        /// worker-tools bridge.
        report: Option<(String, report::ReportStatus, String)>,
        db: Database,
    }

    #[async_trait]
    impl AgentClient for ScriptedAgent {
        async fn run(
            &self,
            _invocation: AgentInvocation,
            events: mpsc::Sender<AgentEvent>,
            _cancel: CancellationToken,
        ) -> crate::error::Result<crate::agent::AgentRunResult> {
            for event in &self.events {
                let _ = events.send(event.clone()).await;
            }
            if let Some((worker_id, status, summary)) = &self.report {
                report::submit_report(&self.db, worker_id, *status, summary, Some("body"), &[])?;
            }
            Ok(crate::agent::AgentRunResult {
                session_id: Some("agent-sess-1".into()),
                text: "done".into(),
            })
        }
    }

    fn test_executor(agent: Arc<dyn AgentClient>, db: Database) -> Arc<WorkerExecutor> {
        let bus = Arc::new(EventBus::new());
        let notifier = Arc::new(Notifier::new(db.clone(), TmuxDriver::new("test")));
        let mut config = StewardConfig::default();
        config.repo_root = std::env::temp_dir().join(format!(
            "steward-test-{}",
            uuid::Uuid::new_v4().simple()
        ));
        WorkerExecutor::new(db, config, bus, notifier, agent)
    }

    fn insert_pending_worker(db: &Database, id: &str, task_type: &str) -> WorkerRow {
        let now = Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO workers (id, task_type, params_json, conversation_id, status,
                                  created_at, updated_at)
             VALUES (?1, ?2, '{\"company\": \"Acme\"}', 'chief', 'pending', ?3, ?3)",
            rusqlite::params![id, task_type, now],
        )
        .unwrap();
        db.fetch_one(
            &format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = ?1"),
            [id],
            WorkerRow::from_row,
        )
        .unwrap()
        .unwrap()
    }

    #[test]
    fn pid_marker_round_trip() {
        let (pid, id) = parse_pid_marker("4242:w-abc:2026-01-01T00:00:00Z").unwrap();
        assert_eq!(pid, 4242);
        assert_eq!(id, "w-abc");
        assert!(parse_pid_marker("garbage").is_none());
        assert!(parse_pid_marker("").is_none());
    }

    #[tokio::test]
    async fn worker_report_finalizes_row_and_publishes() {
        let db = Database::open_in_memory().unwrap();
        let worker = insert_pending_worker(&db, "w-report-1", "company_research");
        db.execute(
            "UPDATE workers SET status = 'running' WHERE id = 'w-report-1'",
            [],
        )
        .unwrap();

        let agent = Arc::new(ScriptedAgent {
            events: vec![AgentEvent::Text("researching".into())],
            report: Some((
                "w-report-1".into(),
                report::ReportStatus::Complete,
                "Researched Acme".into(),
            )),
            db: db.clone(),
        });
        let executor = test_executor(agent, db.clone());
        let mut completed = executor.bus.subscribe("worker.completed");

        executor.execute_worker(worker, None).await;

        let (status, kind, md): (String, String, String) = db
            .fetch_one(
                "SELECT status, attention_kind, report_md FROM workers WHERE id = 'w-report-1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(status, "complete");
        assert_eq!(kind, "result");
        assert!(md.starts_with("---\nstatus: complete"));

        let event = completed.recv().await.unwrap();
        assert_eq!(event.payload["short_id"], "w-report");
    }

    #[tokio::test]
    async fn silent_worker_gets_synthesized_failure() {
        let db = Database::open_in_memory().unwrap();
        let worker = insert_pending_worker(&db, "w-silent-1", "company_research");
        db.execute(
            "UPDATE workers SET status = 'running' WHERE id = 'w-silent-1'",
            [],
        )
        .unwrap();

        let agent = Arc::new(ScriptedAgent {
            events: vec![AgentEvent::Text("working...".into())],
            report: None,
            db: db.clone(),
        });
        let executor = test_executor(agent, db.clone());
        let mut failed = executor.bus.subscribe("worker.failed");

        executor.execute_worker(worker, None).await;

        let (status, md): (String, String) = db
            .fetch_one(
                "SELECT status, report_md FROM workers WHERE id = 'w-silent-1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(status, "failed");
        assert!(md.contains("without calling report()"));
        assert!(failed.recv().await.is_some());
    }

    #[tokio::test]
    async fn clarification_request_is_not_a_terminal_event() {
        let db = Database::open_in_memory().unwrap();
        let worker = insert_pending_worker(&db, "w-clarify-1", "company_research");
        db.execute(
            "UPDATE workers SET status = 'running' WHERE id = 'w-clarify-1'",
            [],
        )
        .unwrap();

        let agent = Arc::new(ScriptedAgent {
            events: vec![AgentEvent::Text("need input".into())],
            report: Some((
                "w-clarify-1".into(),
                report::ReportStatus::NeedsClarification,
                "Which Acme?".into(),
            )),
            db: db.clone(),
        });
        let executor = test_executor(agent, db.clone());
        let mut completed = executor.bus.subscribe("worker.completed");
        let mut failed = executor.bus.subscribe("worker.failed");

        executor.execute_worker(worker, None).await;

        let (status, kind): (String, String) = db
            .fetch_one(
                "SELECT status, attention_kind FROM workers WHERE id = 'w-clarify-1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(status, "awaiting_clarification");
        assert_eq!(kind, "clarification");

        // Neither terminal topic saw an event for the parked worker.
        assert!(completed.try_recv().is_none());
        assert!(failed.try_recv().is_none());
    }

    #[tokio::test]
    async fn terminate_cancels_active_worker_only() {
        let db = Database::open_in_memory().unwrap();
        let agent = Arc::new(ScriptedAgent {
            events: vec![],
            report: None,
            db: db.clone(),
        });
        let executor = test_executor(agent, db);

        let token = CancellationToken::new();
        executor.active.insert("w-live".into(), token.clone());

        assert!(executor.terminate("w-live"));
        assert!(token.is_cancelled());
        // Already removed; a second attempt reports not found.
        assert!(!executor.terminate("w-live"));
        assert!(!executor.terminate("w-ghost"));
    }

    #[tokio::test]
    async fn dependency_gating() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO workers (id, task_type, status, created_at, updated_at)
             VALUES ('dep-1', 'adhoc', 'running', ?1, ?1)",
            [&now],
        )
        .unwrap();
        db.execute(
            "INSERT INTO workers (id, task_type, depends_on_json, status, created_at, updated_at)
             VALUES ('child-1', 'adhoc', '[\"dep-1\"]', 'pending', ?1, ?1)",
            [&now],
        )
        .unwrap();

        let agent = Arc::new(ScriptedAgent {
            events: vec![],
            report: None,
            db: db.clone(),
        });
        let executor = test_executor(agent, db.clone());

        let child: WorkerRow = db
            .fetch_one(
                &format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = 'child-1'"),
                [],
                WorkerRow::from_row,
            )
            .unwrap()
            .unwrap();
        assert!(!executor.dependencies_complete(&child).unwrap());

        db.execute("UPDATE workers SET status = 'complete' WHERE id = 'dep-1'", [])
            .unwrap();
        assert!(executor.dependencies_complete(&child).unwrap());
    }
}
