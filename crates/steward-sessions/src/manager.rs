//! Unified session lifecycle manager.
//!
//! Single writer for the `sessions` and `handoffs` tables. Every component
//! that needs an agent process - schedulers, HTTP handlers, the chief
//! heartbeat - goes through this type; nothing else touches tmux windows
//! that hold sessions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use steward_bus::EventBus;
use steward_core::config::{StewardConfig, AGENT_READY_TIMEOUT_SECS};
use steward_core::time::{now_iso, parse_iso};
use steward_core::types::{self, Mode, Role, SessionState, CHIEF_CONVERSATION_ID};
use steward_notify::Notifier;
use steward_storage::{settings, Database};
use steward_tmux::{probe, TmuxDriver};

use crate::error::Result;
use crate::prompt;
use crate::types::{ChiefMessage, HandoffReason, Session, SpawnRequest, SpawnResult};
use crate::wake;

pub const SESSION_COLUMNS: &str = "session_id, conversation_id, parent_session_id, role, mode, \
     window_name, tmux_pane, cwd, transcript_path, agent_session_id, spec_path, \
     mission_execution_id, description, status_text, current_state, started_at, \
     last_seen_at, ended_at, end_reason";

const CHIEF_WINDOW: &str = "chief";

pub struct SessionManager {
    db: Database,
    tmux: TmuxDriver,
    bus: Arc<EventBus>,
    notifier: Arc<Notifier>,
    config: StewardConfig,
}

impl SessionManager {
    pub fn new(
        db: Database,
        tmux: TmuxDriver,
        bus: Arc<EventBus>,
        notifier: Arc<Notifier>,
        config: StewardConfig,
    ) -> Self {
        Self {
            db,
            tmux,
            bus,
            notifier,
            config,
        }
    }

    // =========================================================================
    // SPAWN
    // =========================================================================

    /// Spawn a new agent session in tmux. This is THE way sessions come into
    /// existence; every other path funnels here.
    #[instrument(skip(self, req), fields(role = %req.role(), mode = %req.mode()))]
    pub async fn spawn(&self, req: SpawnRequest) -> SpawnResult {
        let role = req.role();
        let mode = req.mode();
        let session_id = types::short_id();

        let conversation_id = req.conversation_id.clone().unwrap_or_else(|| {
            if role.is_chief() {
                CHIEF_CONVERSATION_ID.to_string()
            } else {
                let now_local = Utc::now()
                    .with_timezone(&self.config.tz())
                    .naive_local();
                types::specialist_conversation_id(role, now_local)
            }
        });

        let window_name = req
            .window_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", role, session_id));

        let mut window_created = false;
        let outcome = self
            .spawn_inner(
                &req,
                role,
                mode,
                &session_id,
                &conversation_id,
                &window_name,
                &mut window_created,
            )
            .await;

        match outcome {
            Ok(result) => result,
            Err(e) => {
                // Roll back the window only if this spawn created it.
                if window_created {
                    let _ = self.tmux.kill_window(&window_name).await;
                }
                warn!(error = %e, window = %window_name, "spawn failed");
                SpawnResult::failure(e.to_string())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn spawn_inner(
        &self,
        req: &SpawnRequest,
        role: Role,
        mode: Mode,
        session_id: &str,
        conversation_id: &str,
        window_name: &str,
        window_created: &mut bool,
    ) -> Result<SpawnResult> {
        self.tmux.ensure_session(&self.config.repo_root).await?;

        if self.tmux.window_exists(window_name).await? {
            if self.tmux.is_agent_running(window_name).await {
                return Ok(SpawnResult::failure(format!(
                    "agent already running in window '{}'",
                    window_name
                )));
            }
            // Dormant window - reuse it as-is.
        } else {
            self.tmux
                .create_window(window_name, &self.config.repo_root)
                .await?;
            *window_created = true;
            // Give the fresh shell a moment to print its prompt.
            tokio::time::sleep(Duration::from_millis(400)).await;
        }

        let target = self.tmux.target(window_name);

        // Export identity into the window's shell so the agent's hooks can
        // identify themselves, then start the agent binary.
        let env_line = build_env_exports(&self.config, req, session_id, conversation_id);
        self.tmux.send_text(&target, &env_line, true).await?;
        tokio::time::sleep(Duration::from_millis(300)).await;

        // The agent gets a fresh full UUID - its own session namespace,
        // distinct from our short internal id.
        let agent_session_id = Uuid::new_v4().to_string();
        let model = settings::model_for_role(&self.db, role.as_str());
        let agent_cmd = build_agent_command(&self.config.agent.command, &agent_session_id, model.as_deref());
        self.tmux.send_text(&target, &agent_cmd, true).await?;

        if !req.skip_ready_wait {
            self.wait_for_agent_ready(&target).await?;
        }

        let pane = self.tmux.pane_id(&target).await.ok();
        if let Err(e) = self.insert_session_row(
            req,
            role,
            mode,
            session_id,
            conversation_id,
            window_name,
            pane.as_deref(),
            &agent_session_id,
        ) {
            // Window and agent are already up; cleanup will find the orphan.
            // Emit the start event best-effort so timelines stay coherent.
            self.bus.publish(
                "session.started",
                serde_json::json!({
                    "session_id": session_id,
                    "role": role.as_str(),
                    "mode": mode.as_str(),
                    "window": window_name,
                }),
            );
            return Ok(SpawnResult::failure(format!(
                "session row insert failed: {}",
                e
            )));
        }

        let prompt = prompt::build_initial_prompt(&self.config, req);
        self.notifier.send_initial_prompt(&target, &prompt).await?;

        self.bus.publish(
            "session.started",
            serde_json::json!({
                "session_id": session_id,
                "conversation_id": conversation_id,
                "role": role.as_str(),
                "mode": mode.as_str(),
                "window": window_name,
                "description": req.description,
            }),
        );

        info!(session_id, window = %window_name, "session spawned");
        Ok(SpawnResult::success(
            session_id.to_string(),
            window_name.to_string(),
            conversation_id.to_string(),
        ))
    }

    async fn wait_for_agent_ready(&self, target: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(AGENT_READY_TIMEOUT_SECS);
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            if let Ok(content) = self.tmux.capture_pane(target).await {
                if probe::pane_ready(&content) {
                    // Extra beat so the TUI finishes initializing.
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(crate::error::SessionError::ReadyTimeout {
                    secs: AGENT_READY_TIMEOUT_SECS,
                });
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_session_row(
        &self,
        req: &SpawnRequest,
        role: Role,
        mode: Mode,
        session_id: &str,
        conversation_id: &str,
        window_name: &str,
        pane: Option<&str>,
        agent_session_id: &str,
    ) -> Result<()> {
        let now = now_iso();
        self.db.execute(
            "INSERT INTO sessions
             (session_id, conversation_id, parent_session_id, role, mode, window_name,
              tmux_pane, cwd, agent_session_id, spec_path, mission_execution_id,
              description, current_state, started_at, last_seen_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 'idle', ?13, ?13, ?13)",
            rusqlite::params![
                session_id,
                conversation_id,
                req.parent_session_id,
                role.as_str(),
                mode.as_str(),
                window_name,
                pane,
                self.config.repo_root.to_string_lossy(),
                agent_session_id,
                req.spec_path,
                req.mission_execution_id,
                req.description,
                now,
            ],
        )?;
        Ok(())
    }

    // =========================================================================
    // QUERY
    // =========================================================================

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.db.fetch_one(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
            [session_id],
            Session::from_row,
        )?)
    }

    pub fn get_active_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.db.fetch_all(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE ended_at IS NULL ORDER BY started_at DESC"
            ),
            [],
            Session::from_row,
        )?)
    }

    pub fn find_session_by_pane(&self, pane: &str) -> Result<Option<Session>> {
        Ok(self.db.fetch_one(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE tmux_pane = ?1 AND ended_at IS NULL"
            ),
            [pane],
            Session::from_row,
        )?)
    }

    /// Most recent active session of a conversation, if any.
    pub fn active_session_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Session>> {
        Ok(self.db.fetch_one(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE conversation_id = ?1 AND ended_at IS NULL
                 ORDER BY started_at DESC LIMIT 1"
            ),
            [conversation_id],
            Session::from_row,
        )?)
    }

    /// Resolve the session this process belongs to: CLAUDE_SESSION_ID env
    /// first, TMUX_PANE lookup second.
    pub fn get_current_session(&self) -> Result<Option<Session>> {
        if let Ok(id) = std::env::var("CLAUDE_SESSION_ID") {
            if !id.is_empty() {
                return self.get_session(&id);
            }
        }
        if let Ok(pane) = std::env::var("TMUX_PANE") {
            if !pane.is_empty() {
                return self.find_session_by_pane(&pane);
            }
        }
        Ok(None)
    }

    // =========================================================================
    // STATE UPDATES
    // =========================================================================

    pub fn heartbeat(&self, session_id: &str) -> Result<bool> {
        let now = now_iso();
        let n = self.db.execute(
            "UPDATE sessions SET last_seen_at = ?1, updated_at = ?1 WHERE session_id = ?2",
            rusqlite::params![now, session_id],
        )?;
        Ok(n > 0)
    }

    pub fn set_status(&self, session_id: &str, status_text: &str) -> Result<bool> {
        let n = self.db.execute(
            "UPDATE sessions SET status_text = ?1, updated_at = ?2 WHERE session_id = ?3",
            rusqlite::params![status_text, now_iso(), session_id],
        )?;
        Ok(n > 0)
    }

    pub fn set_state(&self, session_id: &str, state: SessionState) -> Result<bool> {
        let n = self.db.execute(
            "UPDATE sessions SET current_state = ?1, updated_at = ?2 WHERE session_id = ?3",
            rusqlite::params![state.as_str(), now_iso(), session_id],
        )?;
        if n > 0 {
            self.bus.publish(
                "session.state",
                serde_json::json!({ "session_id": session_id, "state": state.as_str() }),
            );
        }
        Ok(n > 0)
    }

    // =========================================================================
    // END & CLEANUP
    // =========================================================================

    /// End a session. Idempotent: a second call on an ended session succeeds
    /// without touching the row again.
    #[instrument(skip(self))]
    pub async fn end(&self, session_id: &str, reason: &str, close_tmux: bool) -> Result<bool> {
        let Some(session) = self.get_session(session_id)? else {
            return Ok(false);
        };
        if session.ended_at.is_some() {
            return Ok(true);
        }

        let now = now_iso();
        self.db.execute(
            "UPDATE sessions
             SET ended_at = ?1, end_reason = ?2, current_state = 'ended', updated_at = ?1
             WHERE session_id = ?3 AND ended_at IS NULL",
            rusqlite::params![now, reason, session_id],
        )?;

        self.bus.publish(
            "session.ended",
            serde_json::json!({
                "session_id": session_id,
                "role": session.role.as_str(),
                "mode": session.mode.as_str(),
                "reason": reason,
            }),
        );

        if close_tmux {
            if let Some(ref pane) = session.tmux_pane {
                let _ = self.tmux.kill_pane(pane).await;
            }
        }

        info!(session_id, reason, "session ended");
        Ok(true)
    }

    /// End active sessions whose pane is gone and whose last heartbeat is
    /// older than `max_age_hours`. Returns the number cleaned.
    pub async fn cleanup_orphans(&self, max_age_hours: i64) -> Result<usize> {
        let active = self.get_active_sessions()?;
        let now = Utc::now();
        let mut cleaned = 0usize;

        for session in active {
            let age_hours = parse_iso(&session.last_seen_at)
                .map(|seen| (now - seen).num_minutes() as f64 / 60.0)
                .unwrap_or(f64::INFINITY);
            if age_hours < max_age_hours as f64 {
                continue;
            }

            let pane_exists = match session.tmux_pane {
                Some(ref pane) => self.tmux.pane_exists(pane).await,
                None => false,
            };
            if !pane_exists {
                // The pane is gone; there is nothing to kill.
                self.end(&session.session_id, "orphan_cleanup", false)
                    .await?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            info!(cleaned, "orphan sessions ended");
        }
        Ok(cleaned)
    }

    /// Close out `running` mission executions whose session has ended,
    /// deriving the terminal status from how the session ended.
    pub fn cleanup_orphan_mission_executions(&self) -> Result<usize> {
        let orphaned: Vec<String> = self.db.fetch_all(
            "SELECT me.id
             FROM mission_executions me
             LEFT JOIN sessions s ON s.mission_execution_id = me.id AND s.ended_at IS NULL
             WHERE me.status = 'running' AND s.session_id IS NULL",
            [],
            |row| row.get(0),
        )?;

        let now = now_iso();
        let mut cleaned = 0usize;
        for exec_id in orphaned {
            let end_reason: Option<Option<String>> = self.db.fetch_one(
                "SELECT end_reason FROM sessions
                 WHERE mission_execution_id = ?1
                 ORDER BY ended_at DESC LIMIT 1",
                [&exec_id],
                |row| row.get(0),
            )?;

            let status = match end_reason {
                Some(Some(ref reason)) => match reason.as_str() {
                    "exit" => "completed",
                    "timeout" => "timeout",
                    "crash" | "error" => "failed",
                    _ => "cancelled",
                },
                // No session ever linked - the spawn itself failed.
                _ => "failed",
            };

            self.db.execute(
                "UPDATE mission_executions SET status = ?1, ended_at = ?2 WHERE id = ?3",
                rusqlite::params![status, now, exec_id],
            )?;
            cleaned += 1;
        }
        Ok(cleaned)
    }

    // =========================================================================
    // HANDOFF
    // =========================================================================

    /// Cycle a session to a successor that inherits its conversation.
    #[instrument(skip(self))]
    pub async fn handoff(
        &self,
        session_id: &str,
        handoff_path: &str,
        reason: HandoffReason,
    ) -> Result<SpawnResult> {
        let Some(session) = self.get_session(session_id)? else {
            return Ok(SpawnResult::failure("session not found"));
        };

        let handoff_id = Uuid::new_v4().to_string();
        let now = now_iso();
        self.db.execute(
            "INSERT INTO handoffs
             (id, session_id, role, mode, tmux_pane, handoff_path, reason, status,
              requested_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'executing', ?8, ?8)",
            rusqlite::params![
                handoff_id,
                session_id,
                session.role.as_str(),
                session.mode.as_str(),
                session.tmux_pane,
                handoff_path,
                reason.as_str(),
                now,
            ],
        )?;

        self.end(session_id, "handoff", true).await?;
        // Let tmux finish tearing down the pane before we reuse the window.
        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut req = SpawnRequest::new(session.role, session.mode);
        req.window_name = session
            .role
            .is_chief()
            .then(|| CHIEF_WINDOW.to_string());
        req.handoff_path = Some(handoff_path.to_string());
        req.handoff_reason = Some(reason.as_str().to_string());
        req.conversation_id = Some(session.conversation_id.clone());
        req.mission_execution_id = session.mission_execution_id.clone();
        req.spec_path = session.spec_path.clone();
        req.parent_session_id = Some(session_id.to_string());

        let result = self.spawn(req).await;

        let now = now_iso();
        if result.ok {
            self.db.execute(
                "UPDATE handoffs
                 SET status = 'complete', completed_at = ?1, new_session_id = ?2, updated_at = ?1
                 WHERE id = ?3",
                rusqlite::params![now, result.session_id, handoff_id],
            )?;
        } else {
            self.db.execute(
                "UPDATE handoffs SET status = 'failed', error = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![result.error, now, handoff_id],
            )?;
        }

        Ok(result)
    }

    /// Inject a handoff-now warning into a running session.
    pub async fn force_handoff(&self, session_id: &str) -> Result<bool> {
        let Some(session) = self.get_session(session_id)? else {
            return Ok(false);
        };
        let (Some(pane), None) = (session.tmux_pane.as_deref(), session.ended_at.as_ref())
        else {
            return Ok(false);
        };

        let message = "[SYSTEM WARNING - FORCE HANDOFF REQUESTED]\n\n\
            The user has requested an immediate session handoff.\n\
            Your context may be running low or a fresh session is needed.\n\n\
            **Action required:**\n\
            1. Write handoff notes to your workspace (or TODAY.md if you're Chief)\n\
            2. Call session_handoff() with the handoff path\n\
            3. If you have in-flight workers, wait for them or note their status\n\n\
            Do this NOW before continuing any other work.";
        self.tmux.inject_message(pane, message, None).await?;
        Ok(true)
    }

    // =========================================================================
    // MESSAGING
    // =========================================================================

    pub async fn send_message(&self, session_id: &str, text: &str) -> Result<bool> {
        let Some(session) = self.get_session(session_id)? else {
            return Ok(false);
        };
        let Some(pane) = session.tmux_pane else {
            return Ok(false);
        };
        self.tmux
            .inject_message(&pane, text, Some("Dashboard"))
            .await?;
        Ok(true)
    }

    /// Raw keystroke passthrough (Escape, C-c, …).
    pub async fn send_keystroke(&self, session_id: &str, key: &str) -> Result<bool> {
        let Some(session) = self.get_session(session_id)? else {
            return Ok(false);
        };
        let Some(pane) = session.tmux_pane else {
            return Ok(false);
        };
        self.tmux.send_key(&pane, key).await?;
        Ok(true)
    }

    pub async fn focus(&self, session_id: &str) -> Result<bool> {
        let Some(session) = self.get_session(session_id)? else {
            return Ok(false);
        };
        let Some(window) = session.window_name else {
            return Ok(false);
        };
        self.tmux.select_window(&window).await?;
        Ok(true)
    }

    // =========================================================================
    // CHIEF OPERATIONS
    // =========================================================================

    pub async fn is_chief_running(&self) -> bool {
        match self.tmux.window_exists(CHIEF_WINDOW).await {
            Ok(true) => self.tmux.is_agent_running(CHIEF_WINDOW).await,
            _ => false,
        }
    }

    /// Spawn the chief in its stable window. With `force`, a running chief
    /// is reset first instead of failing on the busy window.
    pub async fn spawn_chief(&self, handoff_path: Option<&str>, force: bool) -> SpawnResult {
        if force && self.is_chief_running().await {
            return self.reset_chief(handoff_path).await;
        }

        let mut req = SpawnRequest::new(Role::Chief, Mode::Interactive);
        req.window_name = Some(CHIEF_WINDOW.to_string());
        req.handoff_path = handoff_path.map(str::to_string);
        req.handoff_reason = handoff_path.map(|_| "chief_cycle".to_string());
        self.spawn(req).await
    }

    /// Kill the running chief agent without its cooperation and end every
    /// active chief row with `end_reason`. Escalation ladder: interrupt key
    /// polled for 5 s, then a polite `/exit`, then pane kill.
    ///
    /// The caller holds the chief window from here until its replacement is
    /// up - nothing else may touch it in between.
    pub async fn force_kill_chief(&self, end_reason: &str) -> Result<()> {
        let target = self.tmux.target(CHIEF_WINDOW);

        if self
            .tmux
            .window_exists(CHIEF_WINDOW)
            .await
            .unwrap_or(false)
        {
            let mut alive = self.tmux.is_agent_running(CHIEF_WINDOW).await;
            if alive {
                let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
                while alive && tokio::time::Instant::now() < deadline {
                    let _ = self.tmux.send_key(&target, "C-c").await;
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                    alive = self.tmux.is_agent_running(CHIEF_WINDOW).await;
                }
            }
            if alive {
                let _ = self.tmux.send_text(&target, "/exit", true).await;
                tokio::time::sleep(Duration::from_millis(1500)).await;
                alive = self.tmux.is_agent_running(CHIEF_WINDOW).await;
            }
            if alive {
                warn!("chief refused interrupt and /exit, killing pane");
                if let Ok(pane) = self.tmux.pane_id(&target).await {
                    let _ = self.tmux.kill_pane(&pane).await;
                }
            }
        }

        self.db.execute(
            "UPDATE sessions
             SET ended_at = ?1, end_reason = ?2, current_state = 'ended', updated_at = ?1
             WHERE role = 'chief' AND ended_at IS NULL",
            rusqlite::params![now_iso(), end_reason],
        )?;
        Ok(())
    }

    /// Force-reset the chief: kill the running agent without its
    /// cooperation, end every active chief row, spawn fresh.
    ///
    /// The replacement deliberately has no parent_session_id - force reset
    /// does not chain lineage the way a cooperative handoff does.
    #[instrument(skip(self))]
    pub async fn reset_chief(&self, handoff_path: Option<&str>) -> SpawnResult {
        if let Err(e) = self.force_kill_chief("force_reset").await {
            return SpawnResult::failure(format!("failed to kill chief: {}", e));
        }

        let mut req = SpawnRequest::new(Role::Chief, Mode::Interactive);
        req.window_name = Some(CHIEF_WINDOW.to_string());
        req.handoff_path = handoff_path.map(str::to_string);
        self.spawn(req).await
    }

    /// Format and inject a message into the chief's window.
    pub async fn send_to_chief(&self, message: ChiefMessage) -> Result<bool> {
        if !self.is_chief_running().await {
            return Ok(false);
        }

        let formatted = match message {
            ChiefMessage::Wake {
                wake_type,
                minutes_since_last,
                event_title,
            } => {
                self.format_wake(&wake_type, minutes_since_last, event_title.as_deref())
                    .await
            }
            ChiefMessage::Drop(msg) => format!(
                "[DROP] {msg}\n\nNo response needed. File this and continue what you were doing."
            ),
            ChiefMessage::Bug(msg) => format!(
                "[BUG] {msg}\n\nAdd to TODAY.md Open Loops with bug tag. Brief acknowledgment."
            ),
            ChiefMessage::Idea(msg) => format!(
                "[IDEA] {msg}\n\nCapture to the ideas file or appropriate place. Brief acknowledgment."
            ),
            ChiefMessage::Dump(msg) => format!(
                "[BRAIN-DUMP]\n{msg}\n\nRapid capture mode. File each item silently. Say \"Done.\" when complete."
            ),
            ChiefMessage::Say(msg) => msg,
        };

        let target = self.tmux.target(CHIEF_WINDOW);
        self.tmux.inject_message(&target, &formatted, None).await?;
        Ok(true)
    }

    async fn format_wake(
        &self,
        wake_type: &str,
        minutes_since_last: i64,
        event_title: Option<&str>,
    ) -> String {
        let event_alert = match (wake_type, event_title) {
            ("PRE_EVENT", Some(title)) => {
                format!("\nUPCOMING: \"{title}\" starting in 5-10 minutes!\n")
            }
            ("POST_EVENT", Some(title)) => {
                format!("\nJUST ENDED: \"{title}\" - How did it go?\n")
            }
            _ => String::new(),
        };

        let (activity, idle_minutes) = wake::activity_summary(&self.db, 15);
        let now_local = Utc::now().with_timezone(&self.config.tz());
        let active_window = self
            .tmux
            .active_window()
            .await
            .unwrap_or_else(|_| "unknown".to_string());

        format!(
            "[WAKE:{wake_type}]\n\
             Time: {time} ({minutes_since_last}m since last wake)\n\
             {event_alert}\n\
             USER STATE:\n\
             - Active window: {window}\n\
             - Idle: {idle_minutes}m\n\
             {activity}\n\n\
             WORKERS:\n\
             {workers}\n\n\
             SCHEDULE:\n\
             {schedule}\n\n\
             SESSIONS:\n\
             {sessions}",
            time = now_local.format("%H:%M"),
            window = active_window,
            workers = wake::worker_summary(&self.db),
            schedule = wake::schedule_snippet(&self.config.today_md()),
            sessions = wake::sessions_summary(&self.db),
        )
    }
}

/// Env-export line run in the window's shell before the agent starts.
pub fn build_env_exports(
    config: &StewardConfig,
    req: &SpawnRequest,
    session_id: &str,
    conversation_id: &str,
) -> String {
    let role = req.role();
    let mode = req.mode();
    let mut vars = vec![
        format!("CLAUDE_SESSION_ID={}", session_id),
        format!("CLAUDE_SESSION_ROLE={}", role),
        format!("CLAUDE_SESSION_MODE={}", mode),
    ];
    if let Some(ref description) = req.description {
        vars.push(format!(
            "CLAUDE_SESSION_DESCRIPTION=\"{}\"",
            description.replace('"', "\\\"")
        ));
    }
    if let Some(ref execution_id) = req.mission_execution_id {
        vars.push(format!("MISSION_EXECUTION_ID={}", execution_id));
    }
    vars.push(format!("CLAUDE_CONVERSATION_ID={}", conversation_id));
    if let Some(ref parent) = req.parent_session_id {
        vars.push(format!("CLAUDE_PARENT_SESSION_ID={}", parent));
    }
    vars.push(format!(
        "PROJECT_ROOT={}",
        config.repo_root.to_string_lossy()
    ));
    if mode.uses_workspace() {
        vars.push(format!(
            "WORKSPACE={}",
            config.conversation_workspace(conversation_id).display()
        ));
    }
    if let Some(ref spec_path) = req.spec_path {
        vars.push(format!("SPEC_PATH={}", spec_path));
    }
    format!("export {}", vars.join(" "))
}

/// Agent launch command. The UUID here is the agent's own session id.
pub fn build_agent_command(binary: &str, agent_session_id: &str, model: Option<&str>) -> String {
    let mut cmd = format!(
        "{binary} --dangerously-skip-permissions --session-id {agent_session_id}"
    );
    if let Some(model) = model {
        cmd.push_str(&format!(" --model {model}"));
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StewardConfig {
        StewardConfig::default()
    }

    fn manager_with_db(db: Database) -> SessionManager {
        let tmux = TmuxDriver::new("test");
        let bus = Arc::new(EventBus::new());
        let notifier = Arc::new(Notifier::new(db.clone(), TmuxDriver::new("test")));
        SessionManager::new(db, tmux, bus, notifier, test_config())
    }

    fn insert_session(db: &Database, id: &str, conversation: &str, role: &str) {
        let now = now_iso();
        db.execute(
            "INSERT INTO sessions
             (session_id, conversation_id, role, mode, window_name, tmux_pane,
              current_state, started_at, last_seen_at, updated_at)
             VALUES (?1, ?2, ?3, 'interactive', ?3, NULL, 'idle', ?4, ?4, ?4)",
            rusqlite::params![id, conversation, role, now],
        )
        .unwrap();
    }

    #[test]
    fn env_exports_cover_identity_and_paths() {
        let config = test_config();
        let mut req = SpawnRequest::new(Role::Builder, Mode::Implementation);
        req.description = Some("refactor \"api\" layer".into());
        req.mission_execution_id = Some("exec-1".into());
        req.parent_session_id = Some("aaaa1111".into());
        req.spec_path = Some("/tmp/spec.md".into());

        let line = build_env_exports(&config, &req, "bbbb2222", "20260101-0900-builder-x");
        assert!(line.starts_with("export CLAUDE_SESSION_ID=bbbb2222"));
        assert!(line.contains("CLAUDE_SESSION_ROLE=builder"));
        assert!(line.contains("CLAUDE_SESSION_MODE=implementation"));
        assert!(line.contains("CLAUDE_SESSION_DESCRIPTION=\"refactor \\\"api\\\" layer\""));
        assert!(line.contains("MISSION_EXECUTION_ID=exec-1"));
        assert!(line.contains("CLAUDE_PARENT_SESSION_ID=aaaa1111"));
        assert!(line.contains("WORKSPACE="));
        assert!(line.contains("SPEC_PATH=/tmp/spec.md"));
    }

    #[test]
    fn interactive_mode_gets_no_workspace_export() {
        let config = test_config();
        let req = SpawnRequest::new(Role::Chief, Mode::Interactive);
        let line = build_env_exports(&config, &req, "cccc3333", "chief");
        assert!(!line.contains("WORKSPACE="));
        assert!(line.contains("CLAUDE_CONVERSATION_ID=chief"));
    }

    #[test]
    fn agent_command_has_skip_permissions_and_uuid() {
        let cmd = build_agent_command("claude", "f4b2…uuid", Some("opus"));
        assert_eq!(
            cmd,
            "claude --dangerously-skip-permissions --session-id f4b2…uuid --model opus"
        );
        let bare = build_agent_command("claude", "u", None);
        assert!(!bare.contains("--model"));
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        insert_session(&db, "abc12345", "chief", "chief");
        let manager = manager_with_db(db.clone());

        assert!(manager.end("abc12345", "exit", false).await.unwrap());
        let first = manager.get_session("abc12345").unwrap().unwrap();
        let first_ended = first.ended_at.clone().unwrap();
        assert_eq!(first.end_reason.as_deref(), Some("exit"));

        // Second call: success, row untouched.
        assert!(manager.end("abc12345", "crash", false).await.unwrap());
        let second = manager.get_session("abc12345").unwrap().unwrap();
        assert_eq!(second.ended_at.as_deref(), Some(first_ended.as_str()));
        assert_eq!(second.end_reason.as_deref(), Some("exit"));
    }

    #[tokio::test]
    async fn end_unknown_session_is_false() {
        let db = Database::open_in_memory().unwrap();
        let manager = manager_with_db(db);
        assert!(!manager.end("nope", "exit", false).await.unwrap());
    }

    #[test]
    fn conversation_uniqueness_query() {
        let db = Database::open_in_memory().unwrap();
        insert_session(&db, "aaa11111", "chief", "chief");
        let manager = manager_with_db(db.clone());

        let active = manager
            .active_session_for_conversation("chief")
            .unwrap()
            .unwrap();
        assert_eq!(active.session_id, "aaa11111");

        // End it; a successor becomes the single active session.
        db.execute(
            "UPDATE sessions SET ended_at = ?1 WHERE session_id = 'aaa11111'",
            [now_iso()],
        )
        .unwrap();
        insert_session(&db, "bbb22222", "chief", "chief");

        let all_active: Vec<Session> = db
            .fetch_all(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE conversation_id = 'chief' AND ended_at IS NULL"
                ),
                [],
                Session::from_row,
            )
            .unwrap();
        assert_eq!(all_active.len(), 1);
        assert_eq!(all_active[0].session_id, "bbb22222");
    }

    #[test]
    fn orphan_mission_executions_map_end_reasons() {
        let db = Database::open_in_memory().unwrap();
        let now = now_iso();
        for (exec, reason) in [
            ("e-exit", Some("exit")),
            ("e-timeout", Some("timeout")),
            ("e-crash", Some("crash")),
            ("e-other", Some("handoff")),
            ("e-none", None),
        ] {
            db.execute(
                "INSERT INTO mission_executions (id, mission_id, mission_slug, started_at, status)
                 VALUES (?1, 'm1', 'inbox', ?2, 'running')",
                rusqlite::params![exec, now],
            )
            .unwrap();
            if let Some(reason) = reason {
                db.execute(
                    "INSERT INTO sessions
                     (session_id, conversation_id, role, mode, mission_execution_id,
                      current_state, started_at, last_seen_at, ended_at, end_reason, updated_at)
                     VALUES (?1, 'c', 'researcher', 'mission', ?2, 'ended', ?3, ?3, ?3, ?4, ?3)",
                    rusqlite::params![&exec[2..], exec, now, reason],
                )
                .unwrap();
            }
        }

        let manager = manager_with_db(db.clone());
        let cleaned = manager.cleanup_orphan_mission_executions().unwrap();
        assert_eq!(cleaned, 5);

        let status_of = |id: &str| -> String {
            db.fetch_one(
                "SELECT status FROM mission_executions WHERE id = ?1",
                [id],
                |r| r.get(0),
            )
            .unwrap()
            .unwrap()
        };
        assert_eq!(status_of("e-exit"), "completed");
        assert_eq!(status_of("e-timeout"), "timeout");
        assert_eq!(status_of("e-crash"), "failed");
        assert_eq!(status_of("e-other"), "cancelled");
        assert_eq!(status_of("e-none"), "failed");
    }

    #[tokio::test]
    async fn force_kill_chief_ends_every_active_chief_row() {
        let db = Database::open_in_memory().unwrap();
        insert_session(&db, "chief001", "chief", "chief");
        // A lingering duplicate from a crashed run; force kill sweeps both.
        insert_session(&db, "chief002", "chief", "chief");
        insert_session(&db, "build001", "c-b", "builder");
        let manager = manager_with_db(db.clone());

        manager.force_kill_chief("duty_reset").await.unwrap();

        let chiefs: Vec<Session> = db
            .fetch_all(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE role = 'chief'"),
                [],
                Session::from_row,
            )
            .unwrap();
        assert_eq!(chiefs.len(), 2);
        for chief in &chiefs {
            assert!(chief.ended_at.is_some());
            assert_eq!(chief.end_reason.as_deref(), Some("duty_reset"));
        }

        // Non-chief sessions are untouched.
        let builder = manager.get_session("build001").unwrap().unwrap();
        assert!(builder.ended_at.is_none());
    }

    #[tokio::test]
    async fn orphan_cleanup_skips_recent_sessions() {
        let db = Database::open_in_memory().unwrap();
        insert_session(&db, "fresh111", "c1", "builder");
        let manager = manager_with_db(db.clone());

        // Fresh heartbeat, no pane: not old enough to clean.
        let cleaned = manager.cleanup_orphans(2).await.unwrap();
        assert_eq!(cleaned, 0);

        // Age the heartbeat past the threshold.
        db.execute(
            "UPDATE sessions SET last_seen_at = '2020-01-01T00:00:00+00:00' WHERE session_id = 'fresh111'",
            [],
        )
        .unwrap();
        let cleaned = manager.cleanup_orphans(2).await.unwrap();
        assert_eq!(cleaned, 1);

        let row = manager.get_session("fresh111").unwrap().unwrap();
        assert_eq!(row.end_reason.as_deref(), Some("orphan_cleanup"));
    }
}
