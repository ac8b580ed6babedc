//! Mission scheduler - dispatches due specialist missions and follows the
//! running one to completion. Chief work never goes through here; that is
//! duty territory.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use steward_bus::EventBus;
use steward_core::config::{StewardConfig, SCHEDULER_TICK_SECS};
use steward_sessions::{SessionManager, SpawnRequest};
use steward_storage::Database;
use steward_tmux::TmuxDriver;

use crate::heartbeat::Heartbeat;
use crate::schedule::compute_next_run;
use crate::store;
use crate::types::Mission;

/// Orphan-execution sweep runs every this many ticks (~5 minutes).
const CLEANUP_INTERVAL_TICKS: u32 = 10;

pub struct MissionScheduler {
    db: Database,
    sessions: Arc<SessionManager>,
    bus: Arc<EventBus>,
    tmux: TmuxDriver,
    config: StewardConfig,
    heartbeat: Heartbeat,

    /// (slug, execution_id) of the mission currently being tracked.
    running: Option<(String, String)>,
    /// Slugs already dispatched today; reset at local midnight.
    executed_today: HashSet<String>,
    last_date: Option<String>,
    cleanup_counter: u32,
}

impl MissionScheduler {
    pub fn new(
        db: Database,
        sessions: Arc<SessionManager>,
        bus: Arc<EventBus>,
        tmux: TmuxDriver,
        config: StewardConfig,
        heartbeat: Heartbeat,
    ) -> Self {
        Self {
            db,
            sessions,
            bus,
            tmux,
            config,
            heartbeat,
            running: None,
            executed_today: HashSet::new(),
            last_date: None,
            cleanup_counter: 0,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("mission scheduler starting (specialist missions only)");

        let mut interval = tokio::time::interval(Duration::from_secs(SCHEDULER_TICK_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mission scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&mut self) {
        let today = Utc::now()
            .with_timezone(&self.config.tz())
            .format("%Y-%m-%d")
            .to_string();
        if self.last_date.as_deref() != Some(today.as_str()) {
            self.executed_today.clear();
            self.last_date = Some(today);
        }

        self.check_and_execute_missions().await;

        if self.running.is_some() {
            self.check_running_mission().await;
        }

        self.heartbeat.check_and_send().await;

        self.cleanup_counter += 1;
        if self.cleanup_counter >= CLEANUP_INTERVAL_TICKS {
            self.cleanup_counter = 0;
            match self.sessions.cleanup_orphan_mission_executions() {
                Ok(cleaned) if cleaned > 0 => {
                    info!(cleaned, "orphaned mission executions closed")
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "orphan execution cleanup failed"),
            }
        }
    }

    async fn check_and_execute_missions(&mut self) {
        if self.running.is_some() {
            return;
        }

        let due = match store::due_missions(&self.db, &Utc::now().to_rfc3339()) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "due-mission query failed");
                return;
            }
        };

        for mission in due {
            if self.executed_today.contains(&mission.slug) {
                debug!(slug = %mission.slug, "already executed today, skipping");
                continue;
            }
            self.executed_today.insert(mission.slug.clone());
            self.execute_mission(&mission).await;
            // One at a time.
            break;
        }
    }

    async fn execute_mission(&mut self, mission: &Mission) {
        info!(slug = %mission.slug, name = %mission.name, "executing mission");

        // Clear next_run first so a crash mid-spawn cannot double-dispatch.
        if let Err(e) = store::clear_next_run(&self.db, &mission.id) {
            error!(error = %e, "failed to clear next_run, not dispatching");
            return;
        }

        let execution_id =
            match store::create_mission_execution(&self.db, &mission.id, &mission.slug) {
                Ok(id) => id,
                Err(e) => {
                    error!(error = %e, "failed to create mission execution");
                    return;
                }
            };

        let mut req = SpawnRequest::new(mission.role, mission.mode);
        req.window_name = Some(mission_window_name(&mission.slug));
        req.initial_task = Some(build_initial_task(mission));
        req.mission_execution_id = Some(execution_id.clone());
        req.mission_slug = Some(mission.slug.clone());

        let result = self.sessions.spawn(req).await;
        if result.ok {
            if let Some(ref session_id) = result.session_id {
                let _ = store::set_execution_session(&self.db, &execution_id, session_id);
            }
            info!(slug = %mission.slug, window = ?result.window_name, "mission started");
            self.running = Some((mission.slug.clone(), execution_id));
        } else {
            error!(slug = %mission.slug, error = ?result.error, "mission spawn failed");
            let _ = store::complete_mission_execution(
                &self.db,
                &execution_id,
                "failed",
                result.error.as_deref(),
            );
            self.bus.publish(
                "mission.completed",
                serde_json::json!({ "slug": mission.slug, "status": "failed" }),
            );
        }
    }

    /// Follow the tracked mission: when its execution row leaves `running`,
    /// record last_run/status, schedule the next occurrence, and tear down
    /// the window.
    async fn check_running_mission(&mut self) {
        let Some((slug, execution_id)) = self.running.clone() else {
            return;
        };

        let execution = match store::get_mission_execution(&self.db, &execution_id) {
            Ok(Some(execution)) => execution,
            Ok(None) => {
                warn!(slug = %slug, "tracked execution row vanished");
                self.running = None;
                return;
            }
            Err(e) => {
                error!(error = %e, "execution poll failed");
                return;
            }
        };

        if execution.status == "running" {
            return;
        }
        info!(slug = %slug, status = %execution.status, "mission completed");

        if let Ok(Some(mission)) = store::get_mission(&self.db, &slug) {
            let _ = store::update_mission_last_run(&self.db, &mission.id, &execution.status);

            if mission.is_recurring() && mission.enabled {
                let now_local = Utc::now().with_timezone(&self.config.tz());
                if let Some(next) = compute_next_run(
                    mission.schedule_type.as_deref(),
                    mission.schedule_time.as_deref(),
                    &mission.schedule_days,
                    mission.schedule_cron.as_deref(),
                    now_local,
                ) {
                    let _ = store::set_next_run(&self.db, &mission.id, &next);
                    debug!(slug = %slug, next_run = %next, "next run scheduled");
                }
            }
        }

        self.bus.publish(
            "mission.completed",
            serde_json::json!({ "slug": slug, "status": execution.status }),
        );

        let _ = self.tmux.kill_window(&mission_window_name(&slug)).await;
        self.running = None;
    }
}

fn mission_window_name(slug: &str) -> String {
    format!("mission-{}", &slug[..slug.len().min(12)])
}

/// The task message a mission session starts with: the inline prompt when
/// present, otherwise a pointer at the prompt file.
pub fn build_initial_task(mission: &Mission) -> String {
    if let Some(ref inline) = mission.prompt_inline {
        if !inline.is_empty() {
            return inline.clone();
        }
    }
    match mission.prompt_file {
        Some(ref file) => format!(
            "[SYSTEM]: Scheduled task - {}. See {}",
            mission.name, file
        ),
        None => format!("[SYSTEM]: Scheduled task - {}", mission.name),
    }
}
