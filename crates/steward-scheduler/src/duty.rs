//! Duty scheduler - self-healing fixed-time interrupter for the chief.
//!
//! Duties never store a next_run. Every tick asks "should this have run by
//! now?" against last_run, so downtime heals itself: on startup any missed
//! duty runs once in catch-up mode, and a failed run still advances
//! last_run so the same day is never replayed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use steward_bus::EventBus;
use steward_core::config::{StewardConfig, DUTY_WARNING_SECS, SCHEDULER_TICK_SECS};
use steward_core::types::{Mode, Role};
use steward_sessions::{ChiefMessage, SessionManager, SpawnRequest};
use steward_storage::Database;

use crate::schedule::{duty_gap_days, duty_is_due, NEVER_RAN_GAP_DAYS};
use crate::store;
use crate::types::Duty;

/// Completion poll cadence while a duty session runs.
const DUTY_POLL_SECS: u64 = 10;

pub struct DutyScheduler {
    db: Database,
    sessions: Arc<SessionManager>,
    bus: Arc<EventBus>,
    config: StewardConfig,
    /// Execution id of the duty currently running, if any. At most one duty
    /// runs at a time.
    running_execution: Option<String>,
}

impl DutyScheduler {
    pub fn new(
        db: Database,
        sessions: Arc<SessionManager>,
        bus: Arc<EventBus>,
        config: StewardConfig,
    ) -> Self {
        Self {
            db,
            sessions,
            bus,
            config,
            running_execution: None,
        }
    }

    /// Main loop. Runs a catch-up pass immediately, then checks every 30 s
    /// until `shutdown` flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("duty scheduler starting");
        self.catch_up().await;
        info!("duty scheduler running (self-healing)");

        let mut interval = tokio::time::interval(Duration::from_secs(SCHEDULER_TICK_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.running_execution.is_none() {
                        self.check_and_execute_duties().await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("duty scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Startup pass: run every duty that should have fired while the system
    /// was off, with catch-up wording.
    async fn catch_up(&mut self) {
        let duties = match store::enabled_duties(&self.db) {
            Ok(duties) => duties,
            Err(e) => {
                error!(error = %e, "duty catch-up query failed");
                return;
            }
        };

        let now_local = Utc::now().with_timezone(&self.config.tz());
        for duty in duties {
            if !duty_is_due(&duty.schedule_time, duty.last_run.as_deref(), now_local) {
                continue;
            }
            let gap = duty_gap_days(&duty.schedule_time, duty.last_run.as_deref(), now_local);
            if gap > 0 {
                warn!(duty = %duty.slug, gap_days = gap, "duty missed while offline, catching up");
                let ok = self.execute_duty(&duty, gap).await;
                if ok {
                    info!(duty = %duty.slug, "catch-up complete");
                } else {
                    error!(duty = %duty.slug, "catch-up failed");
                }
            }
        }
        info!("duty catch-up check complete");
    }

    /// One scheduling decision: execute the first due duty, if any.
    pub async fn check_and_execute_duties(&mut self) {
        if self.running_execution.is_some() {
            return;
        }
        let duties = match store::enabled_duties(&self.db) {
            Ok(duties) => duties,
            Err(e) => {
                error!(error = %e, "duty query failed");
                return;
            }
        };

        let now_local = Utc::now().with_timezone(&self.config.tz());
        for duty in duties {
            if duty_is_due(&duty.schedule_time, duty.last_run.as_deref(), now_local) {
                info!(duty = %duty.slug, "duty due");
                self.execute_duty(&duty, 0).await;
                // One at a time.
                break;
            }
        }
    }

    /// Run one duty to completion. Always writes last_run and last_status,
    /// success or failure, so catch-up never replays the same day.
    async fn execute_duty(&mut self, duty: &Duty, gap_days: i64) -> bool {
        info!(duty = %duty.slug, "executing duty");

        let execution_id = match store::create_duty_execution(&self.db, &duty.id, &duty.slug) {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "failed to create duty execution row");
                return false;
            }
        };
        self.running_execution = Some(execution_id.clone());

        let initial_task = build_duty_task(duty, gap_days);
        let success = if self.sessions.is_chief_running().await {
            self.execute_with_chief_reset(duty, &execution_id, &initial_task)
                .await
        } else {
            self.spawn_chief_for_duty(duty, &execution_id, &initial_task)
                .await
        };

        let status = if success { "completed" } else { "failed" };
        if let Err(e) = store::update_duty_last_run(&self.db, &duty.id, status) {
            error!(error = %e, "failed to record duty last_run");
        }
        if let Err(e) = store::complete_duty_execution(&self.db, &execution_id, status, None) {
            error!(error = %e, "failed to complete duty execution");
        }
        self.bus.publish(
            "duty.completed",
            serde_json::json!({ "slug": duty.slug, "status": status }),
        );

        self.running_execution = None;
        success
    }

    /// Path A - chief is running: warn, wait the full window, force-kill,
    /// then spawn the duty chief. The warning window is a hard sleep; the
    /// duty owns the chief window from the kill until the new chief is up.
    async fn execute_with_chief_reset(
        &self,
        duty: &Duty,
        execution_id: &str,
        initial_task: &str,
    ) -> bool {
        let warning = format!(
            "[SYSTEM] Scheduled duty '{}' starts in 2 minutes and will reset this session.\n\
             Save state now: write any open loops to TODAY.md. This reset cannot be deferred.",
            duty.name
        );
        match self.sessions.send_to_chief(ChiefMessage::Say(warning)).await {
            Ok(true) => info!("2-minute duty warning sent to chief"),
            _ => warn!("duty warning not delivered"),
        }

        tokio::time::sleep(Duration::from_secs(DUTY_WARNING_SECS)).await;

        if let Err(e) = self.sessions.force_kill_chief("duty_reset").await {
            error!(error = %e, "failed to force-kill chief for duty");
            return false;
        }

        self.spawn_chief_for_duty(duty, execution_id, initial_task)
            .await
    }

    /// Path B - spawn the chief in mission mode with the duty prompt and
    /// poll until the execution row leaves `running`, the chief exits, or
    /// the duty times out.
    async fn spawn_chief_for_duty(
        &self,
        duty: &Duty,
        execution_id: &str,
        initial_task: &str,
    ) -> bool {
        let mut req = SpawnRequest::new(Role::Chief, Mode::Mission);
        req.window_name = Some("chief".to_string());
        req.initial_task = Some(initial_task.to_string());
        req.mission_execution_id = Some(execution_id.to_string());

        let result = self.sessions.spawn(req).await;
        if !result.ok {
            error!(error = ?result.error, "failed to spawn chief for duty");
            return false;
        }
        if let Some(ref session_id) = result.session_id {
            let _ = store::set_duty_execution_session(&self.db, execution_id, session_id);
        }
        info!(duty = %duty.slug, "chief spawned for duty, waiting for completion");

        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(duty.timeout_minutes as u64 * 60);
        loop {
            tokio::time::sleep(Duration::from_secs(DUTY_POLL_SECS)).await;

            if tokio::time::Instant::now() >= deadline {
                // Timed out. The chief may still be doing useful work, so it
                // is left alone; the next force-reset will clean it.
                warn!(duty = %duty.slug, minutes = duty.timeout_minutes, "duty timed out");
                return false;
            }

            match store::get_duty_execution(&self.db, execution_id) {
                Ok(Some(execution)) if execution.status != "running" => {
                    return execution.status == "completed";
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "duty execution poll failed");
                }
            }

            if !self.sessions.is_chief_running().await {
                // Chief exited cleanly; treat as completion.
                return true;
            }
        }
    }
}

/// Initial task injected into the duty chief. Catch-up wording names the
/// last run and the size of the gap so the prompt file can adapt.
pub fn build_duty_task(duty: &Duty, gap_days: i64) -> String {
    if gap_days > 0 {
        let last_ran = if gap_days >= NEVER_RAN_GAP_DAYS {
            "never".to_string()
        } else {
            duty.last_run.clone().unwrap_or_else(|| "unknown".to_string())
        };
        format!(
            "[DUTY - CATCH-UP MODE]\n\n\
             Duty: {name}\n\
             Last ran: {last_ran} ({gap_days} days ago)\n\
             The system was offline. You cannot recover those days.\n\n\
             Read {prompt} for instructions.\n\
             Adapt to catch-up mode as described in the prompt.",
            name = duty.name,
            prompt = duty.prompt_file,
        )
    } else {
        format!(
            "[DUTY]\n\n\
             Duty: {name}\n\
             Read {prompt} for instructions.",
            name = duty.name,
            prompt = duty.prompt_file,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::Los_Angeles;

    fn duty(last_run: Option<&str>) -> Duty {
        Duty {
            id: "d1".into(),
            slug: "memory-consolidation".into(),
            name: "Memory Consolidation".into(),
            description: None,
            prompt_file: ".claude/scheduled/memory-consolidation.md".into(),
            schedule_time: "06:00".into(),
            timeout_minutes: 60,
            enabled: true,
            last_run: last_run.map(str::to_string),
            last_status: None,
        }
    }

    #[test]
    fn missed_duty_gets_catch_up_wording() {
        // last_run three days before a 09:30 check, schedule 06:00.
        let now_local = Los_Angeles
            .with_ymd_and_hms(2024, 1, 13, 9, 30, 0)
            .single()
            .unwrap();
        let d = duty(Some("2024-01-10T06:00:00Z"));
        let gap = duty_gap_days(&d.schedule_time, d.last_run.as_deref(), now_local);
        // 2024-01-10T06:00Z is the prior evening Pacific, but the expected
        // date arithmetic still lands on a 3-or-4 day gap window; the duty
        // must be due either way.
        assert!(duty_is_due(&d.schedule_time, d.last_run.as_deref(), now_local));
        assert!(gap >= 3);

        let task = build_duty_task(&d, 3);
        assert!(task.contains("CATCH-UP MODE"));
        assert!(task.contains("3 days"));
        assert!(task.contains("2024-01-10T06:00:00Z"));
        assert!(task.contains(&d.prompt_file));
    }

    #[test]
    fn fresh_duty_has_plain_wording() {
        let d = duty(Some("2024-01-13T14:00:00Z"));
        let task = build_duty_task(&d, 0);
        assert!(task.starts_with("[DUTY]"));
        assert!(!task.contains("CATCH-UP"));
    }

    #[test]
    fn never_ran_duty_says_never() {
        let d = duty(None);
        let task = build_duty_task(&d, NEVER_RAN_GAP_DAYS);
        assert!(task.contains("Last ran: never"));
    }
}
