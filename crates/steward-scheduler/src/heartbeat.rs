//! Chief heartbeat: periodic and calendar-aware wakes.

use std::sync::Arc;

use chrono::{Duration, Timelike, Utc};
use tracing::{debug, info, warn};

use steward_core::config::StewardConfig;
use steward_sessions::{ChiefMessage, SessionManager};
use steward_storage::{settings, Database};

use crate::calendar::{classify, CalendarAdapter, WakeKind};

/// Minimum seconds without user input before a wake may interrupt.
const MIN_IDLE_SECS: f64 = 10.0;

/// Source of "seconds since last keyboard/mouse input".
pub trait IdleProbe: Send + Sync {
    fn idle_seconds(&self) -> f64;
}

/// Probe backed by `ioreg -c IOHIDSystem` (macOS). Failures read as zero
/// idle, which errs on the side of not interrupting the user.
pub struct SystemIdleProbe;

impl IdleProbe for SystemIdleProbe {
    fn idle_seconds(&self) -> f64 {
        std::process::Command::new("ioreg")
            .args(["-c", "IOHIDSystem"])
            .output()
            .ok()
            .map(|out| parse_ioreg_idle(&String::from_utf8_lossy(&out.stdout)))
            .unwrap_or(0.0)
    }
}

/// Extract HIDIdleTime (nanoseconds) from ioreg output.
pub fn parse_ioreg_idle(output: &str) -> f64 {
    for line in output.lines() {
        if !line.contains("HIDIdleTime") {
            continue;
        }
        if let Some(raw) = line.rsplit('=').next() {
            if let Ok(ns) = raw.trim().parse::<u64>() {
                return ns as f64 / 1_000_000_000.0;
            }
        }
    }
    0.0
}

pub struct Heartbeat {
    db: Database,
    sessions: Arc<SessionManager>,
    config: StewardConfig,
    calendar: Arc<dyn CalendarAdapter>,
    idle: Arc<dyn IdleProbe>,

    last_heartbeat: Option<chrono::DateTime<Utc>>,
    last_pre_event: Option<String>,
    last_post_event: Option<String>,
}

impl Heartbeat {
    pub fn new(
        db: Database,
        sessions: Arc<SessionManager>,
        config: StewardConfig,
        calendar: Arc<dyn CalendarAdapter>,
        idle: Arc<dyn IdleProbe>,
    ) -> Self {
        Self {
            db,
            sessions,
            config,
            calendar,
            idle,
            last_heartbeat: None,
            last_pre_event: None,
            last_post_event: None,
        }
    }

    /// Evaluate all gates and possibly wake the chief. Called every
    /// scheduler tick; cheap when any gate is closed.
    pub async fn check_and_send(&mut self) {
        let now = Utc::now();
        let now_local = now.with_timezone(&self.config.tz());
        let hour = now_local.hour();
        if hour < self.config.heartbeat.start_hour || hour >= self.config.heartbeat.end_hour {
            return;
        }

        if !self.sessions.is_chief_running().await {
            return;
        }

        let wake = settings::wake_settings(&self.db, self.config.heartbeat.interval_minutes);
        if wake.window_until.is_none() {
            return;
        }
        if let Some(pause) = wake.pause_until {
            debug!(
                minutes = (pause - now).num_minutes(),
                "wake paused, skipping heartbeat"
            );
            return;
        }

        let idle = self.idle.idle_seconds();
        if idle < MIN_IDLE_SECS {
            debug!(idle, "user active, skipping wake");
            return;
        }

        let events = self
            .calendar
            .events_between(now - Duration::minutes(15), now + Duration::minutes(15))
            .await;
        let decision = classify(
            &events,
            now,
            self.last_pre_event.as_deref(),
            self.last_post_event.as_deref(),
        );

        let minutes_since_last = self
            .last_heartbeat
            .map(|last| (now - last).num_minutes())
            .unwrap_or(wake.interval_minutes);

        match decision.kind {
            WakeKind::Suppress => {
                // Interval accounting still advances so the next HEARTBEAT
                // does not fire the instant the focus block ends.
                debug!(event = ?decision.event_title, "inside focus block, wake suppressed");
                self.last_heartbeat = Some(now);
            }
            WakeKind::PreEvent | WakeKind::PostEvent => {
                let wake_type = if decision.kind == WakeKind::PreEvent {
                    self.last_pre_event = decision.event_id.clone();
                    "PRE_EVENT"
                } else {
                    self.last_post_event = decision.event_id.clone();
                    "POST_EVENT"
                };
                self.send_wake(wake_type, minutes_since_last, decision.event_title)
                    .await;
                self.last_heartbeat = Some(now);
                info!(wake_type, "calendar wake sent to chief");
            }
            WakeKind::Heartbeat => {
                if self.last_heartbeat.is_some() && minutes_since_last < wake.interval_minutes {
                    return;
                }
                if !self.has_waiting_items() {
                    self.last_heartbeat = Some(now);
                    debug!(minutes_since_last, "nothing waiting, heartbeat skipped");
                    return;
                }
                self.send_wake("HEARTBEAT", minutes_since_last, None).await;
                self.last_heartbeat = Some(now);
                debug!(minutes_since_last, "heartbeat sent to chief");
            }
        }
    }

    /// Anything worth waking the chief for: completed or failed workers not
    /// yet acknowledged, or reminders that have come due.
    fn has_waiting_items(&self) -> bool {
        let workers: i64 = self
            .db
            .fetch_one(
                "SELECT COUNT(*) FROM workers WHERE status IN ('complete', 'failed')",
                [],
                |row| row.get(0),
            )
            .ok()
            .flatten()
            .unwrap_or(0);
        if workers > 0 {
            return true;
        }

        let reminders: i64 = self
            .db
            .fetch_one(
                "SELECT COUNT(*) FROM reminders WHERE remind_at <= ?1",
                [Utc::now().to_rfc3339()],
                |row| row.get(0),
            )
            .ok()
            .flatten()
            .unwrap_or(0);
        reminders > 0
    }

    async fn send_wake(&self, wake_type: &str, minutes_since_last: i64, event_title: Option<String>) {
        let sent = self
            .sessions
            .send_to_chief(ChiefMessage::Wake {
                wake_type: wake_type.to_string(),
                minutes_since_last,
                event_title,
            })
            .await;
        match sent {
            Ok(true) => {}
            Ok(false) => warn!("chief wake not delivered (chief not running)"),
            Err(e) => warn!(error = %e, "chief wake failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ioreg_idle_parsing() {
        let output = r#"
    "DeviceUsagePagePairs" = ()
    "HIDIdleTime" = 4525000000
    "HIDParameters" = yes
"#;
        let idle = parse_ioreg_idle(output);
        assert!((idle - 4.525).abs() < 0.001);
    }

    #[test]
    fn ioreg_idle_missing_is_zero() {
        assert_eq!(parse_ioreg_idle("no such key here"), 0.0);
    }
}
