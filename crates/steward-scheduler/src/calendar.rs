//! Calendar capability boundary and wake classification.
//!
//! The concrete providers (CalDAV, Google, Apple Calendar) live outside the
//! core; the heartbeat only needs a small window of events around "now".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Titles matching any of these mark a focus block; wakes are suppressed
/// for their whole duration.
pub const FOCUS_KEYWORDS: &[&str] = &["DS&A", "Focus", "Leetcode", "Recovery", "Interview", "Mock"];

const PRE_EVENT_MINUTES_MIN: i64 = 5;
const PRE_EVENT_MINUTES_MAX: i64 = 10;
const POST_EVENT_MINUTES_MAX: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
}

#[async_trait]
pub trait CalendarAdapter: Send + Sync {
    /// Events overlapping the given window, soonest first.
    async fn events_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<CalendarEvent>;
}

/// Adapter for setups without any calendar provider configured.
pub struct NoCalendar;

#[async_trait]
impl CalendarAdapter for NoCalendar {
    async fn events_between(&self, _from: DateTime<Utc>, _to: DateTime<Utc>) -> Vec<CalendarEvent> {
        Vec::new()
    }
}

/// How the heartbeat should treat this moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeKind {
    /// Inside a focus block: update interval accounting, send nothing.
    Suppress,
    /// 5-10 minutes before an event starts; sent once per event.
    PreEvent,
    /// 0-5 minutes after an event ended; sent once per event.
    PostEvent,
    /// Default periodic wake.
    Heartbeat,
}

#[derive(Debug, Clone)]
pub struct WakeDecision {
    pub kind: WakeKind,
    /// Event driving a Suppress/PreEvent/PostEvent decision.
    pub event_id: Option<String>,
    pub event_title: Option<String>,
}

impl WakeDecision {
    fn heartbeat() -> Self {
        Self {
            kind: WakeKind::Heartbeat,
            event_id: None,
            event_title: None,
        }
    }
}

/// Classify the moment against the calendar.
///
/// `last_pre_event` / `last_post_event` are the ids already alerted, so each
/// event triggers its pre/post wake at most once.
pub fn classify(
    events: &[CalendarEvent],
    now: DateTime<Utc>,
    last_pre_event: Option<&str>,
    last_post_event: Option<&str>,
) -> WakeDecision {
    let mut current: Option<&CalendarEvent> = None;
    let mut upcoming: Option<&CalendarEvent> = None;
    let mut recently_ended: Option<&CalendarEvent> = None;

    for event in events.iter().filter(|e| !e.all_day) {
        let minutes_until_start = (event.start - now).num_minutes();
        let minutes_since_end = (now - event.end).num_minutes();

        if event.start <= now && now <= event.end {
            current = Some(event);
            let title = event.title.to_lowercase();
            if FOCUS_KEYWORDS
                .iter()
                .any(|kw| title.contains(&kw.to_lowercase()))
            {
                return WakeDecision {
                    kind: WakeKind::Suppress,
                    event_id: Some(event.id.clone()),
                    event_title: Some(event.title.clone()),
                };
            }
        } else if (PRE_EVENT_MINUTES_MIN..=PRE_EVENT_MINUTES_MAX).contains(&minutes_until_start) {
            upcoming.get_or_insert(event);
        } else if minutes_since_end > 0 && minutes_since_end <= POST_EVENT_MINUTES_MAX {
            recently_ended.get_or_insert(event);
        }
    }

    if let Some(event) = upcoming {
        if last_pre_event != Some(event.id.as_str()) {
            return WakeDecision {
                kind: WakeKind::PreEvent,
                event_id: Some(event.id.clone()),
                event_title: Some(event.title.clone()),
            };
        }
    }

    if let (Some(event), None) = (recently_ended, current) {
        if last_post_event != Some(event.id.as_str()) {
            return WakeDecision {
                kind: WakeKind::PostEvent,
                event_id: Some(event.id.clone()),
                event_title: Some(event.title.clone()),
            };
        }
    }

    WakeDecision::heartbeat()
}
