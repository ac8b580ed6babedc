//! The conversation stream multiplexer.
//!
//! One logical stream per conversation. Every second the active session is
//! re-resolved; when it changes, a boundary event is emitted and the
//! transcript tailer is restarted on the new file at EOF. The `after_uuid`
//! cursor applies only to the first tailer of the connection - replaying an
//! old cursor against a successor session's transcript would duplicate or
//! skip content.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use chrono::Utc;
use futures_util::Stream;
use tracing::{debug, info, warn};

use steward_tmux::TmuxDriver;

use crate::events::{ActivityData, StreamEvent, TasksData};
use crate::status::{parse_pane_status, PaneStatus};
use crate::tailer::TranscriptTailer;
use crate::tasks;

const POLL_MS: u64 = 100;
const STATUS_INTERVAL_MS: u64 = 500;
const SESSION_CHECK_INTERVAL_MS: u64 = 1_000;
const TASKS_INTERVAL_MS: u64 = 1_000;
/// Mode transitions briefly show "no active session"; only after this grace
/// period is the conversation declared ended.
const SESSION_END_GRACE_SECS: u64 = 10;
/// Transcript events drained per tick.
const TRANSCRIPT_BATCH: usize = 10;

/// The slice of a session row the stream needs.
#[derive(Debug, Clone)]
pub struct SessionRef {
    pub session_id: String,
    pub transcript_path: Option<String>,
    pub tmux_pane: Option<String>,
    pub role: Option<String>,
    pub mode: Option<String>,
    pub agent_session_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub include_thinking: bool,
    /// Resume the first tailer immediately after this transcript uuid.
    pub after_uuid: Option<String>,
}

/// Resolver for "which session is this conversation running right now".
pub type ActiveSessionFn = Arc<dyn Fn() -> Option<SessionRef> + Send + Sync>;

/// Pick the boundary type for a session transition.
pub fn boundary_type(old_mode: Option<&str>, new_mode: Option<&str>) -> &'static str {
    if new_mode == Some("summarizer") {
        "summarizer"
    } else if old_mode == Some("summarizer") {
        "reset"
    } else if let (Some(old), Some(new)) = (old_mode, new_mode) {
        if old != new {
            "mode_transition"
        } else {
            "reset"
        }
    } else {
        "reset"
    }
}

/// Deduplication state so activity/warning/meta/tasks only emit on change.
#[derive(Default)]
struct StreamState {
    session: Option<SessionRef>,
    inactive_since: Option<tokio::time::Instant>,

    last_activity: Option<ActivityData>,
    warning_active: bool,
    last_context_remaining: Option<i64>,
    last_meta: Option<crate::events::SessionMetaData>,
    tasks_hash: Option<u64>,
}

impl StreamState {
    fn activity_changed(&self, status: &PaneStatus) -> bool {
        self.last_activity.as_ref() != Some(&status.activity)
    }

    fn warning_changed(&self, status: &PaneStatus) -> bool {
        match status.context_remaining {
            Some(remaining) => {
                !self.warning_active || self.last_context_remaining != Some(remaining)
            }
            None => self.warning_active,
        }
    }

    fn meta_changed(&self, status: &PaneStatus) -> bool {
        let meta = status.meta();
        (meta.model.is_some() || meta.cost_usd.is_some()) && self.last_meta.as_ref() != Some(&meta)
    }

    fn absorb(&mut self, status: &PaneStatus) {
        self.last_activity = Some(status.activity.clone());
        self.warning_active = status.context_remaining.is_some();
        self.last_context_remaining = status.context_remaining;
        let meta = status.meta();
        if meta.model.is_some() || meta.cost_usd.is_some() {
            self.last_meta = Some(meta);
        }
    }
}

/// Stream a conversation. The returned stream lives until the consumer
/// drops it; dropping cancels the active tailer.
pub fn stream_conversation(
    conversation_id: String,
    get_active_session: ActiveSessionFn,
    tmux: TmuxDriver,
    options: StreamOptions,
) -> impl Stream<Item = StreamEvent> {
    stream! {
        let mut state = StreamState::default();
        let mut tailer: Option<TranscriptTailer> = None;
        let mut initial_connection = true;

        let tasks_dir = tasks::default_tasks_dir();
        let todos_dir = tasks::default_todos_dir();

        yield StreamEvent::Connected {
            timestamp: Utc::now().to_rfc3339(),
            conversation_id: conversation_id.clone(),
        };

        let mut last_status = tokio::time::Instant::now() - Duration::from_millis(STATUS_INTERVAL_MS);
        let mut last_session_check = tokio::time::Instant::now() - Duration::from_millis(SESSION_CHECK_INTERVAL_MS);
        let mut last_tasks = tokio::time::Instant::now() - Duration::from_millis(TASKS_INTERVAL_MS);

        loop {
            let now = tokio::time::Instant::now();

            // 1. Session transitions (1 s cadence).
            if now.duration_since(last_session_check).as_millis() as u64 >= SESSION_CHECK_INTERVAL_MS {
                last_session_check = now;
                let active = (get_active_session)();

                match active {
                    Some(session) => {
                        let changed = state
                            .session
                            .as_ref()
                            .map(|current| current.session_id != session.session_id)
                            .unwrap_or(true);

                        if changed {
                            let old = state.session.take();
                            if let Some(ref old_session) = old {
                                info!(
                                    conversation = %conversation_id,
                                    old = %old_session.session_id,
                                    new = %session.session_id,
                                    "session transition"
                                );
                                yield StreamEvent::SessionBoundary {
                                    timestamp: Utc::now().to_rfc3339(),
                                    old_session_id: old_session.session_id.clone(),
                                    new_session_id: session.session_id.clone(),
                                    boundary_type: boundary_type(
                                        old_session.mode.as_deref(),
                                        session.mode.as_deref(),
                                    )
                                    .to_string(),
                                    prev_mode: old_session.mode.clone(),
                                    mode: session.mode.clone(),
                                    new_role: session.role.clone(),
                                    new_mode: session.mode.clone(),
                                };
                            }
                            state.inactive_since = None;

                            // New tailer. The cursor applies only on the very
                            // first attach; boundaries always start at EOF.
                            if let Some(ref path) = session.transcript_path {
                                let path = std::path::PathBuf::from(path);
                                if path.exists() {
                                    let cursor = if initial_connection {
                                        options.after_uuid.clone()
                                    } else {
                                        None
                                    };
                                    tailer = Some(TranscriptTailer::start(
                                        path,
                                        cursor,
                                        options.include_thinking,
                                    ));
                                    initial_connection = false;
                                } else {
                                    warn!(path = %path.display(), "transcript path does not exist yet");
                                    tailer = None;
                                }
                            } else {
                                debug!("new session has no transcript path yet");
                                tailer = None;
                            }
                            state.session = Some(session);
                        } else if let Some(ref mut current) = state.session {
                            // Transcript path appearing late for the same session.
                            if session.transcript_path.is_some()
                                && current.transcript_path != session.transcript_path
                            {
                                if let Some(ref path) = session.transcript_path {
                                    let path = std::path::PathBuf::from(path);
                                    if path.exists() {
                                        let cursor = if initial_connection {
                                            options.after_uuid.clone()
                                        } else {
                                            None
                                        };
                                        tailer = Some(TranscriptTailer::start(
                                            path,
                                            cursor,
                                            options.include_thinking,
                                        ));
                                        initial_connection = false;
                                        current.transcript_path = session.transcript_path.clone();
                                    }
                                }
                            }
                        }
                    }
                    None => {
                        if let Some(ref session) = state.session {
                            match state.inactive_since {
                                None => {
                                    debug!(conversation = %conversation_id, "no active session, grace period started");
                                    state.inactive_since = Some(now);
                                }
                                Some(since)
                                    if now.duration_since(since).as_secs()
                                        >= SESSION_END_GRACE_SECS =>
                                {
                                    yield StreamEvent::ConversationEnded {
                                        timestamp: Utc::now().to_rfc3339(),
                                        last_session_id: session.session_id.clone(),
                                    };
                                    state.session = None;
                                    state.inactive_since = None;
                                    tailer = None;
                                }
                                Some(_) => {}
                            }
                        }
                    }
                }
            }

            // 2. Transcript events (bounded batch per tick).
            if let Some(ref mut active_tailer) = tailer {
                for event in active_tailer.drain(TRANSCRIPT_BATCH) {
                    yield StreamEvent::Transcript { event };
                }
            }

            // 3. Activity / context / meta from the pane (500 ms cadence).
            if now.duration_since(last_status).as_millis() as u64 >= STATUS_INTERVAL_MS {
                let pane = state
                    .session
                    .as_ref()
                    .and_then(|s| s.tmux_pane.clone());
                if let Some(pane) = pane {
                    last_status = now;
                    if let Ok(content) = tmux.capture_pane(&pane).await {
                        let status = parse_pane_status(&content);

                        if state.activity_changed(&status) {
                            yield StreamEvent::Activity {
                                data: status.activity.clone(),
                            };
                        }
                        if state.warning_changed(&status) {
                            match status.context_warning() {
                                Some(warning) => yield StreamEvent::ContextWarning { data: warning },
                                None => {
                                    yield StreamEvent::ContextWarning {
                                        data: crate::events::ContextWarningData {
                                            should_warn: false,
                                            ..Default::default()
                                        },
                                    }
                                }
                            }
                        }
                        if state.meta_changed(&status) {
                            yield StreamEvent::SessionMeta { data: status.meta() };
                        }
                        state.absorb(&status);
                    }
                }
            }

            // 4. Todo snapshot (1 s cadence, hash-compared).
            if now.duration_since(last_tasks).as_millis() as u64 >= TASKS_INTERVAL_MS {
                last_tasks = now;
                if let Some(ref session) = state.session {
                    let items = tasks::read_todo_tasks(
                        &tasks_dir,
                        &todos_dir,
                        &session.session_id,
                        session.agent_session_id.as_deref(),
                    );
                    let hash = tasks::snapshot_hash(&items);
                    if state.tasks_hash != Some(hash) {
                        state.tasks_hash = Some(hash);
                        yield StreamEvent::Tasks {
                            data: TasksData { items },
                        };
                    }
                }
            }

            tokio::time::sleep(Duration::from_millis(POLL_MS)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn boundary_type_selection() {
        assert_eq!(boundary_type(Some("interactive"), Some("summarizer")), "summarizer");
        assert_eq!(boundary_type(Some("summarizer"), Some("interactive")), "reset");
        assert_eq!(boundary_type(Some("interactive"), Some("mission")), "mode_transition");
        assert_eq!(boundary_type(Some("interactive"), Some("interactive")), "reset");
        assert_eq!(boundary_type(None, Some("interactive")), "reset");
        assert_eq!(boundary_type(Some("interactive"), None), "reset");
    }

    #[tokio::test]
    async fn stream_survives_session_handoff() {
        let dir = tempfile::tempdir().unwrap();
        let t1 = dir.path().join("one.jsonl");
        let t2 = dir.path().join("two.jsonl");
        std::fs::write(&t1, "{\"uuid\":\"old-1\",\"type\":\"user\"}\n").unwrap();
        std::fs::write(&t2, "").unwrap();

        // Flips from session C1 to C2 after a few resolutions, the way a
        // force reset looks to the stream.
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let t1_str = t1.to_string_lossy().to_string();
        let t2_str = t2.to_string_lossy().to_string();
        let resolver: ActiveSessionFn = Arc::new(move || {
            let n = calls_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let (id, path) = if n < 2 {
                ("c1".to_string(), t1_str.clone())
            } else {
                ("c2".to_string(), t2_str.clone())
            };
            Some(SessionRef {
                session_id: id,
                transcript_path: Some(path),
                tmux_pane: None,
                role: Some("chief".into()),
                mode: Some("interactive".into()),
                agent_session_id: None,
            })
        });

        let stream = stream_conversation(
            "chief".into(),
            resolver,
            TmuxDriver::new("test"),
            StreamOptions::default(),
        );
        tokio::pin!(stream);

        // connected first.
        let first = stream.next().await.unwrap();
        assert!(matches!(first, StreamEvent::Connected { .. }));

        // Then, within a few seconds, the boundary from c1 to c2.
        let boundary = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match stream.next().await {
                    Some(StreamEvent::SessionBoundary {
                        old_session_id,
                        new_session_id,
                        boundary_type,
                        ..
                    }) => return (old_session_id, new_session_id, boundary_type),
                    Some(StreamEvent::Transcript { event }) => {
                        // Old content must never replay: the first tailer
                        // started at EOF of one.jsonl.
                        panic!("unexpected transcript replay: {event}");
                    }
                    Some(_) => continue,
                    None => panic!("stream ended early"),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(boundary.0, "c1");
        assert_eq!(boundary.1, "c2");
        assert_eq!(boundary.2, "reset");
    }

    #[tokio::test]
    async fn conversation_end_waits_for_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let t1 = dir.path().join("one.jsonl");
        std::fs::write(&t1, "").unwrap();
        let t1_str = t1.to_string_lossy().to_string();

        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let resolver: ActiveSessionFn = Arc::new(move || {
            let n = calls_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            // Session visible once, then gone.
            (n == 0).then(|| SessionRef {
                session_id: "c1".into(),
                transcript_path: Some(t1_str.clone()),
                tmux_pane: None,
                role: Some("chief".into()),
                mode: Some("interactive".into()),
                agent_session_id: None,
            })
        });

        tokio::time::pause();
        let stream = stream_conversation(
            "chief".into(),
            resolver,
            TmuxDriver::new("test"),
            StreamOptions::default(),
        );
        tokio::pin!(stream);

        let start = tokio::time::Instant::now();
        loop {
            match stream.next().await {
                Some(StreamEvent::ConversationEnded {
                    last_session_id, ..
                }) => {
                    assert_eq!(last_session_id, "c1");
                    // Not before the 10s grace period elapsed (virtual time).
                    assert!(start.elapsed() >= Duration::from_secs(SESSION_END_GRACE_SECS));
                    break;
                }
                Some(_) => continue,
                None => panic!("stream ended early"),
            }
        }
    }
}
