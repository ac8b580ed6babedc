//! Rolling live-output buffer per worker.
//!
//! Every hook emission appends one JSON object + newline to the worker's
//! `live_output` column, capped at 50 000 characters (head-truncated with a
//! marker). A `worker.output_updated` bus event fires at most once per
//! second per worker so stream consumers get pushes without a flood.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use tracing::warn;

use steward_bus::EventBus;
use steward_storage::Database;

/// Hard cap on stored live output per worker.
pub const LIVE_OUTPUT_CAP: usize = 50_000;
/// On overflow, keep this much of the tail (plus the truncation marker).
const KEEP_TAIL: usize = 45_000;
const TRUNCATION_MARKER: &str = "...[truncated]...\n";

/// Append `addition` to `current`, enforcing the cap by dropping the head.
pub fn append_capped(current: &str, addition: &str) -> String {
    let mut combined = String::with_capacity(current.len() + addition.len());
    combined.push_str(current);
    combined.push_str(addition);
    if combined.len() <= LIVE_OUTPUT_CAP {
        return combined;
    }

    // Keep the tail on a char boundary.
    let mut cut = combined.len() - KEEP_TAIL;
    while !combined.is_char_boundary(cut) {
        cut += 1;
    }
    format!("{}{}", TRUNCATION_MARKER, &combined[cut..])
}

pub struct LiveOutput {
    db: Database,
    bus: Arc<EventBus>,
    /// Last `worker.output_updated` emission per worker.
    last_emit: DashMap<String, Instant>,
}

impl LiveOutput {
    pub fn new(db: Database, bus: Arc<EventBus>) -> Self {
        Self {
            db,
            bus,
            last_emit: DashMap::new(),
        }
    }

    /// Append a structured event (JSONL) to a worker's live output.
    pub fn emit(&self, worker_id: &str, mut event: serde_json::Value) {
        if let Some(obj) = event.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::json!(Utc::now().timestamp_millis()),
            );
        }
        let line = format!("{}\n", event);
        if let Err(e) = self.append(worker_id, &line) {
            warn!(worker_id, error = %e, "live output append failed");
        }
    }

    fn append(&self, worker_id: &str, line: &str) -> steward_storage::error::Result<()> {
        let current: Option<Option<String>> = self.db.fetch_one(
            "SELECT live_output FROM workers WHERE id = ?1",
            [worker_id],
            |row| row.get(0),
        )?;
        let current = current.flatten().unwrap_or_default();
        let updated = append_capped(&current, line);

        self.db.execute(
            "UPDATE workers SET live_output = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![updated, Utc::now().to_rfc3339(), worker_id],
        )?;

        // Throttled push so the stream layer can drop its polling.
        let now = Instant::now();
        let should_publish = match self.last_emit.get(worker_id) {
            Some(last) => now.duration_since(*last).as_secs_f64() >= 1.0,
            None => true,
        };
        if should_publish {
            self.last_emit.insert(worker_id.to_string(), now);
            self.bus.publish(
                "worker.output_updated",
                serde_json::json!({
                    "worker_id": worker_id,
                    "short_id": &worker_id[..worker_id.len().min(8)],
                }),
            );
        }
        Ok(())
    }

    /// Drop throttle state once a worker is done.
    pub fn forget(&self, worker_id: &str) {
        self.last_emit.remove(worker_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_appends_accumulate() {
        let out = append_capped("a\n", "b\n");
        assert_eq!(out, "a\nb\n");
    }

    #[test]
    fn cap_is_enforced() {
        let current = "x".repeat(LIVE_OUTPUT_CAP - 10);
        let out = append_capped(&current, &"y".repeat(100));
        assert!(out.len() <= LIVE_OUTPUT_CAP);
        assert!(out.starts_with(TRUNCATION_MARKER));
        assert!(out.ends_with('y'));
    }

    #[test]
    fn cap_holds_under_any_sequence() {
        let mut buffer = String::new();
        for i in 0..5000 {
            buffer = append_capped(&buffer, &format!("{{\"type\":\"text\",\"seq\":{i}}}\n"));
            assert!(buffer.len() <= LIVE_OUTPUT_CAP, "cap exceeded at {i}");
        }
        // The newest event must have survived.
        assert!(buffer.contains("4999"));
        // The oldest must be gone.
        assert!(!buffer.contains("\"seq\":0}"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let current = "€".repeat(LIVE_OUTPUT_CAP / 3);
        let out = append_capped(&current, &"€".repeat(100));
        assert!(out.len() <= LIVE_OUTPUT_CAP);
        // Would panic on a bad boundary; also must still be valid UTF-8.
        assert!(out.ends_with('€'));
    }

    #[tokio::test]
    async fn throttle_limits_bus_events() {
        let db = Database::open_in_memory().unwrap();
        db.execute(
            "INSERT INTO workers (id, task_type, status, created_at, updated_at)
             VALUES ('w1', 'research', 'running', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let bus = Arc::new(EventBus::new());
        let mut sub = bus.subscribe("worker.output_updated");
        let live = LiveOutput::new(db, bus.clone());

        for i in 0..20 {
            live.emit("w1", serde_json::json!({"type": "text", "seq": i}));
        }

        // All 20 appends inside one second produce exactly one bus event.
        let mut received = 0;
        while sub.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, 1);
    }
}
