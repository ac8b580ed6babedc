//! Per-worker tool hooks.
//!
//! Each running worker owns one [`WorkerHooks`] instance bound to its id —
//! never shared across workers, so parallel runs cannot cross their
//! metadata. Hook emissions become JSONL events in the worker's live
//! output and accumulate usage metadata for the final record.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::live::LiveOutput;

/// Usage accounting gathered over one worker run.
#[derive(Debug, Default, Serialize)]
pub struct WorkerMetadata {
    pub tools_used: HashMap<String, u64>,
    pub files_touched: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
    pub web_searches: Vec<String>,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub duration_minutes: Option<f64>,
}

impl WorkerMetadata {
    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now().to_rfc3339());
        if let (Some(start), Some(end)) = (
            self.started_at
                .as_deref()
                .and_then(steward_core::time::parse_iso),
            self.ended_at
                .as_deref()
                .and_then(steward_core::time::parse_iso),
        ) {
            let secs = (end - start).num_milliseconds() as f64 / 1000.0;
            self.duration_minutes = Some((secs / 60.0 * 100.0).round() / 100.0);
        }
    }
}

pub struct WorkerHooks {
    worker_id: String,
    live: Arc<LiveOutput>,
    pub metadata: WorkerMetadata,
}

impl WorkerHooks {
    pub fn new(worker_id: impl Into<String>, live: Arc<LiveOutput>) -> Self {
        let mut metadata = WorkerMetadata::default();
        metadata.started_at = Some(Utc::now().to_rfc3339());
        Self {
            worker_id: worker_id.into(),
            live,
            metadata,
        }
    }

    /// PreToolUse: announce the tool invocation for live viewers.
    pub fn on_tool_start(&self, name: &str, tool_use_id: &str, input: &serde_json::Value) {
        self.live.emit(
            &self.worker_id,
            serde_json::json!({
                "type": "tool_start",
                "name": name,
                "id": tool_use_id,
                "input": sanitize_tool_input(input),
            }),
        );
    }

    /// PostToolUse: record the outcome and account usage.
    pub fn on_tool_result(
        &mut self,
        name: &str,
        tool_use_id: &str,
        input: &serde_json::Value,
        output: &str,
        success: bool,
    ) {
        self.live.emit(
            &self.worker_id,
            serde_json::json!({
                "type": "tool_result",
                "id": tool_use_id,
                "success": success,
                "output": &output[..floor_char_boundary(output, 500)],
            }),
        );

        *self
            .metadata
            .tools_used
            .entry(name.to_string())
            .or_insert(0) += 1;

        if matches!(name, "Edit" | "Write") {
            if let Some(path) = input.get("file_path").and_then(|v| v.as_str()) {
                self.metadata.files_touched.insert(path.to_string());
                if name == "Write" && path.contains("output/") {
                    self.metadata.outputs.insert(path.to_string());
                }
            }
        }
        if name == "WebSearch" {
            if let Some(query) = input.get("query").and_then(|v| v.as_str()) {
                self.metadata.web_searches.push(query.to_string());
            }
        }
    }

    /// Assistant text block from the stream.
    pub fn on_text(&self, text: &str) {
        self.live.emit(
            &self.worker_id,
            serde_json::json!({
                "type": "text",
                "content": &text[..floor_char_boundary(text, 2000)],
            }),
        );
    }

    pub fn on_progress(&self, step: u64, description: &str) {
        self.live.emit(
            &self.worker_id,
            serde_json::json!({
                "type": "progress",
                "step": step,
                "description": description,
            }),
        );
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

/// Truncate large values and flatten complex ones so tool inputs are safe to
/// show in a dashboard without hauling payloads around.
pub fn sanitize_tool_input(input: &serde_json::Value) -> serde_json::Value {
    let Some(map) = input.as_object() else {
        return input.clone();
    };

    let mut out = serde_json::Map::new();
    for (key, value) in map {
        let sanitized = match value {
            serde_json::Value::String(s) if s.len() > 200 => {
                serde_json::json!(format!("{}...", &s[..floor_char_boundary(s, 200)]))
            }
            serde_json::Value::Array(items) => {
                let repr = value.to_string();
                if repr.len() > 100 {
                    serde_json::json!(format!("[array with {} items]", items.len()))
                } else {
                    value.clone()
                }
            }
            serde_json::Value::Object(fields) => {
                let repr = value.to_string();
                if repr.len() > 100 {
                    serde_json::json!(format!("[object with {} fields]", fields.len()))
                } else {
                    value.clone()
                }
            }
            other => other.clone(),
        };
        out.insert(key.clone(), sanitized);
    }
    serde_json::Value::Object(out)
}
