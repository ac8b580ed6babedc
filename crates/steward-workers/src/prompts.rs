//! Worker prompt catalog.
//!
//! Each task type maps to a markdown template; `{key}` placeholders are
//! filled from the worker's params. Templates on disk
//! (`.claude/workers/{task_type}.md`) take precedence over the built-ins so
//! prompts can be tuned without a rebuild. Every prompt carries the worker's
//! own id and the reporting contract.

use std::path::PathBuf;

use crate::error::{Result, WorkerError};
use crate::types::WorkerRow;

const REPORT_CONTRACT: &str = "\n\n---\n\
    Your worker id is {worker_id}.\n\
    When you are done, call the worker-tools report tool as your FINAL action:\n\
    report(worker_id=\"{worker_id}\", status=\"complete\"|\"needs_clarification\"|\"failed\", \
    summary=\"one sentence\", body=\"full findings (markdown)\", artifacts=[paths]).\n\
    Do not finish without reporting.";

const BUILTINS: &[(&str, &str)] = &[
    (
        "company_research",
        "Research the company \"{company}\".\n\
         Cover: what they build, stage and funding, recent news, engineering culture,\n\
         and how the user's background fits. Write the full findings to\n\
         Desktop/Career/{company}.md and reference that path in your report.",
    ),
    (
        "morning_brief",
        "Assemble the morning brief for {date}: today's calendar, open priorities,\n\
         unread items that matter, and anything left hanging from yesterday.\n\
         Keep it scannable.",
    ),
    (
        "deep_research",
        "Research the following question in depth:\n\n{question}\n\n\
         Verify claims across sources and cite them in the body.",
    ),
    (
        "commitment_check",
        "Review outstanding commitments: {commitments}.\n\
         Flag anything overdue or at risk, with a suggested next step each.",
    ),
];

pub struct PromptCatalog {
    /// Directory of on-disk template overrides.
    templates_dir: PathBuf,
}

impl PromptCatalog {
    pub fn new(templates_dir: PathBuf) -> Self {
        Self { templates_dir }
    }

    /// Build the full prompt for a worker: template + params + report
    /// contract (the worker must know its own id to report).
    pub fn build(&self, worker: &WorkerRow) -> Result<String> {
        let template = self.template_for(&worker.task_type)?;

        let mut params = worker.params.clone();
        if let Some(obj) = params.as_object_mut() {
            obj.insert(
                "worker_id".to_string(),
                serde_json::json!(worker.id.clone()),
            );
        } else {
            params = serde_json::json!({ "worker_id": worker.id });
        }

        let body = fill_placeholders(&template, &params);
        let contract = fill_placeholders(REPORT_CONTRACT, &params);
        Ok(format!("{body}{contract}"))
    }

    fn template_for(&self, task_type: &str) -> Result<String> {
        let on_disk = self.templates_dir.join(format!("{task_type}.md"));
        if let Ok(content) = std::fs::read_to_string(&on_disk) {
            return Ok(content);
        }
        if let Some((_, template)) = BUILTINS.iter().find(|(t, _)| *t == task_type) {
            return Ok(template.to_string());
        }
        // Ad-hoc tasks carry their whole brief in params; anything else
        // unknown is a caller bug.
        if task_type == "adhoc" {
            return Ok("Complete the following task:\n\n{description}".to_string());
        }
        Err(WorkerError::UnknownTaskType {
            task_type: task_type.to_string(),
        })
    }
}

/// Replace `{key}` placeholders with string/number params. Unknown
/// placeholders are left intact so missing params are visible in the prompt
/// rather than silently blank.
pub fn fill_placeholders(template: &str, params: &serde_json::Value) -> String {
    let Some(obj) = params.as_object() else {
        return template.to_string();
    };
    let mut out = template.to_string();
    for (key, value) in obj {
        let needle = format!("{{{key}}}");
        let replacement = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out = out.replace(&needle, &replacement);
    }
    out
}
