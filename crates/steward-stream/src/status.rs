//! Agent activity parsed from captured pane text.
//!
//! The agent TUI renders a status line while working ("✻ Churning…
//! (esc to interrupt · 34s · 12.1k tokens)"), a context indicator when the
//! window runs low, and model/cost lines in its footer. This module turns a
//! pane snapshot into structured status, ANSI-stripped first.

use crate::events::{ActivityData, ContextWarningData, SessionMetaData};

/// Parsed view of one pane snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaneStatus {
    pub activity: ActivityData,
    pub context_remaining: Option<i64>,
    pub model: Option<String>,
    pub cost_usd: Option<f64>,
}

impl PaneStatus {
    pub fn context_warning(&self) -> Option<ContextWarningData> {
        let remaining = self.context_remaining?;
        Some(ContextWarningData {
            percent_remaining: Some(remaining),
            percent_used: Some(100 - remaining),
            should_warn: true,
            should_force_reset: Some(remaining <= 10),
        })
    }

    pub fn meta(&self) -> SessionMetaData {
        SessionMetaData {
            model: self.model.clone(),
            cost_usd: self.cost_usd,
        }
    }
}

/// Parse a raw pane capture.
pub fn parse_pane_status(raw: &str) -> PaneStatus {
    let clean = strip_ansi(raw);
    let mut status = PaneStatus::default();

    for line in clean.lines() {
        let trimmed = line.trim();

        // Working indicator: "✻ Reading files… (esc to interrupt · 34s · 12.1k tokens)"
        if trimmed.contains("esc to interrupt") {
            status.activity.is_thinking = true;
            if let Some(open) = trimmed.find('(') {
                let task = trimmed[..open].trim();
                let task = task.trim_start_matches(['✻', '*', '·', '⏺']).trim();
                if !task.is_empty() {
                    status.activity.active_task = Some(task.trim_end_matches('…').to_string());
                }
                let inner = trimmed[open + 1..].trim_end_matches(')');
                for part in inner.split('·').map(str::trim) {
                    if part.ends_with('s') && part[..part.len() - 1].chars().all(|c| c.is_ascii_digit())
                    {
                        status.activity.elapsed_time = Some(part.to_string());
                    } else if part.contains("tokens") {
                        status.activity.token_count =
                            Some(part.trim_end_matches("tokens").trim().to_string());
                    }
                }
            }
        }

        // Context indicator: "Context left until auto-compact: 8%"
        if let Some(rest) = trimmed.split("Context left until auto-compact:").nth(1) {
            if let Ok(pct) = rest.trim().trim_end_matches('%').parse::<i64>() {
                status.context_remaining = Some(pct);
            }
        }

        // Footer model line: "claude-opus-4 · $1.23"
        if trimmed.starts_with("claude-") || trimmed.contains("opus") || trimmed.contains("sonnet")
        {
            for part in trimmed.split('·').map(str::trim) {
                if part.starts_with("claude-")
                    || part == "opus"
                    || part == "sonnet"
                    || part == "haiku"
                {
                    status.model.get_or_insert_with(|| part.to_string());
                }
                if let Some(cost) = part.strip_prefix('$') {
                    if let Ok(v) = cost.parse::<f64>() {
                        status.cost_usd = Some(v);
                    }
                }
            }
        }
    }

    // Without a working indicator the last task line becomes "last_task".
    if !status.activity.is_thinking {
        if let Some(done) = clean
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| l.starts_with('⏺'))
        {
            status.activity.last_task =
                Some(done.trim_start_matches('⏺').trim().to_string());
        }
    }

    status
}

fn strip_ansi(raw: &str) -> String {
    String::from_utf8_lossy(&strip_ansi_escapes::strip(raw.as_bytes())).into_owned()
}
