//! Agent invocation boundary.
//!
//! The production client shells out to the agent CLI in print mode with a
//! streamed JSON event output, which is where the per-tool hook events come
//! from. Workers are "in-process" from the orchestrator's point of view —
//! no tmux window, no session row - but the LLM itself still runs in the
//! external binary with a pre-allocated session UUID.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, WorkerError};

/// One parsed event from the agent's stream-json output.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Text(String),
    ToolStart {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        output: String,
        success: bool,
    },
    Completed {
        session_id: Option<String>,
    },
}

/// Final state of one agent run.
#[derive(Debug, Clone, Default)]
pub struct AgentRunResult {
    /// The agent's own session id, needed to resume clarifications.
    pub session_id: Option<String>,
    /// Concatenated assistant text.
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub prompt: String,
    /// Fresh UUID for a new run; ignored when resuming.
    pub agent_session_id: String,
    /// Agent session to resume (clarification second turn).
    pub resume_session: Option<String>,
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Run one agent turn, forwarding stream events as they arrive.
    /// Cancelling `cancel` interrupts the run (user-initiated termination).
    async fn run(
        &self,
        invocation: AgentInvocation,
        events: tokio::sync::mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> Result<AgentRunResult>;
}

/// Parse one stream-json line into events. Assistant messages may carry
/// several content blocks; each becomes its own event. Unknown line shapes
/// are skipped, not errors - the stream format grows fields over time.
pub fn parse_stream_line(line: &str) -> Vec<AgentEvent> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
        return Vec::new();
    };

    match value.get("type").and_then(|t| t.as_str()) {
        Some("assistant") => {
            let mut events = Vec::new();
            if let Some(blocks) = value
                .pointer("/message/content")
                .and_then(|c| c.as_array())
            {
                for block in blocks {
                    match block.get("type").and_then(|t| t.as_str()) {
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                                let trimmed = text.trim();
                                if !trimmed.is_empty() {
                                    events.push(AgentEvent::Text(trimmed.to_string()));
                                }
                            }
                        }
                        Some("tool_use") => {
                            events.push(AgentEvent::ToolStart {
                                id: block
                                    .get("id")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default()
                                    .to_string(),
                                name: block
                                    .get("name")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default()
                                    .to_string(),
                                input: block.get("input").cloned().unwrap_or_default(),
                            });
                        }
                        _ => {}
                    }
                }
            }
            events
        }
        Some("user") => {
            let mut events = Vec::new();
            if let Some(blocks) = value
                .pointer("/message/content")
                .and_then(|c| c.as_array())
            {
                for block in blocks {
                    if block.get("type").and_then(|t| t.as_str()) == Some("tool_result") {
                        let output = match block.get("content") {
                            Some(serde_json::Value::String(s)) => s.clone(),
                            Some(other) => other.to_string(),
                            None => String::new(),
                        };
                        events.push(AgentEvent::ToolResult {
                            id: block
                                .get("tool_use_id")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            output,
                            success: !block
                                .get("is_error")
                                .and_then(|v| v.as_bool())
                                .unwrap_or(false),
                        });
                    }
                }
            }
            events
        }
        Some("result") => vec![AgentEvent::Completed {
            session_id: value
                .get("session_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }],
        _ => Vec::new(),
    }
}

/// Agent client that drives the CLI (`claude -p --output-format stream-json`).
pub struct ClaudeCliAgent {
    command: String,
    cwd: PathBuf,
    /// MCP server config injected via --mcp-config (the worker-tools bridge).
    mcp_config: Option<serde_json::Value>,
}

impl ClaudeCliAgent {
    pub fn new(command: impl Into<String>, cwd: PathBuf) -> Self {
        Self {
            command: command.into(),
            cwd,
            mcp_config: None,
        }
    }

    pub fn with_mcp_config(mut self, config: serde_json::Value) -> Self {
        self.mcp_config = Some(config);
        self
    }

    /// Write the MCP config to a temp file for --mcp-config. The handle is
    /// returned so the file outlives the child process.
    fn write_mcp_config(&self, cmd: &mut Command) -> Option<tempfile::NamedTempFile> {
        let config = self.mcp_config.as_ref()?;
        let file = tempfile::Builder::new()
            .prefix("steward-mcp-")
            .suffix(".json")
            .tempfile()
            .ok()?;
        std::fs::write(file.path(), serde_json::to_string(config).ok()?).ok()?;
        cmd.arg("--mcp-config").arg(file.path());
        debug!(config_path = %file.path().display(), "worker-tools MCP config injected");
        Some(file)
    }
}

#[async_trait]
impl AgentClient for ClaudeCliAgent {
    async fn run(
        &self,
        invocation: AgentInvocation,
        events: tokio::sync::mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> Result<AgentRunResult> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--dangerously-skip-permissions")
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match invocation.resume_session {
            Some(ref session) => {
                cmd.arg("--resume").arg(session);
            }
            None => {
                cmd.arg("--session-id").arg(&invocation.agent_session_id);
            }
        }

        let _mcp_file = self.write_mcp_config(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WorkerError::Agent(format!(
                    "agent CLI not found at '{}' — is it installed?",
                    self.command
                ))
            } else {
                WorkerError::Agent(format!("failed to spawn agent CLI: {e}"))
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(invocation.prompt.as_bytes())
                .await
                .map_err(|e| WorkerError::Agent(format!("failed to write prompt: {e}")))?;
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Agent("agent stdout unavailable".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut result = AgentRunResult::default();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("agent run cancelled, killing child");
                    let _ = child.kill().await;
                    return Ok(result);
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            for event in parse_stream_line(&line) {
                                if let AgentEvent::Text(ref text) = event {
                                    if !result.text.is_empty() {
                                        result.text.push_str("\n\n");
                                    }
                                    result.text.push_str(text);
                                }
                                if let AgentEvent::Completed { ref session_id } = event {
                                    result.session_id = session_id.clone();
                                }
                                // A full channel means the consumer died; stop forwarding.
                                if events.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => return Err(WorkerError::Agent(format!("stream read failed: {e}"))),
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| WorkerError::Agent(format!("agent wait failed: {e}")))?;
        if !status.success() {
            debug!(code = ?status.code(), "agent CLI exited non-zero");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_tool_use_blocks() {
        let line = r#"{"type":"assistant","message":{"content":[
            {"type":"text","text":"Looking into Acme now."},
            {"type":"tool_use","id":"toolu_1","name":"WebSearch","input":{"query":"acme"}}
        ]}}"#
            .replace('\n', "");
        let events = parse_stream_line(&line);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], AgentEvent::Text("Looking into Acme now.".into()));
        match &events[1] {
            AgentEvent::ToolStart { id, name, input } => {
                assert_eq!(id, "toolu_1");
                assert_eq!(name, "WebSearch");
                assert_eq!(input["query"], "acme");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parses_tool_result_with_error_flag() {
        let line = r#"{"type":"user","message":{"content":[
            {"type":"tool_result","tool_use_id":"toolu_1","content":"boom","is_error":true}
        ]}}"#
            .replace('\n', "");
        let events = parse_stream_line(&line);
        assert_eq!(
            events[0],
            AgentEvent::ToolResult {
                id: "toolu_1".into(),
                output: "boom".into(),
                success: false,
            }
        );
    }

    #[test]
    fn parses_result_line_with_session() {
        let events =
            parse_stream_line(r#"{"type":"result","subtype":"success","session_id":"sess-9"}"#);
        assert_eq!(
            events[0],
            AgentEvent::Completed {
                session_id: Some("sess-9".into())
            }
        );
    }

    #[test]
    fn skips_unknown_and_garbage_lines() {
        assert!(parse_stream_line("not json at all").is_empty());
        assert!(parse_stream_line(r#"{"type":"system","subtype":"init"}"#).is_empty());
        assert!(parse_stream_line("").is_empty());
    }

    #[test]
    fn empty_text_blocks_are_dropped() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"   "}]}}"#;
        assert!(parse_stream_line(line).is_empty());
    }
}
