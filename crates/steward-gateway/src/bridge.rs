//! MCP stdio server for worker report submission.
//!
//! The worker executor passes `--mcp-config` pointing back at this binary's
//! `worker-tools` subcommand, so the agent discovers exactly one tool:
//! `report`. The bridge opens SQLite directly - workers finalize their rows
//! without the gateway stack in the middle.
//!
//! Protocol: JSON-RPC 2.0 over stdin/stdout (one JSON object per line).

use serde_json::{json, Value};

use steward_core::config::StewardConfig;
use steward_storage::Database;
use steward_workers::report::{submit_report, ReportStatus};

/// Run the worker-tools stdio loop. Blocks until stdin is closed.
pub fn run(config: &StewardConfig) -> anyhow::Result<()> {
    let db = Database::open(&config.db_path(), Some(&config.schema_path()), None)?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = std::io::BufReader::new(stdin.lock());
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = std::io::BufRead::read_line(&mut reader, &mut line)?;
        if bytes_read == 0 {
            break; // EOF — the agent closed the pipe.
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                write_response(
                    &stdout,
                    json!(null),
                    Some(json!({ "code": -32700, "message": format!("Parse error: {e}") })),
                    None,
                )?;
                continue;
            }
        };

        let id = request.get("id").cloned().unwrap_or(json!(null));
        let method = request.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let is_notification = request.get("id").is_none();

        match method {
            "initialize" => {
                write_response(
                    &stdout,
                    id,
                    None,
                    Some(json!({
                        "protocolVersion": "2025-06-18",
                        "capabilities": { "tools": {} },
                        "serverInfo": {
                            "name": "worker-tools",
                            "version": env!("CARGO_PKG_VERSION")
                        }
                    })),
                )?;
            }

            "notifications/initialized" => {}

            "tools/list" => {
                write_response(&stdout, id, None, Some(json!({ "tools": tool_definitions() })))?;
            }

            "tools/call" => {
                let params = request.get("params").cloned().unwrap_or(json!({}));
                let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
                let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

                let (text, is_error) = match execute_tool(&db, tool_name, &arguments) {
                    Ok(text) => (text, false),
                    Err(message) => (message, true),
                };
                write_response(
                    &stdout,
                    id,
                    None,
                    Some(json!({
                        "content": [{"type": "text", "text": text}],
                        "isError": is_error
                    })),
                )?;
            }

            _ => {
                if !is_notification {
                    write_response(
                        &stdout,
                        id,
                        Some(json!({
                            "code": -32601,
                            "message": format!("Method not found: {method}")
                        })),
                        None,
                    )?;
                }
            }
        }
    }

    Ok(())
}

fn write_response(
    stdout: &std::io::Stdout,
    id: Value,
    error: Option<Value>,
    result: Option<Value>,
) -> std::io::Result<()> {
    use std::io::Write;

    let response = match error {
        Some(err) => json!({ "jsonrpc": "2.0", "id": id, "error": err }),
        None => json!({ "jsonrpc": "2.0", "id": id, "result": result.unwrap_or(json!(null)) }),
    };

    let mut out = stdout.lock();
    serde_json::to_writer(&mut out, &response)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

fn tool_definitions() -> Vec<Value> {
    vec![json!({
        "name": "report",
        "description": "Submit your work report. Call this as your final action.",
        "inputSchema": {
            "type": "object",
            "properties": {
                "worker_id": {
                    "type": "string",
                    "description": "Your worker ID (from your instructions)"
                },
                "status": {
                    "type": "string",
                    "enum": ["complete", "needs_clarification", "failed"],
                    "description": "Task outcome"
                },
                "summary": {
                    "type": "string",
                    "description": "One-sentence summary of what you accomplished"
                },
                "body": {
                    "type": "string",
                    "description": "Full report content (markdown)"
                },
                "artifacts": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Paths to files you created (optional)"
                }
            },
            "required": ["worker_id", "status", "summary"]
        }
    })]
}

fn execute_tool(db: &Database, tool_name: &str, args: &Value) -> Result<String, String> {
    match tool_name {
        "report" => {
            let worker_id = args
                .get("worker_id")
                .and_then(|v| v.as_str())
                .ok_or("missing required parameter: worker_id")?;
            let status_str = args
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("complete");
            let status: ReportStatus =
                serde_json::from_value(json!(status_str)).map_err(|_| {
                    format!("invalid status '{status_str}': expected complete | needs_clarification | failed")
                })?;
            let summary = args
                .get("summary")
                .and_then(|v| v.as_str())
                .ok_or("missing required parameter: summary")?;
            let body = args.get("body").and_then(|v| v.as_str());
            let artifacts: Vec<String> = args
                .get("artifacts")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|i| i.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();

            submit_report(db, worker_id, status, summary, body, &artifacts)
                .map_err(|e| format!("report failed: {e}"))
        }
        _ => Err(format!("Unknown tool: {tool_name}")),
    }
}
