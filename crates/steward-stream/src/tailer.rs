//! Transcript tailer.
//!
//! Follows the agent runtime's transcript JSONL. On the stream's initial
//! connection it can resume immediately after a given event uuid; after a
//! session boundary it always starts at end-of-file so the consumer never
//! sees another session's history twice.

use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const POLL_MS: u64 = 100;
/// Bounded queue toward the stream loop; it drains up to 10 per tick.
const QUEUE_CAPACITY: usize = 256;

/// Byte offset to resume from: just after the line whose `uuid` field equals
/// `after_uuid`, or the end of content when the uuid is absent.
pub fn resume_offset(content: &str, after_uuid: &str) -> usize {
    let mut offset = 0usize;
    for line in content.split_inclusive('\n') {
        let matched = serde_json::from_str::<serde_json::Value>(line.trim())
            .ok()
            .and_then(|v| v.get("uuid").and_then(|u| u.as_str()).map(str::to_string))
            .is_some_and(|uuid| uuid == after_uuid);
        offset += line.len();
        if matched {
            return offset;
        }
    }
    content.len()
}

/// Should this transcript event reach the consumer?
pub fn event_passes(event: &serde_json::Value, include_thinking: bool) -> bool {
    if include_thinking {
        return true;
    }
    event.get("type").and_then(|t| t.as_str()) != Some("thinking")
}

pub struct TranscriptTailer {
    rx: mpsc::Receiver<serde_json::Value>,
    cancel: CancellationToken,
}

impl TranscriptTailer {
    /// Start tailing `path`. With `after_uuid` the tailer first scans the
    /// existing content for the cursor; otherwise it starts at EOF and only
    /// new events flow.
    pub fn start(path: PathBuf, after_uuid: Option<String>, include_thinking: bool) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            if let Err(e) = tail_loop(path, after_uuid, include_thinking, tx, task_cancel).await {
                warn!(error = %e, "transcript tailer stopped");
            }
        });

        Self { rx, cancel }
    }

    /// Drain up to `max` queued events without waiting.
    pub fn drain(&mut self, max: usize) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        while events.len() < max {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        events
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TranscriptTailer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn tail_loop(
    path: PathBuf,
    after_uuid: Option<String>,
    include_thinking: bool,
    tx: mpsc::Sender<serde_json::Value>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let mut file = tokio::fs::File::open(&path).await?;

    // Establish the starting offset.
    let mut offset = match after_uuid {
        Some(ref uuid) => {
            let mut content = String::new();
            file.read_to_string(&mut content).await?;
            let resume = resume_offset(&content, uuid) as u64;
            debug!(path = %path.display(), resume, "tailer resuming after uuid");
            resume
        }
        None => file.seek(std::io::SeekFrom::End(0)).await?,
    };

    let mut partial = String::new();
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let len = tokio::fs::metadata(&path).await?.len();
        if len > offset {
            file.seek(std::io::SeekFrom::Start(offset)).await?;
            let mut buf = vec![0u8; (len - offset) as usize];
            file.read_exact(&mut buf).await?;
            offset = len;

            partial.push_str(&String::from_utf8_lossy(&buf));
            // Only complete lines are parsed; the remainder waits for the
            // writer to finish it.
            while let Some(newline) = partial.find('\n') {
                let line: String = partial.drain(..=newline).collect();
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<serde_json::Value>(trimmed) {
                    Ok(event) if event_passes(&event, include_thinking) => {
                        if tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "skipping unparseable transcript line"),
                }
            }
        } else if len < offset {
            // File replaced or truncated; start over from the beginning.
            offset = 0;
            partial.clear();
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(std::time::Duration::from_millis(POLL_MS)) => {}
        }
    }
}
