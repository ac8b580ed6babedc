//! Tmux driver - the only place that shells out to tmux.
//!
//! All windows live in one root session. Window creation always passes `-d`:
//! stealing focus while the user is typing in another window would interleave
//! their keystrokes with the text we send. That flag is an invariant, not a
//! preference.

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, TmuxError};
use crate::probe;

#[derive(Clone)]
pub struct TmuxDriver {
    /// Root tmux session name, e.g. `steward`.
    session: String,
}

impl TmuxDriver {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Fully-qualified target for a window in the root session.
    pub fn target(&self, window: &str) -> String {
        format!("{}:{}", self.session, window)
    }

    /// Run a tmux subcommand, retrying once on failure before surfacing.
    /// tmux occasionally refuses commands mid-layout-change; a single retry
    /// absorbs that.
    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        let first = Command::new("tmux")
            .args(args)
            .output()
            .await
            .map_err(|e| TmuxError::Spawn(e.to_string()))?;
        if first.status.success() {
            return Ok(first);
        }

        debug!(?args, "tmux command failed, retrying once");
        let second = Command::new("tmux")
            .args(args)
            .output()
            .await
            .map_err(|e| TmuxError::Spawn(e.to_string()))?;
        if second.status.success() {
            Ok(second)
        } else {
            Err(TmuxError::CommandFailed(
                String::from_utf8_lossy(&second.stderr).trim().to_string(),
            ))
        }
    }

    /// Create the root session if it does not exist yet.
    pub async fn ensure_session(&self, cwd: &Path) -> Result<()> {
        let exists = Command::new("tmux")
            .args(["has-session", "-t", &self.session])
            .output()
            .await
            .map_err(|e| TmuxError::Spawn(e.to_string()))?;
        if exists.status.success() {
            return Ok(());
        }
        self.run(&[
            "new-session",
            "-d",
            "-s",
            &self.session,
            "-c",
            &cwd.to_string_lossy(),
        ])
        .await?;
        Ok(())
    }

    pub async fn window_exists(&self, window: &str) -> Result<bool> {
        Ok(self.list_windows().await?.iter().any(|w| w == window))
    }

    pub async fn list_windows(&self) -> Result<Vec<String>> {
        let output = Command::new("tmux")
            .args(["list-windows", "-t", &self.session, "-F", "#{window_name}"])
            .output()
            .await
            .map_err(|e| TmuxError::Spawn(e.to_string()))?;
        if !output.status.success() {
            // Session itself is gone - no windows.
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }

    /// Create a window without focusing it (`-d`).
    pub async fn create_window(&self, window: &str, cwd: &Path) -> Result<()> {
        self.run(&[
            "new-window",
            "-d",
            "-t",
            &self.session,
            "-n",
            window,
            "-c",
            &cwd.to_string_lossy(),
        ])
        .await?;
        Ok(())
    }

    pub async fn kill_window(&self, window: &str) -> Result<()> {
        let target = self.target(window);
        // A vanished window is success for our purposes.
        let output = Command::new("tmux")
            .args(["kill-window", "-t", &target])
            .output()
            .await
            .map_err(|e| TmuxError::Spawn(e.to_string()))?;
        if !output.status.success() {
            debug!(target, "kill-window on missing window");
        }
        Ok(())
    }

    pub async fn kill_pane(&self, pane: &str) -> Result<()> {
        let output = Command::new("tmux")
            .args(["kill-pane", "-t", pane])
            .output()
            .await
            .map_err(|e| TmuxError::Spawn(e.to_string()))?;
        if !output.status.success() {
            debug!(pane, "kill-pane on missing pane");
        }
        Ok(())
    }

    /// Feed literal text to a target; `submit` appends a carriage return.
    /// `-l --` keeps tmux from interpreting the text as key names.
    pub async fn send_text(&self, target: &str, text: &str, submit: bool) -> Result<()> {
        self.run(&["send-keys", "-t", target, "-l", "--", text])
            .await?;
        if submit {
            self.send_key(target, "Enter").await?;
        }
        Ok(())
    }

    /// Send a named key (Enter, C-c, Escape, …).
    pub async fn send_key(&self, target: &str, key: &str) -> Result<()> {
        self.run(&["send-keys", "-t", target, key]).await?;
        Ok(())
    }

    /// Snapshot of the visible pane content.
    pub async fn capture_pane(&self, target: &str) -> Result<String> {
        let output = self.run(&["capture-pane", "-t", target, "-p"]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// The shell PID of a window's pane.
    pub async fn pane_pid(&self, target: &str) -> Result<u32> {
        let output = self
            .run(&["list-panes", "-t", target, "-F", "#{pane_pid}"])
            .await?;
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .lines()
            .next()
            .and_then(|line| line.trim().parse().ok())
            .ok_or_else(|| TmuxError::NotFound(target.to_string()))
    }

    /// The pane id (`%N`) of a window, recorded on session rows.
    pub async fn pane_id(&self, target: &str) -> Result<String> {
        let output = self
            .run(&["list-panes", "-t", target, "-F", "#{pane_id}"])
            .await?;
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .ok_or_else(|| TmuxError::NotFound(target.to_string()))
    }

    pub async fn pane_exists(&self, pane: &str) -> bool {
        Command::new("tmux")
            .args(["list-panes", "-t", pane, "-F", "#{pane_id}"])
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Currently focused window name, for wake payloads.
    pub async fn active_window(&self) -> Result<String> {
        let output = self
            .run(&[
                "display-message",
                "-t",
                &self.session,
                "-p",
                "#{window_name}",
            ])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn select_window(&self, window: &str) -> Result<()> {
        self.run(&["select-window", "-t", &self.target(window)])
            .await?;
        Ok(())
    }

    /// Full process table snapshot for descendant probing.
    async fn process_table(&self) -> Result<Vec<probe::ProcessRow>> {
        let output = Command::new("ps")
            .args(["-eo", "pid=,ppid=,args="])
            .output()
            .await
            .map_err(|e| TmuxError::Spawn(e.to_string()))?;
        Ok(probe::parse_ps_table(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    /// Children (pid, command) of a process, from the same snapshot the
    /// agent heuristic uses.
    pub async fn child_pids(&self, pid: u32) -> Result<Vec<(u32, String)>> {
        let table = self.process_table().await?;
        Ok(probe::descendants(&table, pid)
            .into_iter()
            .map(|row| (row.pid, row.command))
            .collect())
    }

    /// Is the agent running in `window`? Two heuristics, either suffices:
    /// a descendant process whose command mentions the agent, or the agent
    /// banner visible in the pane tail.
    pub async fn is_agent_running(&self, window: &str) -> bool {
        let target = self.target(window);

        if let Ok(pid) = self.pane_pid(&target).await {
            if let Ok(table) = self.process_table().await {
                if probe::tree_has_agent(&table, pid) {
                    return true;
                }
            }
        }

        match self.capture_pane(&target).await {
            Ok(content) => probe::pane_shows_agent(&content),
            Err(e) => {
                warn!(window, error = %e, "pane capture failed during agent probe");
                false
            }
        }
    }

    /// Preferred entry point for delivering a message to a running agent:
    /// wraps with the source tag, sends the text, then a separate return.
    pub async fn inject_message(
        &self,
        target: &str,
        text: &str,
        source: Option<&str>,
    ) -> Result<()> {
        let formatted = match source {
            Some(tag) => format!("[{}] {}", tag, text),
            None => text.to_string(),
        };
        self.send_text(target, &formatted, false).await?;
        // Brief settle so the TUI registers the text before the submit.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        self.send_key(target, "Enter").await
    }
}
