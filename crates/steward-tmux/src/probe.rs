//! Pure helpers for process-tree and pane-content probing.
//!
//! Split out of the driver so the heuristics can be tested without a live
//! tmux server.

/// One row of `ps -eo pid=,ppid=,args=` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRow {
    pub pid: u32,
    pub ppid: u32,
    pub command: String,
}

/// Parse `ps -eo pid=,ppid=,args=` output into rows. Lines that do not start
/// with two integers are skipped.
pub fn parse_ps_table(output: &str) -> Vec<ProcessRow> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.trim().splitn(3, char::is_whitespace);
            let pid = parts.next()?.parse().ok()?;
            let ppid = parts.next()?.trim().parse().ok()?;
            let command = parts.next().unwrap_or("").trim().to_string();
            Some(ProcessRow { pid, ppid, command })
        })
        .collect()
}

/// All descendants of `root` in the process table (children, grandchildren, …).
pub fn descendants(table: &[ProcessRow], root: u32) -> Vec<ProcessRow> {
    let mut frontier = vec![root];
    let mut found = Vec::new();
    while let Some(parent) = frontier.pop() {
        for row in table.iter().filter(|r| r.ppid == parent) {
            frontier.push(row.pid);
            found.push(row.clone());
        }
    }
    found
}

/// Heuristic (a): does any descendant's command line look like the agent
/// process (the CLI itself or its node runtime)?
pub fn tree_has_agent(table: &[ProcessRow], pane_pid: u32) -> bool {
    descendants(table, pane_pid).iter().any(|row| {
        let cmd = row.command.to_lowercase();
        cmd.contains("claude") || cmd.contains("node")
    })
}

/// Heuristic (b): does the visible pane tail carry the agent banner - the
/// input prompt glyph, the product name, or the context indicator?
pub fn pane_shows_agent(content: &str) -> bool {
    if content.contains("Claude") || content.contains("context left") {
        return true;
    }
    content
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .take(5)
        .any(|line| line.contains('>'))
}

/// Is the agent ready for input? Used by the spawn sequence's ready poll.
pub fn pane_ready(content: &str) -> bool {
    content.contains('>') || content.contains("Claude Code")
}
