//! Agent todo-list snapshots.
//!
//! The agent runtime writes its task list either as a per-session directory
//! of JSON files (`~/.claude/tasks/{agent_session_id}/{id}.json`) or, in the
//! older layout, a single JSON array (`~/.claude/todos/...json`). Snapshots
//! are hash-compared so the stream only emits on change.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::events::TodoItem;

pub fn default_tasks_dir() -> PathBuf {
    home().join(".claude/tasks")
}

pub fn default_todos_dir() -> PathBuf {
    home().join(".claude/todos")
}

fn home() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_default()
}

/// Read the current todo snapshot for a session. New per-task layout first,
/// then the legacy array files.
pub fn read_todo_tasks(
    tasks_dir: &Path,
    todos_dir: &Path,
    session_id: &str,
    agent_session_id: Option<&str>,
) -> Vec<TodoItem> {
    if let Some(agent_id) = agent_session_id {
        let dir = tasks_dir.join(agent_id);
        if dir.is_dir() {
            let items = read_task_dir(&dir);
            if !items.is_empty() {
                return items;
            }
        }
    }

    let mut candidates: Vec<&str> = Vec::new();
    if let Some(agent_id) = agent_session_id {
        candidates.push(agent_id);
    }
    candidates.push(session_id);

    for id in candidates {
        for pattern in [
            format!("{id}-agent-{id}.json"),
            format!("agent-{id}.json"),
            format!("{id}.json"),
        ] {
            let path = todos_dir.join(pattern);
            if path.exists() {
                if let Some(items) = read_legacy_file(&path) {
                    return items;
                }
            }
        }
    }

    Vec::new()
}

fn read_task_dir(dir: &Path) -> Vec<TodoItem> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    paths
        .iter()
        .filter_map(|path| {
            let raw = std::fs::read_to_string(path).ok()?;
            let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
            let obj = value.as_object()?;
            let subject = obj
                .get("subject")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            Some(TodoItem {
                id: obj
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| path.file_stem().unwrap_or_default().to_string_lossy().into()),
                content: if subject.is_empty() {
                    obj.get("content")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string()
                } else {
                    subject.clone()
                },
                subject,
                description: obj
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                status: obj
                    .get("status")
                    .and_then(|v| v.as_str())
                    .unwrap_or("pending")
                    .to_string(),
                active_form: obj
                    .get("activeForm")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                blocked_by: obj
                    .get("blockedBy")
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|i| i.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
            })
        })
        .collect()
}

fn read_legacy_file(path: &Path) -> Option<Vec<TodoItem>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    let items = value.as_array()?;
    Some(
        items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                let obj = item.as_object()?;
                let content = obj
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Some(TodoItem {
                    id: (i + 1).to_string(),
                    subject: content.clone(),
                    content,
                    description: String::new(),
                    status: obj
                        .get("status")
                        .and_then(|v| v.as_str())
                        .unwrap_or("pending")
                        .to_string(),
                    active_form: obj
                        .get("activeForm")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    blocked_by: Vec::new(),
                })
            })
            .collect(),
    )
}

/// Stable hash of a snapshot for change detection.
pub fn snapshot_hash(items: &[TodoItem]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for item in items {
        item.id.hash(&mut hasher);
        item.content.hash(&mut hasher);
        item.status.hash(&mut hasher);
        item.active_form.hash(&mut hasher);
        item.blocked_by.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_task_dir_layout() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = dir.path().join("tasks/agent-uuid-1");
        std::fs::create_dir_all(&tasks).unwrap();
        std::fs::write(
            tasks.join("1.json"),
            r#"{"id":"1","subject":"Research Acme","status":"in_progress","activeForm":"Researching"}"#,
        )
        .unwrap();
        std::fs::write(
            tasks.join("2.json"),
            r#"{"id":"2","subject":"Write report","status":"pending","blockedBy":["1"]}"#,
        )
        .unwrap();

        let items = read_todo_tasks(
            &dir.path().join("tasks"),
            &dir.path().join("todos"),
            "short123",
            Some("agent-uuid-1"),
        );
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].subject, "Research Acme");
        assert_eq!(items[1].blocked_by, vec!["1"]);
    }

    #[test]
    fn legacy_array_layout() {
        let dir = tempfile::tempdir().unwrap();
        let todos = dir.path().join("todos");
        std::fs::create_dir_all(&todos).unwrap();
        std::fs::write(
            todos.join("short123.json"),
            r#"[{"content":"Do the thing","status":"pending"}]"#,
        )
        .unwrap();

        let items = read_todo_tasks(&dir.path().join("tasks"), &todos, "short123", None);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "Do the thing");
        assert_eq!(items[0].id, "1");
    }

    #[test]
    fn hash_changes_on_status_change() {
        let mut items = vec![TodoItem {
            id: "1".into(),
            content: "x".into(),
            subject: "x".into(),
            description: String::new(),
            status: "pending".into(),
            active_form: None,
            blocked_by: vec![],
        }];
        let before = snapshot_hash(&items);
        items[0].status = "completed".into();
        assert_ne!(before, snapshot_hash(&items));
    }

    #[test]
    fn missing_dirs_mean_empty() {
        let items = read_todo_tasks(
            Path::new("/nonexistent/a"),
            Path::new("/nonexistent/b"),
            "sid",
            Some("aid"),
        );
        assert!(items.is_empty());
    }
}
