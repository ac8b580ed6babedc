//! Initial prompt assembly.
//!
//! The bootstrap prompt is a concatenation of prompt-fragment files plus
//! context blocks derived from the spawn request. Fragment layout:
//! `.claude/roles/{role}/role.md`, `.claude/roles/{role}/{mode}.md`,
//! `.claude/missions/{slug}.md`.

use std::path::Path;

use steward_core::config::StewardConfig;
use steward_core::types::{Mode, Role};

use crate::types::SpawnRequest;

pub fn build_initial_prompt(config: &StewardConfig, req: &SpawnRequest) -> String {
    let role = req.role();
    let mode = req.mode();
    let mut parts: Vec<String> = Vec::new();

    parts.push(load_role_content(config, role, mode));
    parts.push(load_mode_content(config, role, mode));

    if let Some(ref description) = req.description {
        parts.push(format!(
            "<session-description>\n{}\n</session-description>",
            description
        ));
    }

    if mode.uses_workspace() {
        if let Some(ref conversation_id) = req.conversation_id {
            parts.push(workspace_block(
                config,
                conversation_id,
                req.spec_path.as_deref(),
            ));
        }
    }

    if let Some(ref project_path) = req.project_path {
        parts.push(project_block(project_path));
    }

    if let Some(ref handoff_path) = req.handoff_path {
        let reason = req.handoff_reason.as_deref().unwrap_or("context_low");
        parts.push(format!(
            "[AUTO-HANDOFF]\n\
             Previous session handed off to you.\n\
             Reason: {reason}\n\
             Handoff document: {handoff_path}\n\n\
             Read the handoff document and continue where they left off.\n\
             After reading, DELETE the handoff file (handoffs are ephemeral, sprints are persistent)."
        ));
    } else if let Some(ref content) = req.handoff_content {
        let reason = req.handoff_reason.as_deref().unwrap_or("mission_execution");
        parts.push(format!(
            "[AUTO-HANDOFF]\n\
             Previous session handed off to you.\n\
             Reason: {reason}\n\n\
             {content}"
        ));
    }

    if mode == Mode::Mission {
        if let Some(ref execution_id) = req.mission_execution_id {
            parts.push(format!(
                "<mission-context>\n\
                 You are executing mission execution {execution_id}.\n\
                 This is autonomous mode - the user is not available for questions.\n\n\
                 **BEFORE EXITING:**\n\
                 1. Call mission_complete(\"{execution_id}\", \"completed\", \"brief summary\")\n\
                 2. Wait for success\n\
                 3. Then type /exit\n\
                 </mission-context>"
            ));
        }
    }

    if let Some(ref task) = req.initial_task {
        parts.push(task.clone());
    }

    parts.join("\n\n")
}

/// Role fragment. Mission-mode sessions whose slug has a mission prompt use
/// that file in place of role.md.
fn load_role_content(config: &StewardConfig, role: Role, mode: Mode) -> String {
    if mode == Mode::Mission {
        let mission_file = config.missions_dir().join(format!("{}.md", role));
        if let Ok(content) = std::fs::read_to_string(&mission_file) {
            return content;
        }
    }

    let role_file = config.roles_dir().join(role.as_str()).join("role.md");
    if let Ok(content) = std::fs::read_to_string(&role_file) {
        return content;
    }

    // Fall back to the chief role so a missing file never blocks a spawn.
    let fallback = config.roles_dir().join("chief/role.md");
    match std::fs::read_to_string(&fallback) {
        Ok(content) => format!("<!-- Role '{}' not found, using chief -->\n\n{}", role, content),
        Err(_) => format!("<!-- Role file not found: {} -->", role),
    }
}

fn load_mode_content(config: &StewardConfig, role: Role, mode: Mode) -> String {
    let mode_file = config
        .roles_dir()
        .join(role.as_str())
        .join(format!("{}.md", mode));
    std::fs::read_to_string(&mode_file)
        .unwrap_or_else(|_| format!("<!-- Mode file not found: {}/{} -->", role, mode))
}

fn workspace_block(config: &StewardConfig, conversation_id: &str, spec_path: Option<&str>) -> String {
    let workspace = config.conversation_workspace(conversation_id);
    let workspace = workspace.display();

    let spec_line = match spec_path {
        Some(path) => format!(
            "- `{path}` — Requirements spec (READ-ONLY, lives on Desktop; do not edit it)"
        ),
        None => format!("- `{workspace}/spec.md` — Original requirements from Chief"),
    };

    format!(
        "<specialist-workspace>\n\
         ## Your Workspace\n\n\
         **Conversation ID:** {conversation_id}\n\
         **Workspace Path:** {workspace}/\n\n\
         All your files are here:\n\
         {spec_line}\n\
         - `{workspace}/plan.md` — Technical plan (created in preparation, read in implementation)\n\
         - `{workspace}/progress.md` — Iteration history and verification feedback\n\n\
         **Start by reading the files in your workspace.**\n\
         </specialist-workspace>"
    )
}

fn project_block(project_path: &str) -> String {
    let project_name = Path::new(project_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| project_path.to_string());

    format!(
        "<target-project>\n\
         ## Target Project: {project_name}\n\n\
         **Path:** {project_path}\n\n\
         This session is focused on the project at the path above. Start by loading project context:\n\n\
         1. Check for CLAUDE.md: `{project_path}/CLAUDE.md`\n\
         2. Check for specs under `{project_path}/specs/`\n\
         3. Understand the tech stack (Cargo.toml, package.json, etc.)\n\n\
         Use absolute paths when working with project files.\n\
         </target-project>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_core::types::{Mode, Role};

    fn config_with_roles(dir: &tempfile::TempDir) -> StewardConfig {
        let mut config = StewardConfig::default();
        config.repo_root = dir.path().to_path_buf();
        let chief = dir.path().join(".claude/roles/chief");
        std::fs::create_dir_all(&chief).unwrap();
        std::fs::write(chief.join("role.md"), "You are the Chief.").unwrap();
        std::fs::write(chief.join("interactive.md"), "Interactive mode.").unwrap();
        config
    }

    #[test]
    fn role_and_mode_files_are_concatenated() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_roles(&dir);
        let req = SpawnRequest::new(Role::Chief, Mode::Interactive);

        let prompt = build_initial_prompt(&config, &req);
        assert!(prompt.starts_with("You are the Chief."));
        assert!(prompt.contains("Interactive mode."));
    }

    #[test]
    fn missing_role_falls_back_to_chief() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_roles(&dir);
        let req = SpawnRequest::new(Role::Builder, Mode::Interactive);

        let prompt = build_initial_prompt(&config, &req);
        assert!(prompt.contains("Role 'builder' not found"));
        assert!(prompt.contains("You are the Chief."));
    }

    #[test]
    fn mission_mode_prefers_mission_file_and_adds_closing_block() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_roles(&dir);
        let missions = dir.path().join(".claude/missions");
        std::fs::create_dir_all(&missions).unwrap();
        std::fs::write(missions.join("researcher.md"), "Mission brief.").unwrap();

        let mut req = SpawnRequest::new(Role::Researcher, Mode::Mission);
        req.mission_execution_id = Some("exec-123".into());

        let prompt = build_initial_prompt(&config, &req);
        assert!(prompt.starts_with("Mission brief."));
        assert!(prompt.contains("mission_complete(\"exec-123\""));
        assert!(prompt.contains("/exit"));
    }

    #[test]
    fn workspace_block_marks_external_spec_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_roles(&dir);

        let mut req = SpawnRequest::new(Role::Builder, Mode::Implementation);
        req.conversation_id = Some("20260314-0900-builder-ab12cd34".into());
        req.spec_path = Some("/srv/life/Desktop/specs/api.md".into());

        let prompt = build_initial_prompt(&config, &req);
        assert!(prompt.contains("READ-ONLY"));
        assert!(prompt.contains("20260314-0900-builder-ab12cd34"));
        assert!(prompt.contains("plan.md"));
    }

    #[test]
    fn initial_task_is_appended_last() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_roles(&dir);
        let mut req = SpawnRequest::new(Role::Chief, Mode::Interactive);
        req.initial_task = Some("[DUTY]\n\nDuty: Morning prep".into());

        let prompt = build_initial_prompt(&config, &req);
        assert!(prompt.ends_with("Duty: Morning prep"));
    }
}
