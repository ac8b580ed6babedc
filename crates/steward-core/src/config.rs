use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// How long `spawn` polls for the agent's ready prompt before rolling back.
pub const AGENT_READY_TIMEOUT_SECS: u64 = 30;
/// Scheduler loop cadence (duties and missions share it).
pub const SCHEDULER_TICK_SECS: u64 = 30;
/// Warning lead time before a duty force-resets a running chief.
pub const DUTY_WARNING_SECS: u64 = 120;

/// Top-level config (steward.toml + STEWARD_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StewardConfig {
    /// Root of the orchestrated repository. All data/prompt paths hang off it.
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub tmux: TmuxConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// The user's home timezone; all wall-clock schedules are interpreted here.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmuxConfig {
    /// Name of the root tmux session all windows are created in.
    #[serde(default = "default_tmux_session")]
    pub session: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent binary to launch in session windows and worker subprocesses.
    #[serde(default = "default_agent_command")]
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// First local hour (inclusive) the chief heartbeat may fire.
    #[serde(default = "default_heartbeat_start")]
    pub start_hour: u32,
    /// Local hour (exclusive) after which the heartbeat goes quiet.
    #[serde(default = "default_heartbeat_end")]
    pub end_hour: u32,
    /// Fallback wake interval when the settings table has no override.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_minutes: i64,
}

impl Default for StewardConfig {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            gateway: GatewayConfig::default(),
            tmux: TmuxConfig::default(),
            agent: AgentConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            timezone: default_timezone(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            session: default_tmux_session(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            start_hour: default_heartbeat_start(),
            end_hour: default_heartbeat_end(),
            interval_minutes: default_heartbeat_interval(),
        }
    }
}

impl StewardConfig {
    /// Load config from a TOML file with STEWARD_* env var overrides.
    ///
    /// Checks in order: explicit path argument, then
    /// `<repo>/.engine/config/steward.toml` relative to the current directory.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(|| ".engine/config/steward.toml".to_string());

        let config: StewardConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("STEWARD_").split("_"))
            .extract()
            .map_err(|e| crate::error::StewardError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::America::Los_Angeles)
    }

    // --- filesystem layout -------------------------------------------------

    pub fn db_path(&self) -> PathBuf {
        self.repo_root.join(".engine/data/db/system.db")
    }

    pub fn pids_dir(&self) -> PathBuf {
        self.repo_root.join(".engine/data/pids")
    }

    pub fn schema_path(&self) -> PathBuf {
        self.repo_root.join(".engine/config/schema.sql")
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.repo_root.join(".engine/config/migrations")
    }

    pub fn roles_dir(&self) -> PathBuf {
        self.repo_root.join(".claude/roles")
    }

    pub fn missions_dir(&self) -> PathBuf {
        self.repo_root.join(".claude/missions")
    }

    pub fn duties_dir(&self) -> PathBuf {
        self.repo_root.join(".claude/scheduled")
    }

    pub fn desktop_dir(&self) -> PathBuf {
        self.repo_root.join("Desktop")
    }

    /// Per-session artifact folder, keyed by the 8-char short id.
    pub fn session_dir(&self, short_id: &str) -> PathBuf {
        self.desktop_dir().join("sessions").join(short_id)
    }

    /// Workspace for specialist-mode conversations (plan.md, progress.md).
    pub fn conversation_workspace(&self, conversation_id: &str) -> PathBuf {
        self.desktop_dir().join("conversations").join(conversation_id)
    }

    pub fn today_md(&self) -> PathBuf {
        self.desktop_dir().join("TODAY.md")
    }
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    18620
}
fn default_tmux_session() -> String {
    "steward".to_string()
}
fn default_agent_command() -> String {
    "claude".to_string()
}
fn default_timezone() -> String {
    "America/Los_Angeles".to_string()
}
fn default_heartbeat_start() -> u32 {
    7
}
fn default_heartbeat_end() -> u32 {
    23
}
fn default_heartbeat_interval() -> i64 {
    15
}
