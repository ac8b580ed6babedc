//! Process assembly: open the database, construct the singletons, start the
//! background loops, serve HTTP, and tear everything down on ctrl-c.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use steward_bus::EventBus;
use steward_core::config::StewardConfig;
use steward_notify::Notifier;
use steward_scheduler::calendar::NoCalendar;
use steward_scheduler::heartbeat::SystemIdleProbe;
use steward_scheduler::{store, DutyScheduler, Heartbeat, MissionScheduler};
use steward_sessions::SessionManager;
use steward_storage::Database;
use steward_tmux::TmuxDriver;
use steward_workers::{ClaudeCliAgent, WorkerExecutor};

use crate::app::{build_router, AppState};

/// Core duties: slug, name, prompt file, local schedule time, timeout.
const CORE_DUTIES: &[(&str, &str, &str, &str, i64)] = &[
    (
        "memory-consolidation",
        "Memory Consolidation",
        ".claude/scheduled/memory-consolidation.md",
        "06:00",
        60,
    ),
    (
        "morning-prep",
        "Morning Prep",
        ".claude/scheduled/morning-prep.md",
        "07:00",
        60,
    ),
];

pub async fn run(config: StewardConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "steward=info,tower_http=warn".into()),
        )
        .init();

    // A migration failure aborts here by design - never run against a
    // half-migrated schema.
    let db = Database::open(
        &config.db_path(),
        Some(&config.schema_path()),
        Some(&config.migrations_dir()),
    )?;

    for (slug, name, prompt, time, timeout) in CORE_DUTIES {
        store::upsert_duty(&db, slug, name, prompt, time, *timeout)?;
    }

    let bus = Arc::new(EventBus::new());
    let tmux = TmuxDriver::new(config.tmux.session.clone());
    let notifier = Arc::new(Notifier::new(db.clone(), tmux.clone()));
    let sessions = Arc::new(SessionManager::new(
        db.clone(),
        tmux.clone(),
        bus.clone(),
        notifier.clone(),
        config.clone(),
    ));

    // Workers talk back through our own binary's worker-tools bridge.
    let bridge_binary = std::env::current_exe()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "steward-gateway".to_string());
    let agent = Arc::new(
        ClaudeCliAgent::new(config.agent.command.clone(), config.repo_root.clone())
            .with_mcp_config(serde_json::json!({
                "mcpServers": {
                    "worker-tools": {
                        "type": "stdio",
                        "command": bridge_binary,
                        "args": ["worker-tools"]
                    }
                }
            })),
    );
    let executor = WorkerExecutor::new(
        db.clone(),
        config.clone(),
        bus.clone(),
        notifier.clone(),
        agent,
    );

    let heartbeat = Heartbeat::new(
        db.clone(),
        sessions.clone(),
        config.clone(),
        Arc::new(NoCalendar),
        Arc::new(SystemIdleProbe),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let duty = DutyScheduler::new(db.clone(), sessions.clone(), bus.clone(), config.clone());
    tokio::spawn(duty.run(shutdown_rx.clone()));

    let mission = MissionScheduler::new(
        db.clone(),
        sessions.clone(),
        bus.clone(),
        tmux.clone(),
        config.clone(),
        heartbeat,
    );
    tokio::spawn(mission.run(shutdown_rx.clone()));

    tokio::spawn(executor.clone().run(shutdown_rx.clone()));

    // Opportunistic hygiene on startup.
    match sessions.cleanup_orphans(2).await {
        Ok(n) if n > 0 => info!(cleaned = n, "orphan sessions cleaned at startup"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "startup orphan cleanup failed"),
    }

    let state = Arc::new(AppState {
        bus,
        tmux,
        sessions,
        executor,
    });
    let router = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    info!(%addr, "steward gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
