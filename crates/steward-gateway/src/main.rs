use clap::{Parser, Subcommand};

mod app;
mod bridge;
mod http;
mod serve;

#[derive(Parser)]
#[command(name = "steward-gateway", about = "Always-on agent orchestrator")]
struct Cli {
    /// Path to steward.toml (defaults to .engine/config/steward.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator: schedulers, worker executor, HTTP server.
    Serve,
    /// MCP stdio bridge exposing the worker report tool. Spawned by the
    /// agent CLI via --mcp-config, not run by hand.
    WorkerTools,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = steward_core::config::StewardConfig::load(cli.config.as_deref())
        .unwrap_or_else(|e| {
            eprintln!("config load failed ({e}), using defaults");
            steward_core::config::StewardConfig::default()
        });

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tokio::runtime::Runtime::new()?.block_on(serve::run(config))
        }
        // The bridge is plain blocking stdio; no runtime needed.
        Command::WorkerTools => bridge::run(&config),
    }
}
