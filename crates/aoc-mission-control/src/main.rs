use anyhow::{Context, Result};
use aoc_core::job_ipc::{encode_frame, OperationRequest, DEFAULT_MAX_FRAME_BYTES};
use aoc_mission_control::{config, server, MissionControl};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "aoc-mission-control")]
#[command(about = "Mission Control job store", long_about = None)]
struct Cli {
    /// Job store path (defaults to $AOC_MISSION_CONTROL_DB or the user data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer newline-delimited JSON requests on stdin
    Serve,
    /// Run a single operation and print the response frame
    Call {
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    config::init_logging();

    let db_path = config::resolve_db_path(cli.db);
    info!(event = "mission_control_start", db_path = %db_path.display());
    let control = Arc::new(MissionControl::open_at(db_path));

    match cli.command {
        Commands::Serve => {
            server::serve(control, tokio::io::stdin(), tokio::io::stdout())
                .await
                .context("stdio server failed")?;
        }
        Commands::Call { method, params } => {
            let params: Value =
                serde_json::from_str(&params).context("--params must be valid JSON")?;
            let request = OperationRequest {
                request_id: None,
                method,
                params,
            };
            let response = server::dispatch(control, request).await;
            let frame = encode_frame(&response, DEFAULT_MAX_FRAME_BYTES)
                .context("failed to encode response")?;
            let mut stdout = io::stdout().lock();
            stdout.write_all(&frame)?;
            stdout.flush()?;
            if !response.ok {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
