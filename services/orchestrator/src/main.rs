use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use uuid::Uuid;

use orchestrator::provider::LLMProvider;
use orchestrator::provider_lmstudio::LmStudioProvider;
use orchestrator::{pipeline_run, queries, scheduler, AppConfig, AppState};

/// AutoBI analysis pipeline
#[derive(Parser, Debug)]
#[command(name = "orchestrator", version, about = "Profile a table and design a dashboard for it")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline over a CSV file and print the result
    Analyze {
        /// CSV file with a header row
        csv: PathBuf,

        /// Dataset name, used as a classification hint (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        /// Progress poll interval
        #[arg(long, default_value_t = 200)]
        poll_ms: u64,

        /// Request cancellation after this many milliseconds
        #[arg(long)]
        cancel_after_ms: Option<u64>,
    },

    /// List every run in the ledger
    List,

    /// Show status, progress and audit events of one run
    Status { run_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig::from_env()?;

    if let Some(url) = &cfg.llm_base_url {
        let provider = LmStudioProvider::new(url.clone(), cfg.llm_model.clone());
        match provider.ping().await {
            Ok(()) => info!(base_url=%url, "llm: ok"),
            Err(e) => warn!(base_url=%url, "llm unreachable, classification will fall back: {e:#}"),
        }
    }

    let state = AppState::from_config(&cfg)?;

    // RECOVERY: fail non-terminal runs left by a previous process
    let recovered = pipeline_run::recover_runs(&state)
        .await
        .context("Run recovery failed")?;
    if recovered > 0 {
        info!(recovered, "recovered interrupted runs");
    }

    match cli.command {
        Command::Analyze {
            csv,
            name,
            poll_ms,
            cancel_after_ms,
        } => {
            let path = csv.clone();
            let dataset = tokio::task::spawn_blocking(move || tabular::read_csv(&path, name.as_deref()))
                .await?
                .with_context(|| format!("Failed to read {}", csv.display()))?;
            info!(dataset=%dataset.name, rows=dataset.row_count, columns=dataset.column_count, "dataset loaded");

            let run_id = scheduler::submit(&state, dataset).await?;

            if let Some(ms) = cancel_after_ms {
                let st = state.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    if let Err(e) = scheduler::request_cancel(&st, run_id).await {
                        warn!(run_id=%run_id, "cancel failed: {e}");
                    }
                });
            }

            let poll = Duration::from_millis(poll_ms.max(1));
            let mut last = -1.0;
            loop {
                let progress = queries::get_progress(&state, run_id).await?;
                if progress.progress_percentage != last {
                    last = progress.progress_percentage;
                    info!(
                        run_id=%run_id,
                        status=%progress.status,
                        step=?progress.current_step,
                        progress=%format!("{:.0}%", progress.progress_percentage),
                        "progress"
                    );
                }
                if progress.status.is_terminal() {
                    break;
                }
                tokio::time::sleep(poll).await;
            }

            let status = queries::get_status(&state, run_id).await?;
            let result = queries::get_result(&state, run_id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "status": status,
                    "result": result,
                }))?
            );
        }

        Command::List => {
            for run in queries::list_runs(&state).await? {
                let pct = orchestrator::Progress::from_run(&run).progress_percentage;
                println!(
                    "{}  {:<10}  {:>3.0}%  {}  {}",
                    run.id,
                    run.status.as_str(),
                    pct,
                    run.created_at.to_rfc3339(),
                    run.error_message.as_deref().unwrap_or("")
                );
            }
        }

        Command::Status { run_id } => {
            let progress = queries::get_progress(&state, run_id).await?;
            let status = queries::get_status(&state, run_id).await?;
            let events = queries::get_events(&state, run_id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "status": status,
                    "progress": progress,
                    "events": events,
                }))?
            );
        }
    }

    scheduler::shutdown(&state);
    Ok(())
}
