use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use droidpilot::agent_engine::event_bus::EngineEvent;
use droidpilot::agent_engine::task::TaskStatus;
use droidpilot::config::{self, AppConfig};
use droidpilot::errors::PilotResult;
use droidpilot::executor::router::BackendKind;
use droidpilot::{init_tracing, Pilot};

#[derive(Parser)]
#[command(name = "droidpilot", version, about = "Drive an Android device with natural-language tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one task to completion over adb
    Run {
        /// What to do, e.g. "open settings"
        task: String,
    },
    /// Check the decision service round trip
    Ping,
    /// Persist the control backend selection
    Backend {
        /// gesture | shell
        kind: BackendKind,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { task } => run(&task).await,
        Command::Ping => ping().await,
        Command::Backend { kind } => select_backend(kind),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_or_default() -> AppConfig {
    match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "using default configuration");
            AppConfig::default()
        }
    }
}

async fn run(description: &str) -> PilotResult<ExitCode> {
    let cfg = load_or_default();
    let pilot = Arc::new(Pilot::for_adb_host(&cfg)?);
    let status = pilot.router.initialize().await;
    tracing::info!(status = ?status, "control backend status");

    let mut events = pilot.tasks.engine().events().subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::StepRecorded { entry }) => println!("step {}: {}", entry.step, entry.summary()),
                Ok(EngineEvent::StepRetrying { step, attempt, error }) => {
                    println!("step {step}: attempt {attempt} failed: {error}")
                }
                Ok(EngineEvent::SafetyFlagged { step, verdict }) => {
                    println!("step {step}: safety {:?}: {}", verdict.level, verdict.reason)
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let interrupt = {
        let pilot = pilot.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("cancelling after the current step...");
                pilot.tasks.cancel();
            }
        })
    };

    let task = pilot.tasks.execute_task(description).await;
    interrupt.abort();
    printer.abort();
    pilot.router.shutdown().await;

    let task = task?;
    match task.status {
        TaskStatus::Completed if task.awaiting_confirmation => {
            println!("{}", task.result.unwrap_or_default());
            Ok(ExitCode::from(2))
        }
        TaskStatus::Completed => {
            println!("done: {}", task.result.unwrap_or_default());
            Ok(ExitCode::SUCCESS)
        }
        TaskStatus::Failed => {
            println!("failed: {}", task.error.unwrap_or_default());
            Ok(ExitCode::FAILURE)
        }
        other => {
            println!("task ended as {other:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn ping() -> PilotResult<ExitCode> {
    let cfg = load_or_default();
    let pilot = Pilot::for_adb_host(&cfg)?;
    let diag = pilot.decision.test_connection().await?;
    println!(
        "{} answered in {} ms: {}",
        diag.model, diag.latency_ms, diag.response_preview
    );
    Ok(ExitCode::SUCCESS)
}

fn select_backend(kind: BackendKind) -> PilotResult<ExitCode> {
    let mut cfg = load_or_default();
    cfg.control.backend = kind;
    config::save_config(&cfg)?;
    println!("backend set to {}", kind.as_str());
    Ok(ExitCode::SUCCESS)
}
