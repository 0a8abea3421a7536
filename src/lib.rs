pub mod agent_engine;
pub mod config;
pub mod decision;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;

use std::sync::Arc;
use std::time::Duration;

use crate::agent_engine::engine::ExecutionEngine;
use crate::agent_engine::task_manager::TaskManager;
use crate::config::AppConfig;
use crate::decision::gateway::DecisionGateway;
use crate::errors::PilotResult;
use crate::executor::backend::ControlBackend;
use crate::executor::channel::{AdbChannel, CommandChannel};
use crate::executor::router::{BackendKind, BackendRouter};
use crate::executor::safety::SafetyGate;
use crate::executor::shell::ShellBackend;
use crate::llm::provider::DecisionService;
use crate::llm::providers::openai_compatible::OpenAiCompatibleService;
use crate::perception::pipeline::PerceptionAggregator;
use crate::perception::screenshot::ShellScreenCapture;
use crate::perception::traits::{ScreenCapture, ViewTreeReader};
use crate::perception::view_tree::ShellViewTreeReader;

/// Installs the global tracing subscriber. `RUST_LOG` overrides the default filter.
/// Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,droidpilot=debug")),
        )
        .try_init();
}

/// Everything a host needs to drive one device.
pub struct Pilot {
    pub router: Arc<BackendRouter>,
    pub decision: Arc<dyn DecisionService>,
    pub tasks: TaskManager,
}

impl Pilot {
    /// Wires the engine from already-built collaborators.
    pub fn assemble(
        config: &AppConfig,
        capture: Arc<dyn ScreenCapture>,
        tree: Arc<dyn ViewTreeReader>,
        router: Arc<BackendRouter>,
        decision: Arc<dyn DecisionService>,
    ) -> Self {
        let perception = PerceptionAggregator::new(capture, tree, config.perception.clone());
        let gateway = DecisionGateway::new(decision.clone(), config.prompt.clone());
        let safety = SafetyGate::new(config.safety.clone());
        let engine = ExecutionEngine::new(
            perception,
            gateway,
            safety,
            router.clone(),
            config.engine.clone(),
            config.safety.halt_on_caution,
        );
        Self {
            router,
            decision,
            tasks: TaskManager::new(Arc::new(engine)),
        }
    }

    /// Host wiring: one adb channel feeds screen capture, the UI dump and the
    /// shell backend. The gesture backend needs an on-device service and is
    /// absent here, so a gesture selection starts on the shell backend instead.
    pub fn for_adb_host(config: &AppConfig) -> PilotResult<Self> {
        let _ = dotenvy::dotenv();

        let channel: Arc<dyn CommandChannel> = Arc::new(AdbChannel::new(
            config.control.adb_path.clone(),
            config.control.device_serial.clone(),
            Duration::from_secs(config.control.command_timeout_secs),
        ));
        let shell: Arc<dyn ControlBackend> = Arc::new(ShellBackend::new(channel.clone()));
        let router = Arc::new(BackendRouter::new(
            adb_host_backend(config.control.backend),
            None,
            Some(shell),
        ));
        let decision = Arc::new(OpenAiCompatibleService::from_config(
            &config.decision,
            config.resolved_api_key(),
        )?);

        tracing::info!(
            backend = router.selected().as_str(),
            model = %config.decision.model,
            serial = ?config.control.device_serial,
            "pilot wired for adb host"
        );
        Ok(Self::assemble(
            config,
            Arc::new(ShellScreenCapture::new(channel.clone())),
            Arc::new(ShellViewTreeReader::new(channel)),
            router,
            decision,
        ))
    }
}

fn adb_host_backend(configured: BackendKind) -> BackendKind {
    match configured {
        BackendKind::Gesture => {
            tracing::warn!("gesture backend needs the on-device service; using shell over adb");
            BackendKind::Shell
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adb_host_falls_back_to_shell() {
        assert_eq!(adb_host_backend(BackendKind::Gesture), BackendKind::Shell);
        assert_eq!(adb_host_backend(BackendKind::Shell), BackendKind::Shell);
    }
}
