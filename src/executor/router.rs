use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::agent_engine::state::{Action, ActionResult};
use crate::errors::{PilotError, PilotResult};
use crate::executor::backend::ControlBackend;
use crate::executor::status::{ConnectionMonitor, ConnectionStatus};

/// Which actuation mechanism drives the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Gesture,
    Shell,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Gesture => "gesture",
            BackendKind::Shell => "shell",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gesture" | "accessibility" => Ok(BackendKind::Gesture),
            "shell" | "adb" => Ok(BackendKind::Shell),
            other => Err(PilotError::Config(format!("unknown backend '{other}'"))),
        }
    }
}

/// Stand-in used whenever the selected backend is missing or not ready.
/// Every call fails with the same readable reason.
pub struct UnavailableBackend {
    kind: BackendKind,
    reason: String,
    monitor: ConnectionMonitor,
}

impl UnavailableBackend {
    pub fn new(kind: BackendKind) -> Self {
        let reason = match kind {
            BackendKind::Gesture => {
                "Gesture backend is not ready. Enable the accessibility service or switch to the shell backend."
            }
            BackendKind::Shell => {
                "Shell backend is not ready. Connect the device over adb or switch to the gesture backend."
            }
        };
        Self {
            kind,
            reason: reason.to_string(),
            monitor: ConnectionMonitor::new("unavailable"),
        }
    }
}

#[async_trait]
impl ControlBackend for UnavailableBackend {
    fn label(&self) -> &str {
        self.kind.as_str()
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.monitor.subscribe()
    }

    async fn initialize(&self) -> ConnectionStatus {
        ConnectionStatus::Disabled
    }

    async fn shutdown(&self) {}

    async fn execute(&self, _action: &Action) -> ActionResult {
        ActionResult::failure(self.reason.clone()).with_confirmation(true)
    }

    async fn current_foreground_app(&self) -> PilotResult<String> {
        Err(PilotError::Backend(self.reason.clone()))
    }
}

/// Holds both backends and hands out the selected one. Callers never see `None`:
/// a missing or unready backend is replaced by its `UnavailableBackend`.
pub struct BackendRouter {
    selection: watch::Sender<BackendKind>,
    gesture: Option<Arc<dyn ControlBackend>>,
    shell: Option<Arc<dyn ControlBackend>>,
    gesture_unavailable: Arc<dyn ControlBackend>,
    shell_unavailable: Arc<dyn ControlBackend>,
}

impl BackendRouter {
    pub fn new(
        selected: BackendKind,
        gesture: Option<Arc<dyn ControlBackend>>,
        shell: Option<Arc<dyn ControlBackend>>,
    ) -> Self {
        let (selection, _rx) = watch::channel(selected);
        Self {
            selection,
            gesture,
            shell,
            gesture_unavailable: Arc::new(UnavailableBackend::new(BackendKind::Gesture)),
            shell_unavailable: Arc::new(UnavailableBackend::new(BackendKind::Shell)),
        }
    }

    pub fn selected(&self) -> BackendKind {
        *self.selection.borrow()
    }

    pub fn select(&self, kind: BackendKind) {
        let previous = self.selection.send_replace(kind);
        if previous != kind {
            tracing::info!(from = previous.as_str(), to = kind.as_str(), "control backend switched");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<BackendKind> {
        self.selection.subscribe()
    }

    fn slot(&self, kind: BackendKind) -> (&Option<Arc<dyn ControlBackend>>, &Arc<dyn ControlBackend>) {
        match kind {
            BackendKind::Gesture => (&self.gesture, &self.gesture_unavailable),
            BackendKind::Shell => (&self.shell, &self.shell_unavailable),
        }
    }

    /// The selected backend if it is ready, else its stand-in.
    pub fn active(&self) -> Arc<dyn ControlBackend> {
        let kind = self.selected();
        let (backend, fallback) = self.slot(kind);
        match backend {
            Some(b) if b.is_ready() => b.clone(),
            Some(_) => {
                tracing::warn!(backend = kind.as_str(), "selected backend not ready");
                fallback.clone()
            }
            None => {
                tracing::warn!(backend = kind.as_str(), "selected backend not available on this host");
                fallback.clone()
            }
        }
    }

    /// Initializes every configured backend and reports the selected one's status.
    pub async fn initialize(&self) -> ConnectionStatus {
        for backend in [&self.gesture, &self.shell].into_iter().flatten() {
            let status = backend.initialize().await;
            tracing::info!(backend = backend.label(), status = ?status, "backend initialized");
        }
        let (backend, _) = self.slot(self.selected());
        match backend {
            Some(b) => *b.status().borrow(),
            None => ConnectionStatus::Disabled,
        }
    }

    pub async fn shutdown(&self) {
        for backend in [&self.gesture, &self.shell].into_iter().flatten() {
            backend.shutdown().await;
        }
    }
}
