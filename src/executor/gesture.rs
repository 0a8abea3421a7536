//! Gesture backend: synthetic taps/swipes and text-set operations through an
//! accessibility-style bridge hosted on the device.
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::agent_engine::state::{Action, ActionResult};
use crate::errors::{PilotError, PilotResult};
use crate::executor::backend::{
    elapsed_ms, key_label, non_actuating_result, non_negative_ms, settle, ControlBackend,
    SettleDelays, KEYCODE_APP_SWITCH, KEYCODE_BACK, KEYCODE_HOME,
};
use crate::executor::status::{ConnectionMonitor, ConnectionStatus};

/// The only keys a gesture bridge can press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalAction {
    Back,
    Home,
    Recents,
}

impl GlobalAction {
    pub fn from_key_code(code: i32) -> Option<Self> {
        match code {
            KEYCODE_BACK => Some(GlobalAction::Back),
            KEYCODE_HOME => Some(GlobalAction::Home),
            KEYCODE_APP_SWITCH => Some(GlobalAction::Recents),
            _ => None,
        }
    }
}

/// Device-side accessibility service connection.
#[async_trait]
pub trait GestureBridge: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn tap(&self, x: i32, y: i32) -> PilotResult<()>;
    async fn long_press(&self, x: i32, y: i32, duration_ms: u64) -> PilotResult<()>;
    async fn swipe(&self, from: (i32, i32), to: (i32, i32), duration_ms: u64) -> PilotResult<()>;
    /// Replaces the text of the focused editable node.
    async fn set_text(&self, text: &str) -> PilotResult<()>;
    async fn global_action(&self, action: GlobalAction) -> PilotResult<()>;
    async fn launch_app(&self, app_id: &str) -> PilotResult<()>;
    async fn foreground_package(&self) -> Option<String>;
}

pub struct GestureBackend {
    bridge: Arc<dyn GestureBridge>,
    monitor: ConnectionMonitor,
    delays: SettleDelays,
}

impl GestureBackend {
    pub fn new(bridge: Arc<dyn GestureBridge>) -> Self {
        Self {
            bridge,
            monitor: ConnectionMonitor::new("gesture"),
            delays: SettleDelays::gesture(),
        }
    }

    pub fn with_delays(mut self, delays: SettleDelays) -> Self {
        self.delays = delays;
        self
    }

    async fn dispatch(&self, action: &Action) -> ActionResult {
        match action {
            Action::Click { x, y } => match self.bridge.tap(*x, *y).await {
                Ok(()) => {
                    settle(self.delays.tap).await;
                    ActionResult::success(format!("Tapped ({x}, {y})"))
                }
                Err(e) => ActionResult::failure(format!(
                    "Gesture tap failed: {e}. Ensure the target element is visible."
                )),
            },
            Action::LongClick { x, y, duration_ms } => {
                match self.bridge.long_press(*x, *y, non_negative_ms(*duration_ms)).await {
                    Ok(()) => {
                        settle(self.delays.tap).await;
                        ActionResult::success(format!("Long press executed at ({x}, {y})"))
                    }
                    Err(e) => ActionResult::failure(format!("Gesture long press failed: {e}")),
                }
            }
            Action::Swipe {
                from_x,
                from_y,
                to_x,
                to_y,
                duration_ms,
            } => {
                let res = self
                    .bridge
                    .swipe((*from_x, *from_y), (*to_x, *to_y), non_negative_ms(*duration_ms))
                    .await;
                match res {
                    Ok(()) => {
                        settle(self.delays.swipe).await;
                        ActionResult::success("Swipe completed")
                    }
                    Err(e) => ActionResult::failure(format!("Gesture swipe failed: {e}")),
                }
            }
            Action::Input { text } => match self.bridge.set_text(text).await {
                Ok(()) => {
                    settle(self.delays.input).await;
                    ActionResult::success("Text input applied")
                }
                Err(e) => ActionResult::failure(format!(
                    "Text input failed: {e}. Focus the text field and try again."
                )),
            },
            Action::PressKey { key_code, key_name } => {
                self.press_key(*key_code, &key_label(*key_code, key_name)).await
            }
            Action::GoBack => self.press_key(KEYCODE_BACK, "Back").await,
            Action::OpenApp { app_id, app_name } => match self.bridge.launch_app(app_id).await {
                Ok(()) => {
                    settle(self.delays.launch).await;
                    let shown = if app_name.trim().is_empty() { app_id } else { app_name };
                    ActionResult::success(format!("Launched {shown}"))
                }
                Err(e) => ActionResult::failure(format!(
                    "Failed to launch {app_id}: {e}. Ensure the app is installed."
                )),
            },
            Action::Wait { duration_ms } => {
                settle(std::time::Duration::from_millis(non_negative_ms(*duration_ms))).await;
                ActionResult::success(format!("Waited {duration_ms}ms"))
            }
            Action::Complete { .. } | Action::Error { .. } | Action::RequestUserHelp { .. } => {
                non_actuating_result(action)
                    .unwrap_or_else(|| ActionResult::failure("Unsupported action"))
            }
        }
    }

    async fn press_key(&self, key_code: i32, label: &str) -> ActionResult {
        let Some(global) = GlobalAction::from_key_code(key_code) else {
            return ActionResult::failure(format!("Unable to simulate key action: {label}"));
        };
        match self.bridge.global_action(global).await {
            Ok(()) => {
                settle(self.delays.key).await;
                ActionResult::success(format!("Executed key action: {label}"))
            }
            Err(e) => {
                tracing::debug!(error = %e, key = key_code, "global action rejected");
                ActionResult::failure(format!("Unable to simulate key action: {label}"))
            }
        }
    }
}

#[async_trait]
impl ControlBackend for GestureBackend {
    fn label(&self) -> &str {
        "gesture"
    }

    fn is_ready(&self) -> bool {
        self.monitor.current().is_ready() && self.bridge.is_connected()
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.monitor.subscribe()
    }

    async fn initialize(&self) -> ConnectionStatus {
        self.monitor.publish(ConnectionStatus::Connecting);
        let status = if self.bridge.is_connected() {
            ConnectionStatus::Ready
        } else {
            ConnectionStatus::Disabled
        };
        self.monitor.publish(status);
        status
    }

    async fn shutdown(&self) {
        self.monitor.publish(ConnectionStatus::Disabled);
    }

    async fn execute(&self, action: &Action) -> ActionResult {
        if !self.is_ready() {
            return ActionResult::failure(
                "Gesture service is not enabled. Enable the accessibility service in system settings.",
            );
        }
        let started = Instant::now();
        tracing::debug!(action = %action.describe(), "gesture dispatch");
        let result = self.dispatch(action).await;
        result.with_elapsed(elapsed_ms(started))
    }

    async fn current_foreground_app(&self) -> PilotResult<String> {
        if !self.is_ready() {
            return Err(PilotError::Backend("gesture service is not enabled".into()));
        }
        match self.bridge.foreground_package().await {
            Some(pkg) if !pkg.trim().is_empty() => Ok(pkg),
            _ => Err(PilotError::Backend(
                "unable to determine the foreground application".into(),
            )),
        }
    }
}
