use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::agent_engine::state::{Action, ActionResult};
use crate::errors::PilotResult;
use crate::executor::status::ConnectionStatus;

pub const KEYCODE_HOME: i32 = 3;
pub const KEYCODE_BACK: i32 = 4;
pub const KEYCODE_APP_SWITCH: i32 = 187;

/// Uniform actuation capability. Implementations report actuation failures as
/// `ActionResult { success: false, .. }` and never panic or bubble them as errors.
#[async_trait]
pub trait ControlBackend: Send + Sync {
    fn label(&self) -> &str;

    fn is_ready(&self) -> bool;

    fn status(&self) -> watch::Receiver<ConnectionStatus>;

    /// Establishes the device connection and publishes the resulting status.
    async fn initialize(&self) -> ConnectionStatus;

    async fn shutdown(&self);

    /// Dispatches the action and waits out its settle delay before returning.
    async fn execute(&self, action: &Action) -> ActionResult;

    async fn current_foreground_app(&self) -> PilotResult<String>;
}

/// Post-dispatch delays, giving the UI time to react before the next perception cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
    pub tap: Duration,
    pub swipe: Duration,
    pub input: Duration,
    pub key: Duration,
    pub launch: Duration,
}

impl SettleDelays {
    pub fn gesture() -> Self {
        let action = Duration::from_millis(360);
        Self {
            tap: action,
            swipe: action,
            input: action,
            key: action,
            launch: Duration::from_millis(2_000),
        }
    }

    pub fn shell() -> Self {
        Self {
            tap: Duration::from_millis(300),
            swipe: Duration::from_millis(500),
            input: Duration::from_millis(320),
            key: Duration::from_millis(200),
            launch: Duration::from_millis(2_000),
        }
    }

    pub fn none() -> Self {
        Self {
            tap: Duration::ZERO,
            swipe: Duration::ZERO,
            input: Duration::ZERO,
            key: Duration::ZERO,
            launch: Duration::ZERO,
        }
    }
}

pub(crate) async fn settle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

pub(crate) fn non_negative_ms(ms: i64) -> u64 {
    ms.max(0) as u64
}

/// Results for the variants that never touch the device.
pub(crate) fn non_actuating_result(action: &Action) -> Option<ActionResult> {
    match action {
        Action::Complete { message } => {
            let message = if message.trim().is_empty() {
                "Task completed".to_string()
            } else {
                message.clone()
            };
            Some(ActionResult::success(message))
        }
        Action::Error {
            message,
            recoverable,
        } => Some(ActionResult::failure(message.clone()).with_confirmation(!recoverable)),
        Action::RequestUserHelp { reason } => Some(
            ActionResult::failure(format!("Manual help required: {reason}")).with_confirmation(true),
        ),
        _ => None,
    }
}

pub(crate) fn key_label(key_code: i32, key_name: &str) -> String {
    if key_name.trim().is_empty() {
        format!("keyCode={key_code}")
    } else {
        key_name.to_string()
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
