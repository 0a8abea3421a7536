//! The step loop: perceive, gate the screen, decide, gate the action, execute,
//! record. Step-level infra failures are retried with a fixed delay; actuation
//! failures are only recorded so the next decision can see them.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};

use crate::agent_engine::event_bus::{EngineEvent, EventBus};
use crate::agent_engine::history::ActionHistory;
use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::state::{Action, ActionResult, EngineState};
use crate::config::EngineConfig;
use crate::decision::gateway::DecisionGateway;
use crate::errors::{PilotError, PilotResult};
use crate::executor::router::BackendRouter;
use crate::executor::safety::SafetyGate;
use crate::perception::pipeline::PerceptionAggregator;

const UNKNOWN_APP: &str = "unknown";

/// Cloneable handle that asks a running engine to stop at the next step boundary.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What one step produced.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// An action went through the backend (or was blocked at action level) and was recorded.
    Recorded(ActionHistory),
    /// The screen itself was blocked; nothing was decided or recorded.
    ScreenBlocked(ActionResult),
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(String),
    NeedsConfirmation(String),
    Stopped,
}

pub struct ExecutionEngine {
    perception: PerceptionAggregator,
    gateway: DecisionGateway,
    safety: SafetyGate,
    router: Arc<BackendRouter>,
    config: EngineConfig,
    halt_on_caution: bool,
    stop: StopHandle,
    state: watch::Sender<EngineState>,
    events: EventBus,
    run_lock: Mutex<()>,
}

impl ExecutionEngine {
    pub fn new(
        perception: PerceptionAggregator,
        gateway: DecisionGateway,
        safety: SafetyGate,
        router: Arc<BackendRouter>,
        config: EngineConfig,
        halt_on_caution: bool,
    ) -> Self {
        let (state, _rx) = watch::channel(EngineState::Idle);
        Self {
            perception,
            gateway,
            safety,
            router,
            config,
            halt_on_caution,
            stop: StopHandle::default(),
            state,
            events: EventBus::default(),
            run_lock: Mutex::new(()),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: EngineState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "engine state");
            self.events.publish(EngineEvent::StateChanged { state });
        }
    }

    /// Runs a task until it completes, needs confirmation, is stopped, or fails.
    /// `prior` seeds the history so a resumed task keeps its step numbering.
    ///
    /// A stop requested before the run starts is honoured at the first step
    /// boundary. The flag is cleared when the run ends.
    pub async fn run_task<F>(
        &self,
        description: &str,
        prior: Vec<ActionHistory>,
        mut on_progress: F,
    ) -> PilotResult<RunOutcome>
    where
        F: FnMut(&ActionHistory) + Send,
    {
        let _guard = self.run_lock.try_lock().map_err(|_| PilotError::Busy)?;
        self.set_state(EngineState::Stepping);
        tracing::info!(task = %description, resumed_steps = prior.len(), "task run started");

        let outcome = self.drive(description, prior, &mut on_progress).await;

        self.stop.clear();
        self.set_state(EngineState::Stopped);
        match &outcome {
            Ok(o) => tracing::info!(outcome = ?o, "task run finished"),
            Err(e) => tracing::error!(error = %e, "task run failed"),
        }
        outcome
    }

    async fn drive<F>(
        &self,
        description: &str,
        mut history: Vec<ActionHistory>,
        on_progress: &mut F,
    ) -> PilotResult<RunOutcome>
    where
        F: FnMut(&ActionHistory) + Send,
    {
        let mut ctl = LoopController::new(&self.config);
        let retry_delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            if self.stop.is_stop_requested() {
                tracing::info!("stop requested; leaving loop at step boundary");
                return Ok(RunOutcome::Stopped);
            }

            let step = history.last().map_or(1, |h| h.step + 1);
            let outcome = match self.execute_step(description, step, &history).await {
                Ok(outcome) => {
                    ctl.record_success();
                    outcome
                }
                Err(e) if e.is_retryable() => {
                    let exhausted = ctl.record_failure();
                    tracing::warn!(
                        step,
                        attempt = ctl.failed_attempts(),
                        error = %e,
                        "step failed"
                    );
                    if exhausted {
                        return Err(e);
                    }
                    self.events.publish(EngineEvent::StepRetrying {
                        step,
                        attempt: ctl.failed_attempts(),
                        error: e.to_string(),
                    });
                    tokio::time::sleep(retry_delay).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let entry = match outcome {
                StepOutcome::ScreenBlocked(result) => {
                    return Ok(RunOutcome::NeedsConfirmation(format!(
                        "Needs user confirmation: {}",
                        result.message
                    )));
                }
                StepOutcome::Recorded(entry) => entry,
            };
            on_progress(&entry);
            history.push(entry);

            let Some(last) = history.last() else {
                continue;
            };
            match &last.action {
                Action::Complete { .. } if last.result.success => {
                    return Ok(RunOutcome::Completed(last.result.message.clone()));
                }
                Action::Error { message, .. } => {
                    return Err(PilotError::ModelReported(message.clone()));
                }
                _ => {}
            }
            if last.result.needs_user_confirmation {
                return Ok(RunOutcome::NeedsConfirmation(format!(
                    "Needs user confirmation: {}",
                    last.result.message
                )));
            }
            if ctl.is_stuck(&history) {
                return Err(PilotError::StuckDetected(ctl.stuck_window()));
            }
            if ctl.step_limit_reached(last.step) {
                return Err(PilotError::StepLimitReached(ctl.max_steps()));
            }
        }
    }

    /// Runs exactly one step, without retry, outside a task run.
    pub async fn execute_single_step(
        &self,
        description: &str,
        step: u32,
        history: &[ActionHistory],
    ) -> PilotResult<StepOutcome> {
        let _guard = self.run_lock.try_lock().map_err(|_| PilotError::Busy)?;
        self.set_state(EngineState::Stepping);
        let outcome = self.execute_step(description, step, history).await;
        self.set_state(EngineState::Stopped);
        outcome
    }

    /// One pass through the pipeline. `step` is the number the resulting
    /// history entry gets.
    async fn execute_step(
        &self,
        description: &str,
        step: u32,
        history: &[ActionHistory],
    ) -> PilotResult<StepOutcome> {
        self.events.publish(EngineEvent::StepStarted { step });
        let backend = self.router.active();

        let foreground = match backend.current_foreground_app().await {
            Ok(app) => app,
            Err(e) => {
                tracing::warn!(error = %e, "foreground app unknown");
                UNKNOWN_APP.to_string()
            }
        };

        let screen = Arc::new(self.perception.capture(&foreground).await?);

        let screen_verdict = self.safety.check_state(&screen);
        if screen_verdict.should_block {
            tracing::warn!(step, reason = %screen_verdict.reason, "screen blocked by safety gate");
            self.events.publish(EngineEvent::SafetyFlagged {
                step,
                verdict: screen_verdict.clone(),
            });
            return Ok(StepOutcome::ScreenBlocked(
                ActionResult::failure(screen_verdict.reason).with_confirmation(true),
            ));
        }
        if screen_verdict.needs_confirmation {
            self.events.publish(EngineEvent::SafetyFlagged {
                step,
                verdict: screen_verdict.clone(),
            });
        }

        let action = self.gateway.decide(description, &screen, history).await?;

        let action_verdict = self.safety.check_action(&action, &screen);
        let result = if action_verdict.should_block {
            tracing::warn!(step, action = action.kind(), reason = %action_verdict.reason, "action blocked");
            ActionResult::failure(action_verdict.reason).with_confirmation(true)
        } else {
            let result = backend.execute(&action).await;
            let flagged = self.halt_on_caution && screen_verdict.needs_confirmation;
            if flagged && !result.needs_user_confirmation {
                let reason = screen_verdict.reason;
                result.with_confirmation(true).with_note(&reason)
            } else {
                result
            }
        };

        tracing::info!(
            step,
            backend = backend.label(),
            action = %action.describe(),
            success = result.success,
            elapsed_ms = result.execution_time_ms,
            "step executed"
        );

        let entry = ActionHistory::new(step, action, result).with_screen_before(screen);
        self.events.publish(EngineEvent::StepRecorded {
            entry: entry.clone(),
        });
        Ok(StepOutcome::Recorded(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_handle_is_shared_between_clones() {
        let handle = StopHandle::default();
        let other = handle.clone();
        assert!(!other.is_stop_requested());
        handle.request_stop();
        assert!(other.is_stop_requested());
        other.clear();
        assert!(!handle.is_stop_requested());
    }
}
