use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use tokio::sync::{watch, Mutex};

use crate::agent_engine::engine::{ExecutionEngine, RunOutcome, StepOutcome};
use crate::agent_engine::event_bus::{EngineEvent, EventBus};
use crate::agent_engine::history::ActionHistory;
use crate::agent_engine::task::{Task, TaskStatus};
use crate::errors::{PilotError, PilotResult};

const COMPLEX_TASK_KEYWORDS: &[&str] = &["并且", "然后", "接着", "之后", "最后", "搜索", "找到", "截图"];
const COMPLEX_TASK_MIN_CHARS: usize = 20;

/// Owns the current `Task` record and drives it through the engine.
///
/// The current task is published through a watch channel; the manager is its
/// only writer. Finished tasks are kept in memory until `clear_history`.
pub struct TaskManager {
    engine: Arc<ExecutionEngine>,
    current: watch::Sender<Option<Task>>,
    finished: StdMutex<Vec<Task>>,
    events: EventBus,
    run_lock: Mutex<()>,
}

impl TaskManager {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        let (current, _rx) = watch::channel(None);
        let events = engine.events();
        Self {
            engine,
            current,
            finished: StdMutex::new(Vec::new()),
            events,
            run_lock: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn current_task(&self) -> Option<Task> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Task>> {
        self.current.subscribe()
    }

    /// Runs `description` as a new task and returns the task as it ended.
    /// Only `Busy` is returned as an error; run failures land in `Task::error`.
    pub async fn execute_task(&self, description: &str) -> PilotResult<Task> {
        let _guard = self.run_lock.try_lock().map_err(|_| PilotError::Busy)?;

        let mut task = Task::new(description);
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        tracing::info!(task_id = %task.id, description, "task started");
        self.engine.stop_handle().clear();
        self.publish(task);

        let outcome = self.run(description, Vec::new()).await;
        Ok(self.finish(outcome))
    }

    /// Moves a paused task back to `Running` and continues it with its
    /// existing history.
    pub async fn resume(&self) -> PilotResult<Task> {
        let _guard = self.run_lock.try_lock().map_err(|_| PilotError::Busy)?;

        let mut task = self
            .current_task()
            .ok_or_else(|| PilotError::InvalidState("no task to resume".into()))?;
        if !task.status.can_resume() {
            return Err(PilotError::InvalidState(format!(
                "task {} is {:?}, not paused",
                task.id, task.status
            )));
        }
        task.status = TaskStatus::Running;
        task.completed_at = None;
        let description = task.description.clone();
        let prior = task.history.clone();
        tracing::info!(task_id = %task.id, from_step = task.current_step, "task resumed");
        self.engine.stop_handle().clear();
        self.publish(task);

        let outcome = self.run(&description, prior).await;
        Ok(self.finish(outcome))
    }

    /// Runs one engine step and records it as a one-step task.
    pub async fn execute_single_step(&self, description: &str) -> PilotResult<Task> {
        let _guard = self.run_lock.try_lock().map_err(|_| PilotError::Busy)?;

        let mut task = Task::new(description);
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        self.publish(task.clone());

        match self.engine.execute_single_step(description, 1, &[]).await {
            Ok(StepOutcome::Recorded(entry)) => {
                if entry.result.success {
                    task.status = TaskStatus::Completed;
                    task.result = Some(entry.result.message.clone());
                } else {
                    task.status = TaskStatus::Failed;
                    task.error = Some(entry.result.message.clone());
                }
                task.awaiting_confirmation = entry.result.needs_user_confirmation;
                task.record(entry);
            }
            Ok(StepOutcome::ScreenBlocked(result)) => {
                task.status = TaskStatus::Completed;
                task.result = Some(format!("Needs user confirmation: {}", result.message));
                task.awaiting_confirmation = true;
            }
            Err(PilotError::Busy) => return Err(PilotError::Busy),
            Err(e) => {
                tracing::warn!(error = %e, "single step failed");
                task.status = TaskStatus::Failed;
                task.error = Some(e.to_string());
            }
        }
        task.completed_at = Some(Utc::now());
        self.publish(task.clone());
        self.archive(task.clone());
        Ok(task)
    }

    /// Marks a running task `Paused`; the engine stops after the current step.
    pub fn pause(&self) {
        let paused = self.current.send_if_modified(|slot| match slot {
            Some(task) if task.status == TaskStatus::Running => {
                task.status = TaskStatus::Paused;
                true
            }
            _ => false,
        });
        if paused {
            self.engine.stop_handle().request_stop();
            self.announce();
            tracing::info!("task paused");
        }
    }

    /// Marks the current task `Cancelled` and stops the engine before its next step.
    pub fn cancel(&self) {
        let cancelled = self.current.send_if_modified(|slot| match slot {
            Some(task) if !task.status.is_terminal() => {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        });
        if cancelled {
            self.engine.stop_handle().request_stop();
            self.announce();
            tracing::info!("task cancelled");
        }
    }

    /// Finished tasks, oldest first.
    pub fn history(&self) -> Vec<Task> {
        self.finished
            .lock()
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    pub fn clear_history(&self) {
        if let Ok(mut list) = self.finished.lock() {
            list.clear();
        }
        tracing::debug!("task history cleared");
    }

    /// Heuristic for tasks that would benefit from a plan: sequencing or search
    /// words, or a long description.
    pub fn is_complex_task(description: &str) -> bool {
        COMPLEX_TASK_KEYWORDS.iter().any(|k| description.contains(k))
            || description.chars().count() > COMPLEX_TASK_MIN_CHARS
    }

    async fn run(&self, description: &str, prior: Vec<ActionHistory>) -> PilotResult<RunOutcome> {
        self.engine
            .run_task(description, prior, |entry| {
                let recorded = self.current.send_if_modified(|slot| match slot {
                    Some(task) => {
                        task.record(entry.clone());
                        true
                    }
                    None => false,
                });
                if recorded {
                    tracing::debug!(step = entry.step, action = entry.action.kind(), "task progress");
                    self.announce();
                }
            })
            .await
    }

    /// Applies the run's outcome. A cancelled task stays cancelled; a paused
    /// task stays paused only if the run actually stopped early.
    fn finish(&self, outcome: PilotResult<RunOutcome>) -> Task {
        let mut snapshot = None;
        self.current.send_modify(|slot| {
            let Some(task) = slot.as_mut() else {
                return;
            };
            let keep_status = match task.status {
                TaskStatus::Cancelled => true,
                TaskStatus::Paused => matches!(outcome, Ok(RunOutcome::Stopped)),
                _ => false,
            };
            if !keep_status {
                match outcome {
                    Ok(RunOutcome::Completed(message)) => {
                        task.status = TaskStatus::Completed;
                        task.result = Some(message);
                    }
                    Ok(RunOutcome::NeedsConfirmation(message)) => {
                        task.status = TaskStatus::Completed;
                        task.result = Some(message);
                        task.awaiting_confirmation = true;
                    }
                    Ok(RunOutcome::Stopped) => {
                        task.status = TaskStatus::Cancelled;
                    }
                    Err(e) => {
                        task.status = TaskStatus::Failed;
                        task.error = Some(e.to_string());
                    }
                }
            }
            if task.status.is_terminal() && task.completed_at.is_none() {
                task.completed_at = Some(Utc::now());
            }
            snapshot = Some(task.clone());
        });

        let task = snapshot.unwrap_or_else(|| Task::new(""));
        tracing::info!(
            task_id = %task.id,
            status = ?task.status,
            steps = task.current_step,
            "task finished"
        );
        self.announce();
        if task.status.is_terminal() {
            self.archive(task.clone());
        }
        task
    }

    fn publish(&self, task: Task) {
        self.current.send_replace(Some(task));
        self.announce();
    }

    fn announce(&self) {
        if let Some(task) = self.current_task() {
            self.events.publish(EngineEvent::TaskUpdated { task });
        }
    }

    fn archive(&self, task: Task) {
        if let Ok(mut list) = self.finished.lock() {
            list.push(task);
        }
    }
}
