use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent_engine::history::ActionHistory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn can_resume(&self) -> bool {
        matches!(self, TaskStatus::Paused)
    }
}

/// A user task and everything that happened while running it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_step: u32,
    pub history: Vec<ActionHistory>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub plan: Option<TodoList>,
    /// Set when the run stopped to ask the user for confirmation.
    #[serde(default)]
    pub awaiting_confirmation: bool,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            current_step: 0,
            history: Vec::new(),
            result: None,
            error: None,
            plan: None,
            awaiting_confirmation: false,
        }
    }

    pub fn duration_ms(&self, now: DateTime<Utc>) -> i64 {
        let start = self.started_at.unwrap_or(self.created_at);
        let end = self.completed_at.unwrap_or(now);
        (end - start).num_milliseconds().max(0)
    }

    /// Plan progress in [0, 1]; zero without a plan.
    pub fn progress(&self) -> f32 {
        self.plan.as_ref().map(TodoList::progress).unwrap_or(0.0)
    }

    /// Appends a step. Steps must arrive in increasing order.
    pub fn record(&mut self, entry: ActionHistory) {
        debug_assert!(self.history.last().map_or(true, |last| last.step < entry.step));
        self.current_step = self.current_step.max(entry.step);
        self.history.push(entry);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoStep {
    pub description: String,
    #[serde(default)]
    pub expected_result: String,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub is_key_step: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TodoStep {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            expected_result: String::new(),
            is_completed: false,
            is_key_step: false,
            completed_at: None,
        }
    }
}

/// Optional decomposition of a task. Every step below `current_step_index` is completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoList {
    pub steps: Vec<TodoStep>,
    pub current_step_index: usize,
}

impl TodoList {
    pub fn new(steps: Vec<TodoStep>) -> Self {
        Self {
            steps,
            current_step_index: 0,
        }
    }

    pub fn current_step(&self) -> Option<&TodoStep> {
        self.steps.get(self.current_step_index)
    }

    pub fn progress(&self) -> f32 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let done = self.steps.iter().filter(|s| s.is_completed).count();
        done as f32 / self.steps.len() as f32
    }

    /// No-op once every step is done.
    pub fn mark_current_step_completed(&mut self) {
        let Some(step) = self.steps.get_mut(self.current_step_index) else {
            return;
        };
        step.is_completed = true;
        step.completed_at = Some(Utc::now());
        self.current_step_index += 1;
    }

    pub fn is_all_completed(&self) -> bool {
        self.steps.iter().all(|s| s.is_completed)
    }
}
