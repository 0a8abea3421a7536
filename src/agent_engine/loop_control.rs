use crate::agent_engine::history::ActionHistory;
use crate::config::EngineConfig;

/// Step-limit, retry-budget and stuck bookkeeping for one run.
pub struct LoopController {
    max_steps: u32,
    max_attempts: u32,
    stuck_window: usize,
    failed_attempts: u32,
}

impl LoopController {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_steps: config.max_steps.max(1),
            max_attempts: config.max_attempts.max(1),
            stuck_window: config.stuck_window.max(2),
            failed_attempts: 0,
        }
    }

    /// Counts a failed attempt of the current step. Returns true once the budget is spent.
    pub fn record_failure(&mut self) -> bool {
        self.failed_attempts += 1;
        self.failed_attempts >= self.max_attempts
    }

    pub fn record_success(&mut self) {
        self.failed_attempts = 0;
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn stuck_window(&self) -> usize {
        self.stuck_window
    }

    pub fn step_limit_reached(&self, executed_steps: u32) -> bool {
        executed_steps >= self.max_steps
    }

    /// True when the last `stuck_window` entries all share one action kind.
    pub fn is_stuck(&self, history: &[ActionHistory]) -> bool {
        if history.len() < self.stuck_window {
            return false;
        }
        let tail = &history[history.len() - self.stuck_window..];
        let first = &tail[0].action;
        tail.iter().all(|entry| entry.action.same_kind(first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::state::{Action, ActionResult};

    fn entries(actions: Vec<Action>) -> Vec<ActionHistory> {
        actions
            .into_iter()
            .enumerate()
            .map(|(i, a)| ActionHistory::new(i as u32 + 1, a, ActionResult::success("ok")))
            .collect()
    }

    #[test]
    fn five_clicks_are_stuck() {
        let ctl = LoopController::new(&EngineConfig::default());
        let clicks = entries((0..5).map(|i| Action::Click { x: i * 10, y: i }).collect());
        assert!(ctl.is_stuck(&clicks));
        assert!(!ctl.is_stuck(&clicks[..4]));
    }

    #[test]
    fn trailing_swipe_breaks_the_streak() {
        let ctl = LoopController::new(&EngineConfig::default());
        let mut actions: Vec<Action> = (0..4).map(|i| Action::Click { x: i, y: i }).collect();
        actions.push(Action::Swipe {
            from_x: 0,
            from_y: 900,
            to_x: 0,
            to_y: 100,
            duration_ms: 300,
        });
        assert!(!ctl.is_stuck(&entries(actions)));
    }

    #[test]
    fn retry_budget_resets_on_success() {
        let mut ctl = LoopController::new(&EngineConfig::default());
        assert!(!ctl.record_failure());
        assert!(!ctl.record_failure());
        ctl.record_success();
        assert_eq!(ctl.failed_attempts(), 0);
        assert!(!ctl.record_failure());
        assert!(!ctl.record_failure());
        assert!(ctl.record_failure());
    }

    #[test]
    fn step_limit() {
        let ctl = LoopController::new(&EngineConfig::default());
        assert!(!ctl.step_limit_reached(29));
        assert!(ctl.step_limit_reached(30));
    }
}
