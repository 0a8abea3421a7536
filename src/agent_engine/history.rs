use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent_engine::state::{Action, ActionResult};
use crate::perception::types::ScreenState;

/// One executed step. Entries are append-only and ordered by `step`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionHistory {
    /// 1-based, strictly increasing within a task.
    pub step: u32,
    pub action: Action,
    pub result: ActionResult,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(skip)]
    pub screen_before: Option<Arc<ScreenState>>,
    #[serde(skip)]
    pub screen_after: Option<Arc<ScreenState>>,
}

impl ActionHistory {
    pub fn new(step: u32, action: Action, result: ActionResult) -> Self {
        Self {
            step,
            action,
            result,
            timestamp: chrono::Utc::now(),
            reasoning: String::new(),
            screen_before: None,
            screen_after: None,
        }
    }

    pub fn with_screen_before(mut self, state: Arc<ScreenState>) -> Self {
        self.screen_before = Some(state);
        self
    }

    /// `[OK] Click (540, 1280) - Tapped (540, 1280)`
    pub fn summary(&self) -> String {
        let desc = match &self.action {
            Action::Input { .. } => "Input text".to_string(),
            Action::OpenApp { app_id, app_name } => {
                if app_name.trim().is_empty() {
                    format!("Open {app_id}")
                } else {
                    format!("Open {app_name}")
                }
            }
            Action::Complete { .. } => "Complete".to_string(),
            Action::Error { .. } => "Error".to_string(),
            other => other.describe(),
        };
        let prefix = if self.result.success { "[OK]" } else { "[X]" };
        format!("{prefix} {desc} - {}", self.result.message)
    }
}

/// The last `n` entries, oldest first.
pub fn recent(history: &[ActionHistory], n: usize) -> &[ActionHistory] {
    &history[history.len().saturating_sub(n)..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_marks_outcome() {
        let ok = ActionHistory::new(1, Action::Click { x: 5, y: 9 }, ActionResult::success("Tapped (5, 9)"));
        assert_eq!(ok.summary(), "[OK] Click (5, 9) - Tapped (5, 9)");

        let failed = ActionHistory::new(
            2,
            Action::Input { text: "secret".into() },
            ActionResult::failure("Text input failed"),
        );
        assert_eq!(failed.summary(), "[X] Input text - Text input failed");
    }

    #[test]
    fn recent_takes_tail() {
        let entries: Vec<ActionHistory> = (1..=5)
            .map(|i| ActionHistory::new(i, Action::GoBack, ActionResult::success("ok")))
            .collect();
        let tail = recent(&entries, 3);
        assert_eq!(tail.iter().map(|e| e.step).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(recent(&entries, 10).len(), 5);
    }

    #[test]
    fn screens_are_not_serialized() {
        let entry = ActionHistory::new(1, Action::GoBack, ActionResult::success("ok"));
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("screen_before").is_none());
        assert_eq!(json["action"]["action"], "go_back");
    }
}
