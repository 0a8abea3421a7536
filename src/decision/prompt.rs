use std::fmt::Write as _;

use crate::agent_engine::history::{recent, ActionHistory};
use crate::config::PromptConfig;
use crate::perception::types::ScreenState;

const SYSTEM_PROMPT: &str = r#"You are an Android automation assistant. You read a screenshot and the UI element list of the current screen and choose the single safest, most efficient next operation toward the user's task.

## Output format
Reply with exactly one JSON object and nothing else. Example:
```json
{"action":"click","x":540,"y":1280}
```

## Operations
1. Tap: {"action":"click","x":540,"y":1280}
2. Long press: {"action":"long_click","x":540,"y":1280,"duration":800}
3. Swipe: {"action":"swipe","from_x":500,"from_y":1500,"to_x":500,"to_y":600,"duration":300}
4. Type text: {"action":"input","text":"content"} (tap the input field first)
5. Press key: {"action":"press_key","key_code":4} (back=4, home=3, recents=187)
6. Launch app: {"action":"open_app","package":"com.android.settings"}
7. Wait: {"action":"wait","duration":1500} (let the screen load)
8. Back: {"action":"go_back"}
9. Task done: {"action":"complete","message":"what was achieved"}
10. Cannot continue: {"action":"error","message":"why"}
11. Needs a human: {"action":"request_user_help","reason":"why"}

## Rules
- Read the elements, screen text and recent operations carefully.
- One operation per reply; tap a field before typing into it.
- Coordinates must lie on screen; prefer the center of a labelled element.
- Handle permission dialogs and security prompts first.
- When the task is finished or needs a person, use complete, error or request_user_help."#;

/// Builds the system and user instructions for one decision call.
pub struct PromptBuilder {
    limits: PromptConfig,
}

impl PromptBuilder {
    pub fn new(limits: PromptConfig) -> Self {
        Self { limits }
    }

    pub fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    pub fn user_prompt(&self, task: &str, state: &ScreenState, history: &[ActionHistory]) -> String {
        let max_elements = self.limits.max_elements;
        let max_texts = self.limits.max_text_lines;
        let mut out = String::new();

        let _ = writeln!(out, "## Task\n{}\n", task.trim());

        let _ = writeln!(out, "## Screen");
        let _ = writeln!(out, "Foreground app: {}", state.foreground_app);
        let _ = writeln!(out, "Screen size: {} x {}", state.width, state.height);
        let _ = writeln!(out, "The screenshot is attached as an image.\n");

        if !state.description.trim().is_empty() {
            let _ = writeln!(out, "## Overview\n{}\n", state.description.trim());
        }

        if !state.elements.is_empty() {
            let _ = writeln!(out, "## Elements (up to {max_elements})");
            for element in state.elements.iter().take(max_elements) {
                let (x, y) = element.center();
                let tag = if element.is_actionable() { "[clickable]" } else { "" };
                let _ = writeln!(
                    out,
                    "- #{} {tag}[{}] {} @ ({x}, {y})",
                    element.id,
                    element.kind.as_str(),
                    element.display_label()
                );
            }
            if state.elements.len() > max_elements {
                let _ = writeln!(out, "… {} more elements omitted", state.elements.len() - max_elements);
            }
            out.push('\n');
        }

        let texts: Vec<&String> = state
            .extracted_text
            .iter()
            .filter(|t| !t.trim().is_empty())
            .collect();
        if !texts.is_empty() {
            let _ = writeln!(out, "## Screen text (up to {max_texts})");
            for text in texts.iter().take(max_texts) {
                let _ = writeln!(out, "- {text}");
            }
            if texts.len() > max_texts {
                let _ = writeln!(out, "… {} more lines omitted", texts.len() - max_texts);
            }
            out.push('\n');
        }

        let last = recent(history, self.limits.max_history);
        if !last.is_empty() {
            let _ = writeln!(out, "## Recent operations");
            for entry in last {
                let _ = writeln!(out, "- {}", entry.summary());
            }
            out.push('\n');
        }

        let _ = writeln!(
            out,
            "## Instruction\nUsing the screenshot, the elements and the recent operations, reply with one JSON object describing the next operation. No other text."
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::state::{Action, ActionResult};
    use crate::perception::types::{ElementKind, RawImage, Rect, UiElement, ViewNode};
    use std::sync::Arc;

    fn state_with(elements: usize, texts: usize) -> ScreenState {
        ScreenState {
            image: Arc::new(RawImage {
                width: 1,
                height: 1,
                pixels: vec![0; 4],
            }),
            image_encoded: String::new(),
            foreground_app: "com.android.launcher3".into(),
            ui_tree: ViewNode::default(),
            elements: (0..elements)
                .map(|i| UiElement {
                    id: i as u32 + 1,
                    kind: ElementKind::Button,
                    text: format!("item {i}"),
                    accessibility_label: String::new(),
                    identifier: String::new(),
                    bounds: Rect::new(0, 0, 100, 100),
                    clickable: true,
                    enabled: true,
                    scrollable: false,
                    editable: false,
                })
                .collect(),
            extracted_text: (0..texts).map(|i| format!("text {i}")).collect(),
            description: String::new(),
            timestamp: chrono::Utc::now(),
            width: 1080,
            height: 2400,
        }
    }

    #[test]
    fn truncates_with_omission_markers() {
        let builder = PromptBuilder::new(PromptConfig::default());
        let prompt = builder.user_prompt("open settings", &state_with(25, 18), &[]);
        assert!(prompt.contains("open settings"));
        assert!(prompt.contains("Screen size: 1080 x 2400"));
        assert!(prompt.contains("- #20 [clickable][button] item 19 @ (50, 50)"));
        assert!(!prompt.contains("item 20 @"));
        assert!(prompt.contains("… 5 more elements omitted"));
        assert!(prompt.contains("… 3 more lines omitted"));
        assert!(!prompt.contains("## Recent operations"));
    }

    #[test]
    fn includes_only_last_history_entries() {
        let builder = PromptBuilder::new(PromptConfig::default());
        let history: Vec<ActionHistory> = (1..=5)
            .map(|i| {
                ActionHistory::new(
                    i,
                    Action::Click { x: i as i32, y: 0 },
                    ActionResult::failure(format!("miss {i}")),
                )
            })
            .collect();
        let prompt = builder.user_prompt("t", &state_with(0, 0), &history);
        assert!(prompt.contains("[X] Click (5, 0) - miss 5"));
        assert!(prompt.contains("[X] Click (3, 0) - miss 3"));
        assert!(!prompt.contains("miss 2"));
    }

    #[test]
    fn system_prompt_lists_operations() {
        let builder = PromptBuilder::new(PromptConfig::default());
        for op in ["\"click\"", "\"swipe\"", "\"open_app\"", "\"complete\"", "\"request_user_help\""] {
            assert!(builder.system_prompt().contains(op), "{op}");
        }
    }
}
