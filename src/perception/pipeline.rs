//! Perception aggregator: one screenshot plus one UI tree become one `ScreenState`.
use std::fmt::Write as _;
use std::sync::Arc;

use crate::config::PerceptionConfig;
use crate::errors::{PilotError, PilotResult};
use crate::perception::traits::{ScreenCapture, ViewTreeReader};
use crate::perception::types::{ElementKind, ScreenState, UiElement, ViewNode};

pub struct PerceptionAggregator {
    capture: Arc<dyn ScreenCapture>,
    tree_reader: Arc<dyn ViewTreeReader>,
    config: PerceptionConfig,
}

impl PerceptionAggregator {
    pub fn new(
        capture: Arc<dyn ScreenCapture>,
        tree_reader: Arc<dyn ViewTreeReader>,
        config: PerceptionConfig,
    ) -> Self {
        Self {
            capture,
            tree_reader,
            config,
        }
    }

    /// Captures the screen and reads the UI tree. Either failing fails the whole
    /// snapshot; no partial state is returned.
    pub async fn capture(&self, foreground_app: &str) -> PilotResult<ScreenState> {
        tracing::debug!(app = %foreground_app, "perception cycle started");

        let image = self.capture.capture().await.map_err(into_perception)?;
        let ui_tree = self.tree_reader.read().await.map_err(into_perception)?;
        let image_encoded = self
            .capture
            .encode(&image, self.config.max_image_kb)
            .map_err(into_perception)?;

        let elements = flatten_elements(&ui_tree);
        let extracted_text = ui_tree.collect_text();
        let description = describe(
            &elements,
            &extracted_text,
            self.config.max_text_lines,
            self.config.max_clickable_elements,
        );

        tracing::info!(
            app = %foreground_app,
            nodes = ui_tree.node_count(),
            elements = elements.len(),
            texts = extracted_text.len(),
            "screen state ready"
        );

        Ok(ScreenState {
            width: image.width,
            height: image.height,
            image: Arc::new(image),
            image_encoded,
            foreground_app: foreground_app.to_string(),
            ui_tree,
            elements,
            extracted_text,
            description,
            timestamp: chrono::Utc::now(),
        })
    }
}

fn into_perception(err: PilotError) -> PilotError {
    match err {
        PilotError::Perception(_) => err,
        other => PilotError::Perception(other.to_string()),
    }
}

/// Whether a node earns a place in the flat element list.
pub fn should_include(node: &ViewNode) -> bool {
    (node.clickable && node.enabled)
        || !node.text.trim().is_empty()
        || !node.accessibility_label.trim().is_empty()
        || node.editable
}

/// Depth-first flatten. Ids start at 1 and follow traversal order.
pub fn flatten_elements(root: &ViewNode) -> Vec<UiElement> {
    let mut elements = Vec::new();
    root.walk(&mut |node| {
        if !should_include(node) {
            return;
        }
        elements.push(UiElement {
            id: elements.len() as u32 + 1,
            kind: ElementKind::classify(node),
            text: node.text.clone(),
            accessibility_label: node.accessibility_label.clone(),
            identifier: node.identifier.clone(),
            bounds: node.bounds,
            clickable: node.clickable,
            enabled: node.enabled,
            scrollable: node.scrollable,
            editable: node.editable,
        });
    });
    elements
}

/// Bounded digest for the prompt. Lossy by construction.
pub fn describe(
    elements: &[UiElement],
    texts: &[String],
    max_text_lines: usize,
    max_clickable: usize,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Screen overview ===");
    let _ = writeln!(out, "Elements: {}", elements.len());
    let _ = writeln!(out, "Text fragments: {}", texts.len());

    let texts: Vec<&String> = texts.iter().filter(|t| !t.trim().is_empty()).collect();
    if !texts.is_empty() {
        let _ = writeln!(out, "\n=== Screen text ===");
        for text in texts.iter().take(max_text_lines) {
            let _ = writeln!(out, "• {text}");
        }
        if texts.len() > max_text_lines {
            let _ = writeln!(out, "• … {} more lines omitted", texts.len() - max_text_lines);
        }
    }

    let clickable: Vec<&UiElement> = elements.iter().filter(|e| e.is_actionable()).collect();
    if !clickable.is_empty() {
        let _ = writeln!(out, "\n=== Clickable elements ===");
        for element in clickable.iter().take(max_clickable) {
            let (x, y) = element.center();
            let _ = writeln!(
                out,
                "• [{}] {} @ ({x}, {y})",
                element.kind.as_str(),
                element.display_label()
            );
        }
        if clickable.len() > max_clickable {
            let _ = writeln!(out, "• … {} more elements omitted", clickable.len() - max_clickable);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::{RawImage, Rect};
    use async_trait::async_trait;

    fn node(kind: &str, text: &str, clickable: bool) -> ViewNode {
        ViewNode {
            kind: kind.into(),
            text: text.into(),
            clickable,
            enabled: true,
            bounds: Rect::new(0, 0, 100, 50),
            ..Default::default()
        }
    }

    fn sample_tree() -> ViewNode {
        let mut root = node("android.widget.FrameLayout", "", false);
        let mut list = node("androidx.recyclerview.widget.RecyclerView", "", false);
        list.scrollable = true;
        list.children = vec![
            node("android.widget.TextView", "Network", true),
            node("android.widget.TextView", "", false),
            node("android.widget.Button", "", true),
        ];
        let mut input = node("android.widget.EditText", "", false);
        input.editable = true;
        root.children = vec![list, input];
        root
    }

    #[test]
    fn flatten_respects_inclusion_predicate() {
        let tree = sample_tree();
        let elements = flatten_elements(&tree);
        assert!(elements.len() <= tree.node_count());
        assert_eq!(elements.len(), 3);
        assert_eq!(elements.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(elements[0].kind, ElementKind::Text);
        assert_eq!(elements[1].kind, ElementKind::Button);
        assert_eq!(elements[2].kind, ElementKind::Input);
    }

    #[test]
    fn description_is_bounded() {
        let elements: Vec<UiElement> = (0..30)
            .map(|i| UiElement {
                id: i + 1,
                kind: ElementKind::Button,
                text: format!("b{i}"),
                accessibility_label: String::new(),
                identifier: String::new(),
                bounds: Rect::new(0, 0, 10, 10),
                clickable: true,
                enabled: true,
                scrollable: false,
                editable: false,
            })
            .collect();
        let texts: Vec<String> = (0..25).map(|i| format!("line {i}")).collect();
        let digest = describe(&elements, &texts, 20, 15);
        assert!(digest.contains("5 more lines omitted"));
        assert!(digest.contains("15 more elements omitted"));
        assert!(!digest.contains("line 20"));
    }

    struct FixedCapture {
        fail: bool,
    }

    #[async_trait]
    impl ScreenCapture for FixedCapture {
        async fn capture(&self) -> PilotResult<RawImage> {
            if self.fail {
                return Err(PilotError::Shell("device offline".into()));
            }
            Ok(RawImage {
                width: 4,
                height: 4,
                pixels: vec![255; 64],
            })
        }
    }

    struct FixedTree;

    #[async_trait]
    impl ViewTreeReader for FixedTree {
        async fn read(&self) -> PilotResult<ViewNode> {
            Ok(sample_tree())
        }
    }

    #[tokio::test]
    async fn capture_builds_full_state() {
        let aggregator = PerceptionAggregator::new(
            Arc::new(FixedCapture { fail: false }),
            Arc::new(FixedTree),
            PerceptionConfig::default(),
        );
        let state = aggregator.capture("com.android.settings").await.unwrap();
        assert_eq!((state.width, state.height), (4, 4));
        assert_eq!(state.foreground_app, "com.android.settings");
        assert_eq!(state.elements.len(), 3);
        assert_eq!(state.extracted_text, vec!["Network".to_string()]);
        assert!(!state.image_encoded.is_empty());
    }

    #[tokio::test]
    async fn capture_failure_is_a_perception_error() {
        let aggregator = PerceptionAggregator::new(
            Arc::new(FixedCapture { fail: true }),
            Arc::new(FixedTree),
            PerceptionConfig::default(),
        );
        let err = aggregator.capture("x").await.unwrap_err();
        assert!(matches!(err, PilotError::Perception(ref m) if m.contains("device offline")));
    }
}
