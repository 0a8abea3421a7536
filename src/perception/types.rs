use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in physical screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Decoded RGBA8 frame as delivered by a `ScreenCapture`.
#[derive(Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for RawImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// One node of the raw UI tree. Children are owned; there are no parent links.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewNode {
    /// Raw platform type name, e.g. `android.widget.Button`.
    pub kind: String,
    pub text: String,
    pub accessibility_label: String,
    pub identifier: String,
    pub bounds: Rect,
    pub clickable: bool,
    pub focusable: bool,
    pub enabled: bool,
    pub checkable: bool,
    pub checked: bool,
    pub scrollable: bool,
    pub editable: bool,
    pub children: Vec<ViewNode>,
}

impl ViewNode {
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(ViewNode::node_count).sum::<usize>()
    }

    pub fn find_clickable(&self) -> Vec<&ViewNode> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if node.clickable && node.enabled {
                out.push(node);
            }
        });
        out
    }

    /// Case-insensitive substring search over text and accessibility label.
    pub fn find_by_text(&self, query: &str) -> Vec<&ViewNode> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if node.text.to_lowercase().contains(&query)
                || node.accessibility_label.to_lowercase().contains(&query)
            {
                out.push(node);
            }
        });
        out
    }

    /// Every non-blank text and label, depth-first.
    pub fn collect_text(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if !node.text.trim().is_empty() {
                out.push(node.text.clone());
            }
            if !node.accessibility_label.trim().is_empty() {
                out.push(node.accessibility_label.clone());
            }
        });
        out
    }

    /// Pre-order traversal.
    pub fn walk<'a, F>(&'a self, visit: &mut F)
    where
        F: FnMut(&'a ViewNode),
    {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Button,
    Input,
    Text,
    Image,
    Checkbox,
    Switch,
    List,
    Scrollable,
    Clickable,
    Other,
}

/// Ordered: the first matching type-name keyword wins.
const KIND_KEYWORDS: &[(&str, ElementKind)] = &[
    ("button", ElementKind::Button),
    ("edittext", ElementKind::Input),
    ("textview", ElementKind::Text),
    ("imageview", ElementKind::Image),
    ("checkbox", ElementKind::Checkbox),
    ("switch", ElementKind::Switch),
    ("listview", ElementKind::List),
    ("recyclerview", ElementKind::List),
];

impl ElementKind {
    pub fn classify(node: &ViewNode) -> Self {
        let name = node.kind.to_lowercase();
        if let Some((_, kind)) = KIND_KEYWORDS.iter().find(|(kw, _)| name.contains(kw)) {
            return *kind;
        }
        if node.scrollable {
            ElementKind::Scrollable
        } else if node.clickable {
            ElementKind::Clickable
        } else {
            ElementKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Button => "button",
            ElementKind::Input => "input",
            ElementKind::Text => "text",
            ElementKind::Image => "image",
            ElementKind::Checkbox => "checkbox",
            ElementKind::Switch => "switch",
            ElementKind::List => "list",
            ElementKind::Scrollable => "scrollable",
            ElementKind::Clickable => "clickable",
            ElementKind::Other => "other",
        }
    }
}

/// Flattened, numbered interactive element. Ids are only meaningful within one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiElement {
    pub id: u32,
    pub kind: ElementKind,
    pub text: String,
    pub accessibility_label: String,
    pub identifier: String,
    pub bounds: Rect,
    pub clickable: bool,
    pub enabled: bool,
    pub scrollable: bool,
    pub editable: bool,
}

impl UiElement {
    pub fn center(&self) -> (i32, i32) {
        self.bounds.center()
    }

    pub fn has_label(&self) -> bool {
        !self.text.trim().is_empty() || !self.accessibility_label.trim().is_empty()
    }

    /// Text, else accessibility label, else the element kind.
    pub fn display_label(&self) -> &str {
        if !self.text.trim().is_empty() {
            &self.text
        } else if !self.accessibility_label.trim().is_empty() {
            &self.accessibility_label
        } else {
            self.kind.as_str()
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.clickable && self.enabled
    }
}

/// One perception cycle's aggregated view of the screen. Never mutated after construction;
/// shared as `Arc<ScreenState>`.
#[derive(Debug, Clone)]
pub struct ScreenState {
    pub image: Arc<RawImage>,
    /// Base64 JPEG, ready for transport.
    pub image_encoded: String,
    pub foreground_app: String,
    pub ui_tree: ViewNode,
    pub elements: Vec<UiElement>,
    pub extracted_text: Vec<String>,
    pub description: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub width: u32,
    pub height: u32,
}

impl ScreenState {
    pub fn find_elements(&self, query: &str) -> Vec<&UiElement> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        self.elements
            .iter()
            .filter(|e| {
                e.text.to_lowercase().contains(&query)
                    || e.accessibility_label.to_lowercase().contains(&query)
                    || e.identifier.to_lowercase().contains(&query)
            })
            .collect()
    }

    pub fn image_data_uri(&self) -> String {
        format!("data:image/jpeg;base64,{}", self.image_encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: &str) -> ViewNode {
        ViewNode {
            kind: kind.into(),
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn classify_prefers_type_name_over_flags() {
        let mut button = node("android.widget.ImageButton");
        button.scrollable = true;
        assert_eq!(ElementKind::classify(&button), ElementKind::Button);
        assert_eq!(ElementKind::classify(&node("android.widget.EditText")), ElementKind::Input);
        assert_eq!(ElementKind::classify(&node("android.widget.TextView")), ElementKind::Text);
        assert_eq!(
            ElementKind::classify(&node("androidx.recyclerview.widget.RecyclerView")),
            ElementKind::List
        );
        assert_eq!(ElementKind::classify(&node("android.widget.Switch")), ElementKind::Switch);
    }

    #[test]
    fn classify_falls_back_to_flags() {
        let mut frame = node("android.widget.FrameLayout");
        assert_eq!(ElementKind::classify(&frame), ElementKind::Other);
        frame.clickable = true;
        assert_eq!(ElementKind::classify(&frame), ElementKind::Clickable);
        frame.scrollable = true;
        assert_eq!(ElementKind::classify(&frame), ElementKind::Scrollable);
    }

    #[test]
    fn tree_queries() {
        let mut root = node("FrameLayout");
        let mut ok = node("Button");
        ok.text = "OK".into();
        ok.clickable = true;
        let mut label = node("ImageView");
        label.accessibility_label = "Okay icon".into();
        let mut disabled = node("Button");
        disabled.clickable = true;
        disabled.enabled = false;
        root.children = vec![ok, label, disabled];

        assert_eq!(root.node_count(), 4);
        assert_eq!(root.find_clickable().len(), 1);
        assert_eq!(root.find_by_text("ok").len(), 2);
        assert!(root.find_by_text("  ").is_empty());
        assert_eq!(root.collect_text(), vec!["OK".to_string(), "Okay icon".to_string()]);
    }

    #[test]
    fn element_search_covers_text_label_and_identifier() {
        let element = |id: u32, text: &str, label: &str, identifier: &str| UiElement {
            id,
            kind: ElementKind::Button,
            text: text.into(),
            accessibility_label: label.into(),
            identifier: identifier.into(),
            bounds: Rect::new(0, 0, 10, 10),
            clickable: true,
            enabled: true,
            scrollable: false,
            editable: false,
        };
        let state = ScreenState {
            image: Arc::new(RawImage {
                width: 1,
                height: 1,
                pixels: vec![0; 4],
            }),
            image_encoded: "AAAA".into(),
            foreground_app: "com.android.settings".into(),
            ui_tree: ViewNode::default(),
            elements: vec![
                element(1, "Wi-Fi", "", ""),
                element(2, "", "Search settings", ""),
                element(3, "", "", "com.android.settings:id/wifi_toggle"),
            ],
            extracted_text: Vec::new(),
            description: String::new(),
            timestamp: chrono::Utc::now(),
            width: 1080,
            height: 2400,
        };

        let ids = |q: &str| state.find_elements(q).iter().map(|e| e.id).collect::<Vec<_>>();
        assert_eq!(ids("WIFI"), vec![3]);
        assert_eq!(ids("wi-fi"), vec![1]);
        assert_eq!(ids("search"), vec![2]);
        assert!(ids(" ").is_empty());
        assert_eq!(state.image_data_uri(), "data:image/jpeg;base64,AAAA");
        assert_eq!(state.elements[1].display_label(), "Search settings");
    }

    #[test]
    fn rect_geometry() {
        let r = Rect::new(0, 100, 200, 300);
        assert_eq!(r.center(), (100, 200));
        assert_eq!(r.width(), 200);
        assert!(!r.is_empty());
        assert!(Rect::default().is_empty());
    }
}
