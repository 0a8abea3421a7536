//! uiautomator window dump → `ViewNode` tree.
use std::io::Cursor;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use xmltree::{Element, XMLNode};

use crate::errors::{PilotError, PilotResult};
use crate::executor::channel::CommandChannel;
use crate::perception::traits::ViewTreeReader;
use crate::perception::types::{Rect, ViewNode};

const DUMP_DIR: &str = "/data/local/tmp/droidpilot";
const DUMP_FILE: &str = "/data/local/tmp/droidpilot/window_dump.xml";

fn bounds_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]").expect("static bounds regex")
    })
}

/// Parses `[l,t][r,b]`; anything malformed becomes an empty rect.
pub fn parse_bounds(raw: &str) -> Rect {
    let Some(caps) = bounds_regex().captures(raw) else {
        tracing::trace!(bounds = %raw, "unparsable bounds");
        return Rect::default();
    };
    let n = |i: usize| caps[i].parse::<i32>().unwrap_or(0);
    Rect::new(n(1), n(2), n(3), n(4))
}

/// Parses a uiautomator dump. The first `node` element under the document root
/// becomes the tree root.
pub fn parse_hierarchy_xml(xml: &str) -> PilotResult<ViewNode> {
    let doc = Element::parse(Cursor::new(xml.trim().as_bytes()))?;
    if doc.name == "node" {
        return Ok(convert_node(&doc));
    }
    doc.children
        .iter()
        .find_map(|child| match child {
            XMLNode::Element(el) if el.name == "node" => Some(convert_node(el)),
            _ => None,
        })
        .ok_or_else(|| PilotError::Perception("UI dump contains no root node".into()))
}

fn convert_node(el: &Element) -> ViewNode {
    let attr = |name: &str| el.attributes.get(name).cloned().unwrap_or_default();
    let flag = |name: &str| el.attributes.get(name).map(|v| v == "true").unwrap_or(false);

    let kind = attr("class");
    let editable = flag("editable") || kind.to_lowercase().contains("edittext");
    let children = el
        .children
        .iter()
        .filter_map(|child| match child {
            XMLNode::Element(c) if c.name == "node" => Some(convert_node(c)),
            _ => None,
        })
        .collect();

    ViewNode {
        text: attr("text"),
        accessibility_label: attr("content-desc"),
        identifier: attr("resource-id"),
        bounds: parse_bounds(&attr("bounds")),
        clickable: flag("clickable"),
        focusable: flag("focusable"),
        enabled: flag("enabled"),
        checkable: flag("checkable"),
        checked: flag("checked"),
        scrollable: flag("scrollable"),
        editable,
        children,
        kind,
    }
}

/// Reads the UI tree with `uiautomator dump` over the privileged command channel.
pub struct ShellViewTreeReader {
    channel: Arc<dyn CommandChannel>,
}

impl ShellViewTreeReader {
    pub fn new(channel: Arc<dyn CommandChannel>) -> Self {
        Self { channel }
    }

    async fn run(&self, command: &str) -> PilotResult<String> {
        let out = self
            .channel
            .exec(command)
            .await
            .map_err(|e| PilotError::Perception(e.to_string()))?;
        if !out.is_success() {
            return Err(PilotError::Perception(format!(
                "`{command}` failed: {}",
                out.error_message()
            )));
        }
        Ok(out.stdout)
    }
}

#[async_trait]
impl ViewTreeReader for ShellViewTreeReader {
    async fn read(&self) -> PilotResult<ViewNode> {
        self.run(&format!("mkdir -p {DUMP_DIR}")).await?;
        self.run(&format!("rm -f {DUMP_FILE}")).await?;
        self.run(&format!("uiautomator dump {DUMP_FILE}")).await?;
        let xml = self.run(&format!("cat {DUMP_FILE}")).await?;

        if let Err(e) = self.run(&format!("rm -f {DUMP_FILE}")).await {
            tracing::warn!(error = %e, "could not remove UI dump file");
        }
        if xml.trim().is_empty() {
            return Err(PilotError::Perception("UI dump file is empty".into()));
        }

        let root = parse_hierarchy_xml(&xml)
            .map_err(|e| PilotError::Perception(format!("cannot parse UI dump: {e}")))?;
        tracing::debug!(nodes = root.node_count(), "UI tree read via uiautomator");
        Ok(root)
    }
}
