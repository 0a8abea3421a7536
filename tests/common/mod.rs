#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{watch, Notify};

use droidpilot::agent_engine::state::{Action, ActionResult};
use droidpilot::config::AppConfig;
use droidpilot::errors::{PilotError, PilotResult};
use droidpilot::executor::backend::ControlBackend;
use droidpilot::executor::router::{BackendKind, BackendRouter};
use droidpilot::executor::status::{ConnectionMonitor, ConnectionStatus};
use droidpilot::llm::provider::DecisionService;
use droidpilot::llm::types::{ConnectionDiagnostics, DecisionRequest};
use droidpilot::perception::traits::{ScreenCapture, ViewTreeReader};
use droidpilot::perception::types::{RawImage, Rect, ViewNode};
use droidpilot::Pilot;

pub const LAUNCHER: &str = "com.android.launcher3";

pub fn label(text: &str, clickable: bool, bounds: Rect) -> ViewNode {
    ViewNode {
        kind: if clickable {
            "android.widget.Button".into()
        } else {
            "android.widget.TextView".into()
        },
        text: text.into(),
        bounds,
        clickable,
        enabled: true,
        ..ViewNode::default()
    }
}

pub fn screen(texts: &[&str]) -> ViewNode {
    ViewNode {
        kind: "android.widget.FrameLayout".into(),
        bounds: Rect::new(0, 0, 1080, 2400),
        enabled: true,
        children: texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let top = 200 + i as i32 * 150;
                label(t, true, Rect::new(100, top, 980, top + 120))
            })
            .collect(),
        ..ViewNode::default()
    }
}

/// Fails the first `failures` captures, then hands out a tiny frame.
pub struct FakeCapture {
    failures: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeCapture {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ScreenCapture for FakeCapture {
    async fn capture(&self) -> PilotResult<RawImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PilotError::Perception("screencap returned no data".into()));
        }
        Ok(RawImage {
            width: 4,
            height: 4,
            pixels: vec![255; 64],
        })
    }

    fn encode(&self, _image: &RawImage, _max_size_kb: usize) -> PilotResult<String> {
        Ok("AAAA".into())
    }
}

/// Returns one tree per read, repeating the last.
pub struct FakeTree {
    screens: Mutex<VecDeque<ViewNode>>,
}

impl FakeTree {
    pub fn new(screens: Vec<ViewNode>) -> Arc<Self> {
        Arc::new(Self {
            screens: Mutex::new(screens.into()),
        })
    }
}

#[async_trait]
impl ViewTreeReader for FakeTree {
    async fn read(&self) -> PilotResult<ViewNode> {
        let mut screens = self.screens.lock().unwrap();
        if screens.len() > 1 {
            Ok(screens.pop_front().unwrap())
        } else {
            screens
                .front()
                .cloned()
                .ok_or_else(|| PilotError::Perception("no tree".into()))
        }
    }
}

/// Records every executed action; `OpenApp` switches the foreground app.
pub struct FakeBackend {
    foreground: Mutex<String>,
    pub executed: Mutex<Vec<Action>>,
    monitor: ConnectionMonitor,
}

impl FakeBackend {
    pub fn new(foreground: &str) -> Arc<Self> {
        let monitor = ConnectionMonitor::new("fake");
        monitor.publish(ConnectionStatus::Ready);
        Arc::new(Self {
            foreground: Mutex::new(foreground.into()),
            executed: Mutex::new(Vec::new()),
            monitor,
        })
    }

    pub fn executed(&self) -> Vec<Action> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControlBackend for FakeBackend {
    fn label(&self) -> &str {
        "fake"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.monitor.subscribe()
    }

    async fn initialize(&self) -> ConnectionStatus {
        ConnectionStatus::Ready
    }

    async fn shutdown(&self) {}

    async fn execute(&self, action: &Action) -> ActionResult {
        self.executed.lock().unwrap().push(action.clone());
        match action {
            Action::OpenApp { app_id, .. } => {
                *self.foreground.lock().unwrap() = app_id.clone();
                ActionResult::success(format!("Launched {app_id}"))
            }
            Action::Complete { message } => ActionResult::success(message.clone()),
            Action::Error { message, recoverable } => {
                ActionResult::failure(message.clone()).with_confirmation(!recoverable)
            }
            Action::RequestUserHelp { reason } => {
                ActionResult::failure(format!("Manual help required: {reason}")).with_confirmation(true)
            }
            other => ActionResult::success(other.describe()),
        }
    }

    async fn current_foreground_app(&self) -> PilotResult<String> {
        Ok(self.foreground.lock().unwrap().clone())
    }
}

/// Replies from a script. Optionally holds the first call until released so a
/// test can act while a step is in flight.
pub struct ScriptedDecision {
    replies: Mutex<VecDeque<String>>,
    pub requests: Mutex<Vec<DecisionRequest>>,
    hold_first: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

impl ScriptedDecision {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
            hold_first: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    pub fn holding_first(replies: &[&str]) -> Arc<Self> {
        let script = Self::new(replies);
        script.hold_first.store(true, Ordering::SeqCst);
        script
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl DecisionService for ScriptedDecision {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: DecisionRequest) -> PilotResult<String> {
        self.requests.lock().unwrap().push(request);
        if self.hold_first.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PilotError::DecisionTransport("script exhausted".into()))
    }

    async fn test_connection(&self) -> PilotResult<ConnectionDiagnostics> {
        Ok(ConnectionDiagnostics {
            latency_ms: 1,
            model: "scripted".into(),
            response_preview: "OK".into(),
        })
    }
}

pub fn fast_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.engine.retry_delay_ms = 5;
    cfg
}

pub fn pilot(
    cfg: &AppConfig,
    capture: Arc<FakeCapture>,
    tree: Arc<FakeTree>,
    backend: Arc<FakeBackend>,
    decision: Arc<ScriptedDecision>,
) -> Pilot {
    let backend: Arc<dyn ControlBackend> = backend;
    let router = Arc::new(BackendRouter::new(BackendKind::Shell, None, Some(backend)));
    Pilot::assemble(cfg, capture, tree, router, decision)
}
