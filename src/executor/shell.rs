//! Privileged-shell backend: `input`, `monkey` and `dumpsys` over a `CommandChannel`.
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::watch;

use crate::agent_engine::state::{Action, ActionResult};
use crate::decision::parser::is_package_name;
use crate::errors::{PilotError, PilotResult};
use crate::executor::backend::{
    elapsed_ms, key_label, non_actuating_result, non_negative_ms, settle, ControlBackend,
    SettleDelays, KEYCODE_BACK,
};
use crate::executor::channel::CommandChannel;
use crate::executor::status::{ConnectionMonitor, ConnectionStatus};
use crate::executor::text_input::{contains_cjk, escape_for_shell_input};

fn focus_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"mCurrentFocus=Window\{[^}]+\s([a-zA-Z0-9._]+)/",
            r"mFocusedApp=AppWindowToken\{[^}]+\s([a-zA-Z0-9._]+)/",
            r"mFocusedApp=ActivityRecord\{[^}]+\s([a-zA-Z0-9._]+)/",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Extracts the focused package from `dumpsys window windows` output. Patterns are
/// tried in order; returns an empty string when none match.
pub fn parse_foreground_package(dump: &str) -> String {
    let normalized = dump.replace('\r', "\n");
    for re in focus_patterns() {
        if let Some(pkg) = re.captures(&normalized).and_then(|c| c.get(1)) {
            return pkg.as_str().to_string();
        }
    }
    let head: String = normalized.chars().take(512).collect();
    tracing::warn!(dump_head = %head, "unable to parse foreground package");
    String::new()
}

pub struct ShellBackend {
    channel: Arc<dyn CommandChannel>,
    monitor: ConnectionMonitor,
    delays: SettleDelays,
}

impl ShellBackend {
    pub fn new(channel: Arc<dyn CommandChannel>) -> Self {
        Self {
            channel,
            monitor: ConnectionMonitor::new("shell"),
            delays: SettleDelays::shell(),
        }
    }

    pub fn with_delays(mut self, delays: SettleDelays) -> Self {
        self.delays = delays;
        self
    }

    /// Runs one command; success waits out `delay` and returns `ok_message`.
    async fn run(
        &self,
        command: &str,
        delay: Duration,
        ok_message: String,
        what: &str,
    ) -> ActionResult {
        tracing::debug!(channel = %self.channel.label(), command = %command, "shell dispatch");
        match self.channel.exec(command).await {
            Ok(out) if out.is_success() => {
                settle(delay).await;
                ActionResult::success(ok_message)
            }
            Ok(out) => ActionResult::failure(format!("{what} failed: {}", out.error_message())),
            Err(e) => {
                tracing::error!(error = %e, command = %command, "shell command not dispatched");
                ActionResult::failure(format!("Shell command failed: {e}"))
            }
        }
    }

    async fn dispatch(&self, action: &Action) -> ActionResult {
        let d = self.delays;
        match action {
            Action::Click { x, y } => {
                self.run(&format!("input tap {x} {y}"), d.tap, format!("Tapped ({x}, {y})"), "Tap")
                    .await
            }
            Action::LongClick { x, y, duration_ms } => {
                let ms = non_negative_ms(*duration_ms);
                self.run(
                    &format!("input swipe {x} {y} {x} {y} {ms}"),
                    d.tap,
                    format!("Long press executed at ({x}, {y})"),
                    "Long press",
                )
                .await
            }
            Action::Swipe {
                from_x,
                from_y,
                to_x,
                to_y,
                duration_ms,
            } => {
                let ms = non_negative_ms(*duration_ms);
                self.run(
                    &format!("input swipe {from_x} {from_y} {to_x} {to_y} {ms}"),
                    d.swipe,
                    "Swipe executed".to_string(),
                    "Swipe",
                )
                .await
            }
            Action::Input { text } => {
                if text.trim().is_empty() {
                    return ActionResult::failure("Input text is empty.");
                }
                if contains_cjk(text) {
                    tracing::warn!("CJK text may not be typeable through `input text`");
                }
                let escaped = escape_for_shell_input(text);
                self.run(
                    &format!("input text \"{escaped}\""),
                    d.input,
                    "Text input applied".to_string(),
                    "Text input",
                )
                .await
            }
            Action::PressKey { key_code, key_name } => {
                let label = key_label(*key_code, key_name);
                self.run(
                    &format!("input keyevent {key_code}"),
                    d.key,
                    format!("Key event executed: {label}"),
                    "Key event",
                )
                .await
            }
            Action::GoBack => {
                self.run(
                    &format!("input keyevent {KEYCODE_BACK}"),
                    d.key,
                    "Key event executed: Back".to_string(),
                    "Key event",
                )
                .await
            }
            Action::OpenApp { app_id, app_name } => {
                if !is_package_name(app_id) {
                    return ActionResult::failure(format!(
                        "Refusing to launch {app_id:?}: not a package name"
                    ));
                }
                let shown = if app_name.trim().is_empty() { app_id } else { app_name };
                self.run(
                    &format!("monkey -p {app_id} -c android.intent.category.LAUNCHER 1"),
                    d.launch,
                    format!("Launch signal sent to {shown}"),
                    "Launch",
                )
                .await
            }
            Action::Wait { duration_ms } => {
                settle(Duration::from_millis(non_negative_ms(*duration_ms))).await;
                ActionResult::success(format!("Waited {duration_ms}ms"))
            }
            Action::Complete { .. } | Action::Error { .. } | Action::RequestUserHelp { .. } => {
                non_actuating_result(action)
                    .unwrap_or_else(|| ActionResult::failure("Unsupported action"))
            }
        }
    }
}

#[async_trait]
impl ControlBackend for ShellBackend {
    fn label(&self) -> &str {
        "shell"
    }

    fn is_ready(&self) -> bool {
        self.monitor.current().is_ready()
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.monitor.subscribe()
    }

    async fn initialize(&self) -> ConnectionStatus {
        self.monitor.publish(ConnectionStatus::Connecting);
        let status = self.channel.probe().await;
        self.monitor.publish(status);
        status
    }

    async fn shutdown(&self) {
        self.monitor.publish(ConnectionStatus::Disabled);
    }

    async fn execute(&self, action: &Action) -> ActionResult {
        if !self.is_ready() {
            return ActionResult::failure(
                "Shell channel is not ready. Connect the device and grant shell access.",
            )
            .with_confirmation(true);
        }
        let started = Instant::now();
        let result = self.dispatch(action).await;
        result.with_elapsed(elapsed_ms(started))
    }

    async fn current_foreground_app(&self) -> PilotResult<String> {
        if !self.is_ready() {
            return Err(PilotError::Backend("shell channel is not ready".into()));
        }
        let dump = self.channel.exec("dumpsys window windows").await?;
        if !dump.is_success() {
            return Err(PilotError::Backend(format!(
                "unable to read window manager state: {}",
                dump.error_message()
            )));
        }
        let pkg = parse_foreground_package(&dump.stdout);
        if pkg.is_empty() {
            return Err(PilotError::Backend(
                "unable to identify the foreground application".into(),
            ));
        }
        Ok(pkg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::channel::ShellOutput;
    use std::sync::Mutex;

    struct ScriptedChannel {
        commands: Mutex<Vec<String>>,
        status: ConnectionStatus,
        fail_on: Option<&'static str>,
        window_dump: String,
    }

    impl ScriptedChannel {
        fn ready() -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
                status: ConnectionStatus::Ready,
                fail_on: None,
                window_dump: String::new(),
            }
        }
    }

    #[async_trait]
    impl CommandChannel for ScriptedChannel {
        fn label(&self) -> &str {
            "scripted"
        }
        async fn probe(&self) -> ConnectionStatus {
            self.status
        }
        async fn exec(&self, command: &str) -> PilotResult<ShellOutput> {
            self.commands.lock().unwrap().push(command.to_string());
            if self.fail_on.is_some_and(|f| command.starts_with(f)) {
                return Ok(ShellOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "Error: not allowed".into(),
                });
            }
            let stdout = if command.starts_with("dumpsys") {
                self.window_dump.clone()
            } else {
                String::new()
            };
            Ok(ShellOutput {
                exit_code: 0,
                stdout,
                stderr: String::new(),
            })
        }
        async fn exec_binary(&self, _command: &str) -> PilotResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    async fn backend_over(channel: Arc<ScriptedChannel>) -> ShellBackend {
        let backend = ShellBackend::new(channel).with_delays(SettleDelays::none());
        backend.initialize().await;
        backend
    }

    #[tokio::test]
    async fn builds_input_commands() {
        let channel = Arc::new(ScriptedChannel::ready());
        let backend = backend_over(channel.clone()).await;

        for action in [
            Action::Click { x: 5, y: 6 },
            Action::LongClick {
                x: 1,
                y: 2,
                duration_ms: 1000,
            },
            Action::Input {
                text: "a b&c".into(),
            },
            Action::GoBack,
            Action::OpenApp {
                app_id: "com.android.settings".into(),
                app_name: String::new(),
            },
        ] {
            assert!(backend.execute(&action).await.success, "{action:?}");
        }

        let commands = channel.commands.lock().unwrap().clone();
        assert_eq!(
            commands,
            vec![
                "input tap 5 6",
                "input swipe 1 2 1 2 1000",
                "input text \"a%sb%26c\"",
                "input keyevent 4",
                "monkey -p com.android.settings -c android.intent.category.LAUNCHER 1",
            ]
        );
    }

    #[tokio::test]
    async fn hostile_text_and_package_never_reach_the_shell_unquoted() {
        let channel = Arc::new(ScriptedChannel::ready());
        let backend = backend_over(channel.clone()).await;

        let typed = backend
            .execute(&Action::Input {
                text: "a$(id)`reboot`".into(),
            })
            .await;
        assert!(typed.success);
        let launched = backend
            .execute(&Action::OpenApp {
                app_id: "com.x; reboot".into(),
                app_name: String::new(),
            })
            .await;
        assert!(!launched.success);

        let commands = channel.commands.lock().unwrap().clone();
        assert_eq!(commands, vec![r#"input text "a\$(id)\`reboot\`""#]);
    }

    #[tokio::test]
    async fn blank_input_is_rejected_before_dispatch() {
        let channel = Arc::new(ScriptedChannel::ready());
        let backend = backend_over(channel.clone()).await;
        let result = backend.execute(&Action::Input { text: "  ".into() }).await;
        assert_eq!(result.message, "Input text is empty.");
        assert!(channel.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failed_result() {
        let mut channel = ScriptedChannel::ready();
        channel.fail_on = Some("input tap");
        let backend = backend_over(Arc::new(channel)).await;
        let result = backend.execute(&Action::Click { x: 1, y: 1 }).await;
        assert!(!result.success);
        assert_eq!(result.message, "Tap failed: Error: not allowed");
    }

    #[tokio::test]
    async fn unready_channel_asks_for_confirmation() {
        let mut channel = ScriptedChannel::ready();
        channel.status = ConnectionStatus::Disabled;
        let backend = backend_over(Arc::new(channel)).await;
        assert!(!backend.is_ready());
        let result = backend.execute(&Action::GoBack).await;
        assert!(!result.success && result.needs_user_confirmation);
    }

    #[tokio::test]
    async fn reads_foreground_app_from_window_dump() {
        let mut channel = ScriptedChannel::ready();
        channel.window_dump = "  mCurrentFocus=Window{3c1f2a u0 com.android.settings/com.android.settings.Settings}\r\n".into();
        let backend = backend_over(Arc::new(channel)).await;
        assert_eq!(
            backend.current_foreground_app().await.unwrap(),
            "com.android.settings"
        );
    }

    #[test]
    fn focus_patterns_are_tried_in_order() {
        let dump = "mFocusedApp=ActivityRecord{a1b2 u0 com.tencent.mm/.ui.LauncherUI t12}";
        assert_eq!(parse_foreground_package(dump), "com.tencent.mm");
        assert_eq!(parse_foreground_package("nothing useful"), "");
    }
}
