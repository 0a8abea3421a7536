/// One device operation chosen by the decision service. Serialized with the same
/// field names the decision service is asked to emit.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Click {
        x: i32,
        y: i32,
    },
    LongClick {
        x: i32,
        y: i32,
        #[serde(rename = "duration")]
        duration_ms: i64,
    },
    Swipe {
        from_x: i32,
        from_y: i32,
        to_x: i32,
        to_y: i32,
        #[serde(rename = "duration")]
        duration_ms: i64,
    },
    Input {
        text: String,
    },
    PressKey {
        key_code: i32,
        #[serde(default)]
        key_name: String,
    },
    OpenApp {
        #[serde(rename = "package")]
        app_id: String,
        #[serde(default)]
        app_name: String,
    },
    Wait {
        #[serde(rename = "duration")]
        duration_ms: i64,
    },
    GoBack,
    Complete {
        message: String,
    },
    Error {
        message: String,
        #[serde(default)]
        recoverable: bool,
    },
    RequestUserHelp {
        reason: String,
    },
}

impl Action {
    /// Wire discriminator, e.g. `long_click`.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::LongClick { .. } => "long_click",
            Action::Swipe { .. } => "swipe",
            Action::Input { .. } => "input",
            Action::PressKey { .. } => "press_key",
            Action::OpenApp { .. } => "open_app",
            Action::Wait { .. } => "wait",
            Action::GoBack => "go_back",
            Action::Complete { .. } => "complete",
            Action::Error { .. } => "error",
            Action::RequestUserHelp { .. } => "request_user_help",
        }
    }

    pub fn same_kind(&self, other: &Action) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Ends the run once executed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Complete { .. } | Action::Error { .. })
    }

    /// One-line human description used in history summaries and logs.
    pub fn describe(&self) -> String {
        match self {
            Action::Click { x, y } => format!("Click ({x}, {y})"),
            Action::LongClick { x, y, duration_ms } => {
                format!("Long click ({x}, {y}) for {duration_ms}ms")
            }
            Action::Swipe {
                from_x,
                from_y,
                to_x,
                to_y,
                duration_ms,
            } => format!("Swipe ({from_x}, {from_y}) -> ({to_x}, {to_y}) in {duration_ms}ms"),
            Action::Input { text } => {
                let preview: String = text.chars().take(40).collect();
                format!("Input \"{preview}\"")
            }
            Action::PressKey { key_code, key_name } if !key_name.is_empty() => {
                format!("Press key {key_name} ({key_code})")
            }
            Action::PressKey { key_code, .. } => format!("Press key {key_code}"),
            Action::OpenApp { app_id, .. } => format!("Open app {app_id}"),
            Action::Wait { duration_ms } => format!("Wait {duration_ms}ms"),
            Action::GoBack => "Go back".to_string(),
            Action::Complete { message } => format!("Complete: {message}"),
            Action::Error { message, .. } => format!("Error: {message}"),
            Action::RequestUserHelp { reason } => format!("Request user help: {reason}"),
        }
    }
}

/// Outcome of executing one action on a control backend. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    pub execution_time_ms: u64,
    pub error: Option<String>,
    pub needs_user_confirmation: bool,
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            execution_time_ms: 0,
            error: None,
            needs_user_confirmation: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            error: Some(message.clone()),
            message,
            execution_time_ms: 0,
            needs_user_confirmation: false,
        }
    }

    pub fn with_confirmation(mut self, needs: bool) -> Self {
        self.needs_user_confirmation = needs;
        self
    }

    pub fn with_elapsed(mut self, elapsed_ms: u64) -> Self {
        self.execution_time_ms = elapsed_ms;
        self
    }

    /// Appends `note` to the message, e.g. `Tapped (1, 2) [payment screen]`.
    pub fn with_note(mut self, note: &str) -> Self {
        if !note.is_empty() {
            self.message = format!("{} [{note}]", self.message);
        }
        self
    }
}

/// Engine run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Idle,
    Stepping,
    Stopped,
}
