use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Decision service error: {0}")]
    DecisionTransport(String),

    #[error("Decision service returned an empty reply")]
    EmptyReply,

    #[error("Unparsable decision reply: {0}")]
    ReplyParse(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Control backend error: {0}")]
    Backend(String),

    #[error("Shell command failed: {0}")]
    Shell(String),

    #[error("Blocked by safety policy: {0}")]
    SafetyBlocked(String),

    #[error("Model reported an error: {0}")]
    ModelReported(String),

    #[error("Task appears stuck: the last {0} actions were all the same kind")]
    StuckDetected(usize),

    #[error("Step limit reached ({0})")]
    StepLimitReached(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("XML parse error: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Another task is already running")]
    Busy,

    #[error("Invalid task state: {0}")]
    InvalidState(String),
}

impl PilotError {
    /// Infrastructure failures that the engine retries at step level.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PilotError::Perception(_)
                | PilotError::DecisionTransport(_)
                | PilotError::EmptyReply
                | PilotError::ReplyParse(_)
                | PilotError::InvalidAction(_)
                | PilotError::Http(_)
                | PilotError::Xml(_)
                | PilotError::Image(_)
        )
    }
}

impl serde::Serialize for PilotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type PilotResult<T> = Result<T, PilotError>;
