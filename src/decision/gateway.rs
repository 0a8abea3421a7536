use std::sync::Arc;

use crate::agent_engine::history::ActionHistory;
use crate::agent_engine::state::Action;
use crate::config::PromptConfig;
use crate::decision::parser;
use crate::decision::prompt::PromptBuilder;
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::DecisionService;
use crate::llm::types::DecisionRequest;
use crate::perception::types::ScreenState;

/// Prompt → decision service → parsed, validated `Action`.
pub struct DecisionGateway {
    service: Arc<dyn DecisionService>,
    prompts: PromptBuilder,
}

impl DecisionGateway {
    pub fn new(service: Arc<dyn DecisionService>, limits: PromptConfig) -> Self {
        Self {
            service,
            prompts: PromptBuilder::new(limits),
        }
    }

    /// Every failure here is a step-level infra error: transport, empty reply,
    /// unparsable reply or failed validation.
    pub async fn decide(
        &self,
        task: &str,
        state: &ScreenState,
        recent_history: &[ActionHistory],
    ) -> PilotResult<Action> {
        let request = DecisionRequest {
            system_prompt: self.prompts.system_prompt().to_string(),
            user_prompt: self.prompts.user_prompt(task, state, recent_history),
            image_data_uri: (!state.image_encoded.is_empty()).then(|| state.image_data_uri()),
        };

        let reply = self.service.complete(request).await.map_err(|e| match e {
            PilotError::EmptyReply | PilotError::DecisionTransport(_) => e,
            other => PilotError::DecisionTransport(other.to_string()),
        })?;
        if reply.trim().is_empty() {
            return Err(PilotError::EmptyReply);
        }

        let action = parser::parse_and_validate(&reply)?;
        tracing::info!(
            service = %self.service.name(),
            action = %action.describe(),
            "decision made"
        );
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ConnectionDiagnostics;
    use crate::perception::types::{RawImage, ViewNode};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned {
        reply: PilotResult<String>,
        seen: Mutex<Option<DecisionRequest>>,
    }

    impl Canned {
        fn replying(reply: PilotResult<String>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl DecisionService for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, request: DecisionRequest) -> PilotResult<String> {
            *self.seen.lock().unwrap() = Some(request);
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(PilotError::DecisionTransport(e.to_string())),
            }
        }

        async fn test_connection(&self) -> PilotResult<ConnectionDiagnostics> {
            Ok(ConnectionDiagnostics {
                latency_ms: 0,
                model: "canned".into(),
                response_preview: "OK".into(),
            })
        }
    }

    fn screen() -> ScreenState {
        ScreenState {
            image: Arc::new(RawImage {
                width: 1,
                height: 1,
                pixels: vec![0; 4],
            }),
            image_encoded: "AAAA".into(),
            foreground_app: "com.android.launcher3".into(),
            ui_tree: ViewNode::default(),
            elements: Vec::new(),
            extracted_text: Vec::new(),
            description: String::new(),
            timestamp: chrono::Utc::now(),
            width: 1080,
            height: 2400,
        }
    }

    #[tokio::test]
    async fn returns_validated_action_and_attaches_image() {
        let service = Canned::replying(Ok(r#"{"action":"open_app","package":"com.android.settings"}"#.into()));
        let gateway = DecisionGateway::new(service.clone(), PromptConfig::default());
        let action = gateway.decide("open settings", &screen(), &[]).await.unwrap();
        assert_eq!(
            action,
            Action::OpenApp {
                app_id: "com.android.settings".into(),
                app_name: String::new()
            }
        );
        let seen = service.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.image_data_uri.as_deref(), Some("data:image/jpeg;base64,AAAA"));
        assert!(seen.user_prompt.contains("open settings"));
    }

    #[tokio::test]
    async fn invalid_action_is_an_error() {
        let service = Canned::replying(Ok(r#"{"action":"click","x":-4,"y":2}"#.into()));
        let gateway = DecisionGateway::new(service, PromptConfig::default());
        let err = gateway.decide("t", &screen(), &[]).await.unwrap_err();
        assert!(matches!(err, PilotError::InvalidAction(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn transport_failure_is_retryable() {
        let service = Canned::replying(Err(PilotError::DecisionTransport("timeout".into())));
        let gateway = DecisionGateway::new(service, PromptConfig::default());
        let err = gateway.decide("t", &screen(), &[]).await.unwrap_err();
        assert!(matches!(err, PilotError::DecisionTransport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn blank_reply_is_empty() {
        let gateway = DecisionGateway::new(Canned::replying(Ok("  \n".into())), PromptConfig::default());
        assert!(matches!(
            gateway.decide("t", &screen(), &[]).await,
            Err(PilotError::EmptyReply)
        ));
    }
}
