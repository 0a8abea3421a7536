use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: MessageContent::Text(text.into()),
        }
    }

    /// User turn carrying text plus one image as a data URI.
    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_url.into(),
                    },
                },
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One decision call: instructions plus an optional screenshot.
#[derive(Debug, Clone, Default)]
pub struct DecisionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// `data:image/jpeg;base64,...`
    pub image_data_uri: Option<String>,
}

impl DecisionRequest {
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let user = match &self.image_data_uri {
            Some(uri) => ChatMessage::user_with_image(self.user_prompt.clone(), uri.clone()),
            None => ChatMessage::user(self.user_prompt.clone()),
        };
        vec![ChatMessage::system(self.system_prompt.clone()), user]
    }
}

/// Sampling parameters for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct CallConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub kind: StreamChunkKind,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunkKind {
    Reasoning,
    Content,
    Done,
}

/// Result of a health-check round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDiagnostics {
    pub latency_ms: u64,
    pub model: String,
    pub response_preview: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_request_uses_content_parts() {
        let req = DecisionRequest {
            system_prompt: "sys".into(),
            user_prompt: "usr".into(),
            image_data_uri: Some("data:image/jpeg;base64,AAAA".into()),
        };
        let json = serde_json::to_value(req.to_messages()).unwrap();
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[0]["content"], "sys");
        assert_eq!(json[1]["content"][0]["type"], "text");
        assert_eq!(json[1]["content"][1]["type"], "image_url");
        assert_eq!(json[1]["content"][1]["image_url"]["url"], "data:image/jpeg;base64,AAAA");
    }
}
