use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::config::DecisionConfig;
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::DecisionService;
use crate::llm::sse_parser;
use crate::llm::types::{
    CallConfig, ChatMessage, ConnectionDiagnostics, DecisionRequest, StreamChunkKind,
};

const HEALTH_SYSTEM_PROMPT: &str =
    "You are a health-check assistant. Only confirm that the service is reachable.";
const HEALTH_USER_PROMPT: &str = "Reply with exactly \"OK\".";
const HEALTH_MAX_TOKENS: u32 = 64;
const PREVIEW_CHARS: usize = 64;

/// Client for any `/v1/chat/completions` endpoint that speaks the OpenAI wire format.
pub struct OpenAiCompatibleService {
    api_base: String,
    api_key: String,
    call: CallConfig,
    client: reqwest::Client,
}

impl OpenAiCompatibleService {
    pub fn new(
        api_base: String,
        api_key: String,
        call: CallConfig,
        timeout: Duration,
    ) -> PilotResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_base,
            api_key: api_key.trim().to_string(),
            call,
            client,
        })
    }

    pub fn from_config(cfg: &DecisionConfig, api_key: String) -> PilotResult<Self> {
        Self::new(
            cfg.api_base.clone(),
            api_key,
            CallConfig {
                model: cfg.model.clone(),
                temperature: cfg.temperature,
                max_tokens: cfg.max_tokens,
                stream: cfg.stream,
            },
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> PilotResult<String> {
        if self.api_key.is_empty() {
            return Err(PilotError::DecisionTransport("API key is not configured".into()));
        }

        let body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
            "max_tokens": cfg.max_tokens,
        });

        tracing::debug!(
            model = %cfg.model,
            stream = cfg.stream,
            temperature = cfg.temperature,
            "sending decision request"
        );
        tracing::debug!(
            body = %sanitize_for_log(&body),
            "request body (sanitized, base64 omitted)"
        );

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PilotError::DecisionTransport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::DecisionTransport(format!("{status}: {err_body}")));
        }

        let content = if cfg.stream {
            self.handle_stream(response).await?
        } else {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| PilotError::DecisionTransport(e.to_string()))?;
            extract_message_content(&json)?
        };

        if content.trim().is_empty() {
            return Err(PilotError::EmptyReply);
        }
        tracing::info!(content_len = content.len(), "decision reply received");
        Ok(content)
    }

    /// Accumulates content deltas from an SSE stream.
    async fn handle_stream(&self, response: reqwest::Response) -> PilotResult<String> {
        let mut byte_stream = response.bytes_stream();
        let mut acc = SseAccumulator::default();

        while let Some(result) = byte_stream.next().await {
            let bytes = result.map_err(|e| PilotError::DecisionTransport(e.to_string()))?;
            if acc.push(&bytes) {
                break;
            }
        }
        acc.finish();

        tracing::debug!(
            content_len = acc.content.len(),
            reasoning_len = acc.reasoning.len(),
            "decision stream complete"
        );
        Ok(acc.content)
    }
}

#[async_trait]
impl DecisionService for OpenAiCompatibleService {
    fn name(&self) -> &str {
        &self.call.model
    }

    async fn complete(&self, request: DecisionRequest) -> PilotResult<String> {
        self.chat(request.to_messages(), &self.call).await
    }

    async fn test_connection(&self) -> PilotResult<ConnectionDiagnostics> {
        let cfg = CallConfig {
            model: self.call.model.clone(),
            temperature: self.call.temperature.clamp(0.0, 1.0),
            max_tokens: HEALTH_MAX_TOKENS.clamp(16, 512),
            stream: false,
        };
        let started = Instant::now();
        let reply = self
            .chat(
                vec![
                    ChatMessage::system(HEALTH_SYSTEM_PROMPT),
                    ChatMessage::user(HEALTH_USER_PROMPT),
                ],
                &cfg,
            )
            .await?;
        let diagnostics = ConnectionDiagnostics {
            latency_ms: started.elapsed().as_millis() as u64,
            model: cfg.model,
            response_preview: preview(&reply),
        };
        tracing::info!(latency_ms = diagnostics.latency_ms, "decision service reachable");
        Ok(diagnostics)
    }
}

/// Line-buffered SSE consumer. Buffers raw bytes so a multi-byte character
/// split across network chunks is decoded only once its line is complete.
#[derive(Debug, Default)]
struct SseAccumulator {
    line_buf: Vec<u8>,
    content: String,
    reasoning: String,
    done: bool,
}

impl SseAccumulator {
    /// Feeds raw bytes; returns true once the stream signalled completion.
    fn push(&mut self, bytes: &[u8]) -> bool {
        for &byte in bytes {
            if byte != b'\n' {
                self.line_buf.push(byte);
                continue;
            }
            let line = std::mem::take(&mut self.line_buf);
            self.consume_line(String::from_utf8_lossy(&line).trim());
            if self.done {
                return true;
            }
        }
        false
    }

    /// Flushes a trailing line that arrived without a newline.
    fn finish(&mut self) {
        if self.done || self.line_buf.is_empty() {
            return;
        }
        let line = std::mem::take(&mut self.line_buf);
        self.consume_line(String::from_utf8_lossy(&line).trim());
    }

    fn consume_line(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        match sse_parser::parse_sse_line(line) {
            Ok(Some(chunk)) => match chunk.kind {
                StreamChunkKind::Content => self.content.push_str(&chunk.content),
                StreamChunkKind::Reasoning => self.reasoning.push_str(&chunk.content),
                StreamChunkKind::Done => self.done = true,
            },
            Ok(None) => {}
            Err(e) => tracing::debug!("SSE parse skipped: {e}"),
        }
    }
}

fn extract_message_content(json: &serde_json::Value) -> PilotResult<String> {
    let first = json["choices"]
        .as_array()
        .and_then(|choices| choices.first())
        .ok_or(PilotError::EmptyReply)?;
    Ok(first["message"]["content"].as_str().unwrap_or("").to_string())
}

/// Clones the body with every `image_url.url` replaced, so logs never carry base64.
fn sanitize_for_log(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) != Some("image_url") {
                    continue;
                }
                if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                    *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

fn preview(reply: &str) -> String {
    reply.replace('\n', " ").chars().take(PREVIEW_CHARS).collect()
}
