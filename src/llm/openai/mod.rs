//! OpenAI chat-completions adapter. Also serves any server exposing the same
//! `/chat/completions` surface through a custom `base_url`.

use crate::error::{BackendResult, RewriteError};
use crate::llm::{
    http::{check_status, map_transport_error, normalize_base_url},
    prompt::sampling_for,
    sse::SseEvent,
    streaming::{Extracted, drive_sse, parse_event, read_json},
    traits::{Backend, BackendCapabilities, PartialSink},
    types::{BackendKind, BackendRequest, Sampling},
};
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;

mod types;
use types::{
    ChatCompletionChunk, ChatRequest, ChatResponse, ContentPart, ImageUrlContent, Message,
    MessageContent,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    effort_model_prefixes: Vec<String>,
}

impl OpenAiBackend {
    pub fn new(
        client: Client,
        api_key: impl Into<String>,
        base_url: &str,
        model: impl Into<String>,
    ) -> Result<Self, RewriteError> {
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: normalize_base_url(base_url)?,
            model: model.into(),
            effort_model_prefixes: Vec::new(),
        })
    }

    /// Models whose name starts with one of these take `reasoning_effort`
    /// instead of `temperature`.
    #[must_use]
    pub fn with_effort_model_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.effort_model_prefixes = prefixes;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(request: &BackendRequest) -> ChatRequest {
        let user_content = if request.attachments.is_empty() {
            MessageContent::Text(request.user_text.clone())
        } else {
            let mut parts = Vec::with_capacity(request.attachments.len() + 1);
            parts.push(ContentPart::Text {
                text: request.user_text.clone(),
            });
            parts.extend(request.attachments.iter().map(|image| ContentPart::ImageUrl {
                image_url: ImageUrlContent {
                    url: format!("data:{};base64,{}", image.mime_type(), image.base64_data()),
                },
            }));
            MessageContent::Parts(parts)
        };

        let (temperature, reasoning_effort) = match request.sampling {
            Sampling::Temperature(t) => (Some(t), None),
            Sampling::Effort(tier) => (None, Some(tier)),
        };

        ChatRequest {
            model: request.model.clone(),
            messages: vec![
                Message {
                    role: "system",
                    content: MessageContent::Text(request.system_prompt.clone()),
                },
                Message {
                    role: "user",
                    content: user_content,
                },
            ],
            temperature,
            reasoning_effort,
            stream: request.stream.then_some(true),
        }
    }

    fn extract_text(response: ChatResponse) -> BackendResult {
        if let Some(message) = response.error.and_then(|e| e.message) {
            return Err(RewriteError::invalid_response(message));
        }
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RewriteError::invalid_response("no choices in response"))?;
        match choice.message.and_then(|m| m.content) {
            Some(text) if !text.is_empty() => Ok(text),
            _ => Err(RewriteError::invalid_response(format!(
                "empty completion (finish reason: {})",
                choice.finish_reason.as_deref().unwrap_or("unknown")
            ))),
        }
    }

    fn extract_event(event: &SseEvent) -> Extracted {
        let Some(chunk) = parse_event::<ChatCompletionChunk>("OpenAI", event) else {
            return Extracted::default();
        };
        let mut extracted = Extracted {
            error: chunk.error.and_then(|e| e.message),
            ..Extracted::default()
        };
        if let Some(choice) = chunk.choices.into_iter().next() {
            extracted.delta = choice.delta.and_then(|d| d.content);
            extracted.snapshot = choice.message.and_then(|m| m.content);
            extracted.stop_reason = choice.finish_reason;
        }
        extracted
    }
}

impl Backend for OpenAiBackend {
    fn name(&self) -> &str {
        BackendKind::OpenAi.label()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            streaming: true,
            vision: true,
        }
    }

    fn sampling(&self, aggressiveness: f64) -> Sampling {
        sampling_for(&self.model, aggressiveness, &self.effort_model_prefixes)
    }

    fn generate<'a>(
        &'a self,
        request: &'a BackendRequest,
        on_partial: PartialSink<'a>,
    ) -> Pin<Box<dyn Future<Output = BackendResult> + Send + 'a>> {
        Box::pin(async move {
            let body = Self::build_request(request);
            tracing::debug!(model = %request.model, stream = request.stream, "openai request");
            let response = self
                .client
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| map_transport_error(&e))?;
            let response = check_status(self.name(), response).await?;

            if request.stream {
                return drive_sse(response, Self::extract_event, on_partial).await;
            }
            let text = Self::extract_text(read_json(response).await?)?;
            on_partial(&text);
            Ok(text)
        })
    }
}
