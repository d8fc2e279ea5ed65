use crate::error::{BackendResult, RewriteError};
use crate::llm::{
    http::{check_status, map_transport_error, normalize_base_url},
    sse::SseEvent,
    streaming::{Extracted, drive_sse, parse_event, read_json},
    traits::{Backend, BackendCapabilities, PartialSink},
    types::{BackendKind, BackendRequest},
};
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;

mod types;
use types::{
    ContentBlock, ImageSource, Message, MessagesRequest, MessagesResponse, StreamEvent,
};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const API_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 4096;

pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    messages_url: String,
    model: String,
}

impl AnthropicBackend {
    pub fn new(
        client: Client,
        api_key: impl Into<String>,
        base_url: &str,
        model: impl Into<String>,
    ) -> Result<Self, RewriteError> {
        let base_url = normalize_base_url(base_url)?;
        Ok(Self {
            client,
            api_key: api_key.into().trim().to_string(),
            messages_url: format!("{base_url}/v1/messages"),
            model: model.into(),
        })
    }

    fn build_request(request: &BackendRequest) -> MessagesRequest {
        let mut content: Vec<ContentBlock> = request
            .attachments
            .iter()
            .map(|image| ContentBlock::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: image.mime_type().to_string(),
                    data: image.base64_data(),
                },
            })
            .collect();
        content.push(ContentBlock::Text {
            text: request.user_text.clone(),
        });

        MessagesRequest {
            model: request.model.clone(),
            max_tokens: MAX_OUTPUT_TOKENS,
            system: request.system_prompt.clone(),
            messages: vec![Message {
                role: "user",
                content,
            }],
            // Anthropic has no effort tiers; temperature is capped at 1.0.
            temperature: request.temperature().unwrap_or(1.0).min(1.0),
            stream: request.stream,
        }
    }

    fn extract_text(response: MessagesResponse) -> BackendResult {
        let text: String = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(RewriteError::invalid_response(format!(
                "no text content (stop reason: {})",
                response.stop_reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(text)
    }

    fn extract_event(event: &SseEvent) -> Extracted {
        let Some(parsed) = parse_event::<StreamEvent>("Anthropic", event) else {
            return Extracted::default();
        };
        match parsed.kind.as_str() {
            "content_block_delta" => parsed
                .delta
                .filter(|d| d.kind.as_deref() == Some("text_delta"))
                .and_then(|d| d.text)
                .map(Extracted::delta)
                .unwrap_or_default(),
            "message_delta" => Extracted {
                stop_reason: parsed.delta.and_then(|d| d.stop_reason),
                ..Extracted::default()
            },
            "error" => Extracted::error(
                parsed
                    .error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "unknown stream error".to_string()),
            ),
            _ => Extracted::default(),
        }
    }
}

impl Backend for AnthropicBackend {
    fn name(&self) -> &str {
        BackendKind::Anthropic.label()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Anthropic
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

    fn generate<'a>(
        &'a self,
        request: &'a BackendRequest,
        on_partial: PartialSink<'a>,
    ) -> Pin<Box<dyn Future<Output = BackendResult> + Send + 'a>> {
        Box::pin(async move {
            let body = Self::build_request(request);
            tracing::debug!(model = %request.model, stream = request.stream, "anthropic request");
            let response = self
                .client
                .post(&self.messages_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
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
