//! Google Gemini `generateContent` adapter.
//!
//! Non-streaming calls hit `:generateContent`; streaming calls hit
//! `:streamGenerateContent?alt=sse`, whose events each carry a complete
//! response object holding only the newly generated text.

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
use types::{Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, InlineData, Part};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

pub struct GeminiBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

/// Pieces of one response object relevant to rewriting.
#[derive(Debug, Default, PartialEq, Eq)]
struct ResponseParts {
    text: String,
    finish_reason: Option<String>,
    error: Option<String>,
}

impl GeminiBackend {
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
        })
    }

    fn model_name(model: &str) -> String {
        if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        }
    }

    fn endpoint(&self, stream: bool) -> String {
        let model = Self::model_name(&self.model);
        if stream {
            format!("{}/{model}:streamGenerateContent?alt=sse", self.base_url)
        } else {
            format!("{}/{model}:generateContent", self.base_url)
        }
    }

    fn build_request(request: &BackendRequest) -> GenerateContentRequest {
        let mut parts: Vec<Part> = request
            .attachments
            .iter()
            .map(|image| {
                Part::InlineData(InlineData {
                    mime_type: image.mime_type().to_string(),
                    data: image.base64_data(),
                })
            })
            .collect();
        parts.push(Part::Text(request.user_text.clone()));

        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts,
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text(request.system_prompt.clone())],
            },
            generation_config: GenerationConfig {
                temperature: request.temperature().unwrap_or(1.0),
            },
        }
    }

    fn response_parts(response: GenerateContentResponse) -> ResponseParts {
        let mut parts = ResponseParts {
            error: response.error.and_then(|e| e.message),
            ..ResponseParts::default()
        };
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            parts.error = Some(format!("prompt blocked: {reason}"));
        }
        if let Some(candidate) = response.candidates.into_iter().next() {
            parts.finish_reason = candidate.finish_reason;
            parts.text = candidate
                .content
                .map(|content| {
                    content
                        .parts
                        .into_iter()
                        .filter_map(|part| part.text)
                        .collect()
                })
                .unwrap_or_default();
        }
        parts
    }

    fn extract_text(response: GenerateContentResponse) -> BackendResult {
        let parts = Self::response_parts(response);
        if !parts.text.is_empty() {
            return Ok(parts.text);
        }
        let detail = parts.error.unwrap_or_else(|| {
            format!(
                "no text in response (finish reason: {})",
                parts.finish_reason.as_deref().unwrap_or("unknown")
            )
        });
        Err(RewriteError::invalid_response(detail))
    }

    fn extract_event(event: &SseEvent) -> Extracted {
        let Some(response) = parse_event::<GenerateContentResponse>("Gemini", event) else {
            return Extracted::default();
        };
        let parts = Self::response_parts(response);
        Extracted {
            delta: (!parts.text.is_empty()).then_some(parts.text),
            snapshot: None,
            error: parts.error,
            stop_reason: parts.finish_reason,
        }
    }
}

impl Backend for GeminiBackend {
    fn name(&self) -> &str {
        BackendKind::Gemini.label()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Gemini
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
            tracing::debug!(model = %request.model, stream = request.stream, "gemini request");
            let response = self
                .client
                .post(self.endpoint(request.stream))
                .header("x-goog-api-key", &self.api_key)
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
