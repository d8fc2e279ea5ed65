use crate::llm::types::EffortTier;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(in crate::llm) struct ChatRequest {
    pub(in crate::llm) model: String,
    pub(in crate::llm) messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(in crate::llm) temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(in crate::llm) reasoning_effort: Option<EffortTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(in crate::llm) stream: Option<bool>,
}

#[derive(Debug, Serialize)]
pub(in crate::llm) struct Message {
    pub(in crate::llm) role: &'static str,
    pub(in crate::llm) content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(in crate::llm) enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(in crate::llm) enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlContent },
}

#[derive(Debug, Serialize)]
pub(in crate::llm) struct ImageUrlContent {
    pub(in crate::llm) url: String,
}

#[derive(Debug, Default, Deserialize)]
pub(in crate::llm) struct ApiError {
    pub(in crate::llm) message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(in crate::llm) struct ChatResponse {
    #[serde(default)]
    pub(in crate::llm) choices: Vec<Choice>,
    pub(in crate::llm) error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
pub(in crate::llm) struct Choice {
    pub(in crate::llm) message: Option<ResponseMessage>,
    pub(in crate::llm) finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(in crate::llm) struct ResponseMessage {
    pub(in crate::llm) content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(in crate::llm) struct ChatCompletionChunk {
    #[serde(default)]
    pub(in crate::llm) choices: Vec<ChunkChoice>,
    pub(in crate::llm) error: Option<ApiError>,
}

/// Some compatible servers send cumulative `message` objects instead of (or
/// alongside) `delta`s.
#[derive(Debug, Deserialize)]
pub(in crate::llm) struct ChunkChoice {
    pub(in crate::llm) delta: Option<ResponseMessage>,
    pub(in crate::llm) message: Option<ResponseMessage>,
    pub(in crate::llm) finish_reason: Option<String>,
}
