use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Which generation provider serves a request.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackendKind {
    #[default]
    #[strum(to_string = "openai")]
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
    Local,
}

impl BackendKind {
    pub const ALL: [Self; 4] = [Self::OpenAi, Self::Anthropic, Self::Gemini, Self::Local];

    /// Human-facing provider name used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Gemini => "Gemini",
            Self::Local => "Local model",
        }
    }

    pub fn is_local(self) -> bool {
        matches!(self, Self::Local)
    }
}

/// Target transformation for a rewrite.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Style {
    #[default]
    Proofread,
    Rewrite,
    Concise,
    Professional,
    Friendly,
    Explain,
}

/// A named prompt suffix the caller can attach to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub prompt: String,
}

impl Skill {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
        }
    }
}

/// An image sent alongside the text.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    filename: String,
    mime_type: String,
    data: Arc<[u8]>,
    content_hash: String,
}

impl ImageAttachment {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        let content_hash = hex::encode(Sha256::digest(&data));
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            data: data.into(),
            content_hash,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Hex SHA-256 of the raw bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn base64_data(&self) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

impl fmt::Debug for ImageAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAttachment")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .field("content_hash", &self.content_hash)
            .finish()
    }
}

/// One caller invocation. Built once by the UI layer and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteRequest {
    text: String,
    attachments: Vec<ImageAttachment>,
    style: Style,
    aggressiveness: f64,
    skill: Option<Skill>,
    streaming: bool,
}

impl RewriteRequest {
    pub fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
            style,
            aggressiveness: 0.5,
            skill: None,
            streaming: true,
        }
    }

    /// Clamped into `0.0..=1.0`; NaN falls back to the default.
    pub fn with_aggressiveness(mut self, aggressiveness: f64) -> Self {
        self.aggressiveness = if aggressiveness.is_nan() {
            0.5
        } else {
            aggressiveness.clamp(0.0, 1.0)
        };
        self
    }

    pub fn with_skill(mut self, skill: Skill) -> Self {
        self.skill = Some(skill);
        self
    }

    pub fn with_attachment(mut self, attachment: ImageAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn attachments(&self) -> &[ImageAttachment] {
        &self.attachments
    }

    pub fn style(&self) -> Style {
        self.style
    }

    pub fn aggressiveness(&self) -> f64 {
        self.aggressiveness
    }

    pub fn skill(&self) -> Option<&Skill> {
        self.skill.as_ref()
    }

    pub fn streaming(&self) -> bool {
        self.streaming
    }
}

/// Discrete effort tier for models that take one instead of a temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EffortTier {
    Low,
    Medium,
    High,
}

/// How randomness is requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    Temperature(f64),
    Effort(EffortTier),
}

/// Everything an adapter needs to issue one wire request.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub model: String,
    pub system_prompt: String,
    /// Source text already wrapped in transform markers.
    pub user_text: String,
    pub attachments: Vec<ImageAttachment>,
    pub sampling: Sampling,
    pub stream: bool,
}

impl BackendRequest {
    pub fn temperature(&self) -> Option<f64> {
        match self.sampling {
            Sampling::Temperature(t) => Some(t),
            Sampling::Effort(_) => None,
        }
    }
}
