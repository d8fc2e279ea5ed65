use crate::llm::types::{BackendKind, RewriteRequest};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Content address of one rewrite: backend, model, source text and every
/// option that changes the output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

impl CacheKey {
    pub fn for_request(backend: BackendKind, model: &str, request: &RewriteRequest) -> Self {
        let aggressiveness = (request.aggressiveness() * 100.0).round() / 100.0;
        let image_hashes: Vec<&str> = request
            .attachments()
            .iter()
            .map(|image| image.content_hash())
            .collect();
        let options = format!(
            "style={}|aggressiveness={aggressiveness:.2}|skill={}|images={}",
            request.style(),
            request.skill().map_or("", |skill| skill.id.as_str()),
            image_hashes.join(","),
        );
        Self(format!(
            "{backend}|{model}|{}|{}",
            sha256_hex(request.text()),
            sha256_hex(&options)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CacheKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}
