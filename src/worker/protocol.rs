//! Line-delimited JSON spoken with the local model worker over stdin/stdout.
//!
//! One request object per line in, exactly one response object per line out,
//! strictly in order.

use crate::error::RewriteError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WorkerCommand {
    Ping,
    Generate {
        prompt: String,
        temperature: f64,
        max_tokens: u32,
    },
    Shutdown,
}

impl WorkerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Generate { .. } => "generate",
            Self::Shutdown => "shutdown",
        }
    }

    /// Serialized form including the trailing newline.
    pub fn to_line(&self) -> Result<String, RewriteError> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| RewriteError::local(format!("cannot encode worker command: {e}")))?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl WorkerResponse {
    pub fn is_ok(&self) -> bool {
        self.status == WorkerStatus::Ok
    }

    /// `status: error` becomes a local-unavailable failure carrying the
    /// worker's own message.
    pub fn into_result(self) -> Result<Self, RewriteError> {
        match self.status {
            WorkerStatus::Ok => Ok(self),
            WorkerStatus::Error => Err(RewriteError::local(
                self.message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "worker reported an error".to_string()),
            )),
        }
    }

    /// Text of a successful `generate` reply.
    pub fn into_output(self) -> Result<String, RewriteError> {
        self.into_result()?
            .output
            .ok_or_else(|| RewriteError::invalid_response("worker reply has no output"))
    }
}
