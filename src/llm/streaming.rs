//! Streaming assembly shared by the cloud adapters.
//!
//! Each adapter supplies an extractor that pulls whatever it can out of one
//! decoded event; [`drive_sse`] handles transport, decoding, merging and the
//! end-of-stream decision.

use super::http::map_transport_error;
use super::merge::merge_into;
use super::sse::{LineBuffer, SseDecoder, SseEvent};
use crate::error::{BackendResult, RewriteError};
use futures_util::StreamExt;
use reqwest::Response;
use serde::de::DeserializeOwned;

/// What an adapter found in a single event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// Incremental fragment.
    pub delta: Option<String>,
    /// Full output so far.
    pub snapshot: Option<String>,
    /// Error message surfaced mid-stream by the backend.
    pub error: Option<String>,
    pub stop_reason: Option<String>,
}

impl Extracted {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn snapshot(text: impl Into<String>) -> Self {
        Self {
            snapshot: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Per-request output accumulator.
///
/// Text only grows; errors are remembered but never end the stream early.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    error: Option<String>,
    stop_reason: Option<String>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one extraction in. Returns true when the text grew.
    pub fn feed(&mut self, extracted: Extracted) -> bool {
        let mut grew = false;
        for candidate in [extracted.snapshot, extracted.delta].into_iter().flatten() {
            if candidate.is_empty() {
                continue;
            }
            grew |= merge_into(&mut self.text, &candidate);
        }
        if let Some(error) = extracted.error.filter(|e| !e.trim().is_empty()) {
            self.error = Some(error);
        }
        if let Some(reason) = extracted.stop_reason.filter(|r| !r.trim().is_empty()) {
            self.stop_reason = Some(reason);
        }
        grew
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Success with the text if any arrived, else the most specific failure.
    pub fn finish(self) -> BackendResult {
        if !self.text.is_empty() {
            return Ok(self.text);
        }
        if let Some(error) = self.error {
            return Err(RewriteError::Stream(error));
        }
        if let Some(reason) = self.stop_reason {
            return Err(RewriteError::invalid_response(format!(
                "stream ended without text (stop reason: {reason})"
            )));
        }
        Err(RewriteError::invalid_response("stream ended without text"))
    }
}

/// Consume an SSE response body to completion.
///
/// `extract` is called for every non-`[DONE]` event; `on_partial` fires with
/// the full accumulated text each time it grows. A transport failure fails the
/// request even when some text already arrived.
pub async fn drive_sse<F>(
    response: Response,
    mut extract: F,
    on_partial: &(dyn Fn(&str) + Send + Sync),
) -> BackendResult
where
    F: FnMut(&SseEvent) -> Extracted + Send,
{
    let mut lines = LineBuffer::new();
    let mut decoder = SseDecoder::new();
    let mut accumulator = StreamAccumulator::new();
    let mut body = response.bytes_stream();

    let mut handle_event = |event: SseEvent, accumulator: &mut StreamAccumulator| -> bool {
        if event.is_done_marker() {
            return true;
        }
        if accumulator.feed(extract(&event)) {
            on_partial(accumulator.text());
        }
        false
    };

    'read: while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => {
                // Partials already delivered stay with the caller; a cut-off
                // stream is never a complete result.
                tracing::debug!(%error, received = accumulator.text().len(), "stream transport error");
                return Err(map_transport_error(&error));
            }
        };
        lines.push_chunk(&chunk);
        while let Some(line) = lines.next_line() {
            if let Some(event) = decoder.push_line(&line)
                && handle_event(event, &mut accumulator)
            {
                break 'read;
            }
        }
    }

    if let Some(tail) = lines.finish()
        && let Some(event) = decoder.push_line(&tail)
    {
        handle_event(event, &mut accumulator);
    }
    if let Some(event) = decoder.finish() {
        handle_event(event, &mut accumulator);
    }

    accumulator.finish()
}

/// Read a whole JSON body into `T`, mapping transport and shape failures.
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, RewriteError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| map_transport_error(&e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RewriteError::invalid_response(format!("unexpected response body: {e}")))
}

/// Parse one event payload, logging and skipping anything that is not `T`.
pub fn parse_event<T: DeserializeOwned>(backend: &str, event: &SseEvent) -> Option<T> {
    match serde_json::from_str(&event.data) {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            tracing::debug!(backend, %error, "skipping unparsable stream event");
            None
        }
    }
}
