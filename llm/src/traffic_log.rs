//! Traffic logging for provider API calls
//!
//! Everything goes to the `llm::traffic` target. Content is truncated to
//! avoid leaking private data in logs.

use serde::Serialize;

/// Maximum characters to log for content (to protect privacy)
const MAX_CONTENT_LOG_CHARS: usize = 200;

/// Truncate a string for logging, adding ellipsis if truncated
pub fn truncate_for_log(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{}... ({} chars total)", truncated, char_count)
    }
}

fn summarize(value: &impl Serialize) -> String {
    let json = serde_json::to_string(value).unwrap_or_else(|_| "<serialization error>".to_string());
    truncate_for_log(&json, MAX_CONTENT_LOG_CHARS)
}

pub fn log_request(model: &str, request: &impl Serialize) {
    tracing::debug!(target: "llm::traffic", model, "REQUEST {}", summarize(request));
}

pub fn log_response(model: &str, response: &impl Serialize) {
    tracing::debug!(target: "llm::traffic", model, "RESPONSE {}", summarize(response));
}

pub fn log_stream_start(model: &str, request: &impl Serialize) {
    tracing::debug!(target: "llm::traffic", model, "STREAM_START {}", summarize(request));
}

pub fn log_error(model: &str, error: &str) {
    tracing::warn!(
        target: "llm::traffic",
        model,
        "ERROR {}",
        truncate_for_log(error, MAX_CONTENT_LOG_CHARS)
    );
}
