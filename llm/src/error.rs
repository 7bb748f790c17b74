use serde_json::Value;

const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("no API key configured for {0}")]
    MissingApiKey(&'static str),

    #[error("API key contains characters that cannot be sent in a header")]
    InvalidApiKey,

    #[error("request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    /// The account ran out of credits or hit a billing limit.
    #[error("{message}")]
    Quota {
        message: String,
        upgrade_url: Option<String>,
    },

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Classify a non-2xx response from its status and body.
    pub fn from_status(status: u16, body: &str, upgrade_url: Option<&str>) -> Self {
        let value = serde_json::from_str::<Value>(body).ok();
        let error = value
            .as_ref()
            .and_then(|v| v.get("error").or_else(|| v.get("detail")));
        classify(Some(status), error, body, upgrade_url)
    }

    /// Classify an `{"error": ...}` object delivered inside a stream.
    pub fn from_error_value(error: &Value, upgrade_url: Option<&str>) -> Self {
        classify(None, Some(error), "", upgrade_url)
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, LlmError::Quota { .. })
    }

    pub fn upgrade_url(&self) -> Option<&str> {
        match self {
            LlmError::Quota { upgrade_url, .. } => upgrade_url.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::Http { status, .. } => Some(*status),
            LlmError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Missing or rejected credentials, as opposed to a transient failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LlmError::MissingApiKey(_) | LlmError::InvalidApiKey | LlmError::Http { status: 401, .. }
        )
    }
}

fn error_message(error: &Value) -> Option<String> {
    match error {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn classify(
    status: Option<u16>,
    error: Option<&Value>,
    body: &str,
    upgrade_url: Option<&str>,
) -> LlmError {
    let message = error.and_then(error_message).unwrap_or_else(|| {
        let body = body.trim();
        if body.is_empty() {
            "no error details".to_string()
        } else {
            crate::traffic_log::truncate_for_log(body, MAX_ERROR_BODY_CHARS)
        }
    });

    let code = error.and_then(|e| e.get("code"));
    let kind = error
        .and_then(|e| e.get("type").or_else(|| e.get("status")))
        .and_then(Value::as_str);

    let code_is_quota = match code {
        Some(Value::String(s)) => s == "insufficient_quota" || s == "quota_exceeded",
        Some(Value::Number(n)) => n.as_u64() == Some(402),
        _ => false,
    };
    let kind_is_quota = matches!(kind, Some("insufficient_quota") | Some("quota_exceeded"));
    let lower = message.to_lowercase();
    let mentions_quota = ["credit", "quota", "billing"]
        .iter()
        .any(|word| lower.contains(word));

    if status == Some(402) || code_is_quota || kind_is_quota || mentions_quota {
        return LlmError::Quota {
            message,
            upgrade_url: upgrade_url.map(str::to_string),
        };
    }

    let status = status.or_else(|| {
        code.and_then(Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
    });
    match status {
        Some(status) => LlmError::Http { status, message },
        None => LlmError::Stream(message),
    }
}
