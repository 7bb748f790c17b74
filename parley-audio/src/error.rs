use llm::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// The provider credential for this feature is missing.
    #[error("{0} API key is not configured")]
    NotConfigured(&'static str),

    #[error(transparent)]
    Provider(#[from] LlmError),

    #[error("audio backend error: {0:#}")]
    Backend(anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Message for the error banner.
    pub fn user_message(&self) -> String {
        match self {
            VoiceError::NotConfigured(provider) => {
                format!("Add your {provider} API key in Settings to use voice features.")
            }
            VoiceError::Provider(e) if e.is_quota() => format!("You're out of credits: {e}"),
            other => other.to_string(),
        }
    }
}
