use llm::LlmError;
use std::time::Duration;

const GENERIC_DISMISS: Duration = Duration::from_secs(5);
const CONFIGURATION_DISMISS: Duration = Duration::from_secs(6);
const QUOTA_DISMISS: Duration = Duration::from_secs(15);

/// Why a send attempt did not produce a committed turn.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("no OpenRouter API key configured")]
    MissingCredential,

    #[error("a response is already streaming in this conversation")]
    AlreadyStreaming,

    #[error(transparent)]
    Provider(LlmError),

    #[error("image generation failed: {0}")]
    Image(LlmError),

    #[error("cancelled")]
    Cancelled,
}

impl SendError {
    /// The banner this failure shows, if any.
    pub fn notice(&self) -> Option<ErrorNotice> {
        match self {
            SendError::EmptyMessage | SendError::Cancelled => None,
            SendError::MissingCredential => Some(ErrorNotice::configuration(
                "Add an OpenRouter API key in Settings to start chatting.",
            )),
            SendError::AlreadyStreaming => Some(ErrorNotice::generic(
                "Wait for the current response to finish.",
            )),
            SendError::Provider(e) => Some(ErrorNotice::from_llm(e)),
            SendError::Image(e) => Some(match e {
                LlmError::Quota { .. } => ErrorNotice::from_llm(e),
                _ => ErrorNotice::generic(format!("Image generation failed: {e}")),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    Generic,
    Configuration,
    /// Out of credits; `upgrade_url` points at the provider's billing page
    Quota { upgrade_url: Option<String> },
}

/// A dismissible, auto-expiring user-visible error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
    pub kind: NoticeKind,
    pub dismiss_after: Duration,
}

impl ErrorNotice {
    pub fn generic(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: NoticeKind::Generic,
            dismiss_after: GENERIC_DISMISS,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: NoticeKind::Configuration,
            dismiss_after: CONFIGURATION_DISMISS,
        }
    }

    pub fn quota(message: impl Into<String>, upgrade_url: Option<String>) -> Self {
        Self {
            message: message.into(),
            kind: NoticeKind::Quota { upgrade_url },
            dismiss_after: QUOTA_DISMISS,
        }
    }

    pub fn from_llm(error: &LlmError) -> Self {
        match error {
            LlmError::Quota {
                message,
                upgrade_url,
            } => Self::quota(
                format!("You're out of credits: {message}"),
                upgrade_url.clone(),
            ),
            e if e.is_configuration() => Self::configuration(format!(
                "Check your API key in Settings ({e})"
            )),
            e => Self::generic(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_notice_lasts_longer() {
        let quota = LlmError::from_status(402, r#"{"error":{"message":"Insufficient credits"}}"#, Some("https://openrouter.ai/settings/credits"));
        let notice = ErrorNotice::from_llm(&quota);
        assert_eq!(
            notice.kind,
            NoticeKind::Quota {
                upgrade_url: Some("https://openrouter.ai/settings/credits".into())
            }
        );
        assert!(notice.dismiss_after > ErrorNotice::generic("x").dismiss_after);
    }

    #[test]
    fn test_configuration_notice() {
        let notice = SendError::MissingCredential.notice().unwrap();
        assert_eq!(notice.kind, NoticeKind::Configuration);

        let unauthorized = LlmError::Http {
            status: 401,
            message: "No auth credentials found".into(),
        };
        assert_eq!(ErrorNotice::from_llm(&unauthorized).kind, NoticeKind::Configuration);
    }

    #[test]
    fn test_silent_failures() {
        assert!(SendError::Cancelled.notice().is_none());
        assert!(SendError::EmptyMessage.notice().is_none());
    }

    #[test]
    fn test_generic_notice() {
        let err = SendError::Provider(LlmError::Http {
            status: 500,
            message: "boom".into(),
        });
        let notice = err.notice().unwrap();
        assert_eq!(notice.kind, NoticeKind::Generic);
        assert_eq!(notice.dismiss_after, Duration::from_secs(5));
        assert!(notice.message.contains("boom"));
    }
}
