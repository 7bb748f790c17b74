pub(crate) mod chat;
pub(crate) mod images;
pub(crate) mod provider;
pub(crate) mod transcription;

pub use chat::OpenAIChatModel;
pub use images::OpenAIImageModel;
pub use provider::{OPENAI_BASE_URL, OPENROUTER_BASE_URL, OpenAIProvider};
pub use transcription::OpenAITranscriber;
