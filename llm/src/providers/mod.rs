pub(crate) mod elevenlabs;
pub(crate) mod openai;
pub(crate) mod pollinations;

pub use elevenlabs::{ELEVENLABS_BASE_URL, ElevenLabsProvider};
pub use openai::{
    OPENAI_BASE_URL, OPENROUTER_BASE_URL, OpenAIChatModel, OpenAIImageModel, OpenAIProvider,
    OpenAITranscriber,
};
pub use pollinations::{POLLINATIONS_BASE_URL, PollinationsImageModel};
