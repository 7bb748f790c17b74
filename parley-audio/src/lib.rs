//! Voice output and input for parley
//!
//! This crate provides:
//! - `SpeechPlayer`: text-to-speech playback with at most one active playback
//! - `VoiceSession`: microphone recording and transcription
//! - Backend traits (`AudioPlayer`, `AudioRecorder`) and a dummy backend for
//!   builds without native audio

pub mod dummy_backend;
pub mod error;
pub mod speech;
pub mod traits;
pub mod voice;

pub use dummy_backend::{DummyAudioPlayer, DummyRecorder};
pub use error::VoiceError;
pub use speech::{PlaybackState, SpeechPlayer};
pub use traits::{AudioPlayer, AudioRecorder, Recording};
pub use voice::{VoiceSession, VoiceState};
