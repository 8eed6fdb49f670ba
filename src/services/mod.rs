//! Provider contracts and the pipeline stages that drive them.
//!
//! Speech recognition, language generation and speech synthesis are
//! external capabilities. The core only sees the narrow traits below; the
//! stages in this module adapt them to the frame protocol.

pub mod llm;
pub mod openai;
pub mod sse;
pub mod stt;
pub mod tts;

pub use llm::LlmStage;
pub use openai::OpenAiLlm;
pub use stt::SttStage;
pub use tts::TtsStage;

use crate::context::ContextSnapshot;
use crate::error::ProviderError;
use crate::pipeline::frames::SynthesizedAudio;
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use std::time::Instant;

/// A boxed stream of generated text fragments.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// A boxed stream of synthesized audio blocks.
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<SynthesizedAudio, ProviderError>> + Send>>;

/// Audio for one user utterance, accumulated by the STT stage.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Concatenated samples for the utterance so far.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// When the first chunk of the utterance was captured.
    pub started_at: Instant,
}

/// Speech-to-text capability.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn name(&self) -> &str;

    /// Produce the final transcript for a completed utterance.
    async fn transcribe(&self, utterance: &Utterance) -> Result<String, ProviderError>;

    /// Best-effort hypothesis for an utterance still in progress.
    async fn interim(&self, _utterance: &Utterance) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }

    /// Release any open model or network handles.
    async fn close(&self) {}
}

/// Language-generation capability.
///
/// The snapshot is the whole history; its last user entry is the message
/// being answered. A snapshot with no user entry asks for an opening line.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Start generating a reply. The stream ends when the reply is complete.
    async fn generate(&self, context: &ContextSnapshot) -> Result<TokenStream, ProviderError>;
}

/// Text-to-speech capability.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    fn name(&self) -> &str;

    /// Opaque voice identity the provider speaks with.
    fn voice_id(&self) -> &str;

    /// Synthesize one sentence or clause.
    async fn synthesize(&self, text: &str) -> Result<AudioStream, ProviderError>;

    /// Release any open model or network handles.
    async fn close(&self) {}
}
