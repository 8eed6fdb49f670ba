//! Shared helpers for integration tests.
//!
//! Scripted providers stand in for speech recognition, the language model
//! and speech synthesis so whole sessions run without network or audio.

use async_trait::async_trait;
use futures_util::StreamExt;
use gaia::config::{ClockBasis, GaiaConfig, VadConfig};
use gaia::context::{AssistantContextAggregator, ContextSnapshot, UserContextAggregator};
use gaia::error::ProviderError;
use gaia::pipeline::frames::{AudioChunk, SynthesizedAudio};
use gaia::services::{
    AudioStream, LanguageModel, LlmStage, SpeechToText, SttStage, TextToSpeech, TokenStream,
    TtsStage, Utterance,
};
use gaia::session::FixedClock;
use gaia::transport::{TransportOutputStage, VadStage};
use gaia::{ChannelInfo, ConversationContext, Frame, Pipeline, SessionController, SessionFactory};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Reply the scripted model gives to the opening snapshot.
pub(crate) const GREETING_REPLY: &str = "Hi, this is Gaia. How can I help you today?";

/// STT that returns the same transcript for every utterance.
pub(crate) struct ScriptedStt {
    pub text: String,
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    fn name(&self) -> &str {
        "scripted-stt"
    }

    async fn transcribe(&self, _utterance: &Utterance) -> Result<String, ProviderError> {
        Ok(self.text.clone())
    }
}

/// Language model that records every snapshot it is asked about.
///
/// The opening snapshot gets [`GREETING_REPLY`]; a snapshot ending in a
/// user message gets "You said: <text>". Each word is a separate token,
/// delayed by `token_delay`.
#[derive(Default)]
pub(crate) struct ScriptedLlm {
    pub token_delay: Duration,
    pub prompts: Mutex<Vec<ContextSnapshot>>,
}

impl ScriptedLlm {
    pub(crate) fn slow(token_delay: Duration) -> Self {
        Self {
            token_delay,
            ..Self::default()
        }
    }

    pub(crate) fn prompts(&self) -> Vec<ContextSnapshot> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted-llm"
    }

    async fn generate(&self, context: &ContextSnapshot) -> Result<TokenStream, ProviderError> {
        self.prompts.lock().unwrap().push(context.clone());
        let reply = match context.last() {
            Some(m) if m.role == gaia::Role::User => format!("You said: {}", m.content),
            _ => GREETING_REPLY.to_owned(),
        };
        let tokens: Vec<String> = reply.split_inclusive(' ').map(str::to_owned).collect();
        let delay = self.token_delay;
        Ok(Box::pin(futures_util::stream::iter(tokens).then(
            move |token| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, ProviderError>(token)
            },
        )))
    }
}

/// TTS that turns every character into one silent sample.
pub(crate) struct ScriptedTts;

#[async_trait]
impl TextToSpeech for ScriptedTts {
    fn name(&self) -> &str {
        "scripted-tts"
    }

    fn voice_id(&self) -> &str {
        "test-voice"
    }

    async fn synthesize(&self, text: &str) -> Result<AudioStream, ProviderError> {
        let block = SynthesizedAudio {
            samples: vec![0.0; text.len()],
            sample_rate: 24_000,
        };
        Ok(Box::pin(futures_util::stream::iter(vec![Ok(block)])))
    }
}

/// Builds the full audio pipeline and remembers each session's context.
pub(crate) struct TestFactory {
    pub stt: Arc<ScriptedStt>,
    pub llm: Arc<ScriptedLlm>,
    pub vad: VadConfig,
    pub audio_out: mpsc::Sender<SynthesizedAudio>,
    pub contexts: Mutex<HashMap<String, ConversationContext>>,
}

impl TestFactory {
    pub(crate) fn new(llm: ScriptedLlm) -> (Arc<Self>, mpsc::Receiver<SynthesizedAudio>) {
        let (audio_out, audio_rx) = mpsc::channel(256);
        let factory = Arc::new(Self {
            stt: Arc::new(ScriptedStt {
                text: "hello".to_owned(),
            }),
            llm: Arc::new(llm),
            vad: VadConfig {
                threshold: 0.01,
                min_silence_duration_ms: 200,
                min_speech_duration_ms: 100,
            },
            audio_out,
            contexts: Mutex::new(HashMap::new()),
        });
        (factory, audio_rx)
    }

    pub(crate) fn context(&self, channel: &str) -> ConversationContext {
        self.contexts
            .lock()
            .unwrap()
            .get(channel)
            .cloned()
            .expect("no session was built for channel")
    }
}

impl SessionFactory for TestFactory {
    fn build(&self, channel: &ChannelInfo, context: ConversationContext) -> gaia::Result<Pipeline> {
        self.contexts
            .lock()
            .unwrap()
            .insert(channel.id.clone(), context.clone());
        let stt: Arc<dyn SpeechToText> = self.stt.clone();
        let llm: Arc<dyn LanguageModel> = self.llm.clone();
        Ok(Pipeline::new(vec![
            Box::new(VadStage::new(&self.vad)),
            Box::new(SttStage::new(stt, &Default::default())),
            Box::new(UserContextAggregator::new(context.clone())),
            Box::new(LlmStage::new(llm)),
            Box::new(TtsStage::new(Arc::new(ScriptedTts))),
            Box::new(TransportOutputStage::new(self.audio_out.clone())),
            Box::new(AssistantContextAggregator::new(context)),
        ]))
    }
}

/// Default config with the clock read as UTC and the given persona prompt.
pub(crate) fn test_config(persona_prompt: &str) -> GaiaConfig {
    let mut config = GaiaConfig::default();
    config.persona.system_prompt = persona_prompt.to_owned();
    config.greeting.clock = ClockBasis::Utc;
    config
}

/// A controller whose clock is stopped at `hour`:00 UTC.
pub(crate) fn controller_at(
    hour: u32,
    config: &GaiaConfig,
    factory: Arc<TestFactory>,
) -> SessionController {
    SessionController::new(config, factory).with_clock(Arc::new(FixedClock::at_utc_hour(hour)))
}

/// 100 ms of audio carrying the transport's voice-activity hint.
pub(crate) fn audio_chunk(voiced: bool) -> Frame {
    let level = if voiced { 0.3 } else { 0.0 };
    Frame::InputAudio(AudioChunk::new(vec![level; 1600], 16_000).with_voice_activity(voiced))
}

/// Poll `check` until it holds, failing the test after three seconds.
pub(crate) async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
