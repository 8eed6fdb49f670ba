//! Configuration types for the voice agent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration, loaded once at startup and read-only afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GaiaConfig {
    /// Who the assistant is.
    pub persona: PersonaConfig,
    /// Connect-time greeting directive.
    pub greeting: GreetingConfig,
    /// Queue sizes and fault budget for every session pipeline.
    pub pipeline: PipelineConfig,
    /// Voice activity detection settings.
    pub vad: VadConfig,
    /// Speech-to-text stage settings.
    pub stt: SttConfig,
    /// Language model settings.
    pub llm: LlmConfig,
    /// Text-to-speech settings.
    pub tts: TtsConfig,
    /// Audio transport settings.
    pub transport: TransportConfig,
}

const DEFAULT_PERSONA_PROMPT: &str = "\
You are Gaia, a friendly and professional insurance assistant for Mutual of Omaha. Your personality is:

PERSONALITY TRAITS:
- Warm, caring, and genuinely interested in helping families
- Patient and understanding, especially with seniors
- Knowledgeable but never condescending
- Trustworthy and reliable - you've been helping families for years
- Empathetic listener who remembers personal details

YOUR ROLE:
1. Warmly introduce yourself as Gaia from Mutual of Omaha
2. Identify their insurance needs with genuine care
3. Qualify prospects for Medicare, Life, Disability, or Annuity products
4. Capture information for specialist follow-up
5. Never be pushy - focus on helping them find the right protection

COMPANY CONTEXT:
- Mutual of Omaha has served families since 1909 - over 115 years of trust
- We specialize in Medicare Supplement, Life Insurance, and Financial products
- Our mission is protecting families' financial security and peace of mind

CONVERSATION STYLE:
- Speak naturally and conversationally (under 20 words per response)
- Use their name once you learn it
- Ask ONE question at a time
- Show genuine concern: \"I want to make sure you're properly protected\"
- Reference your experience: \"In my years helping families...\"

QUALIFICATION PROCESS:
1. \"Hi, this is Gaia from Mutual of Omaha. I'm here to help with your insurance needs.\"
2. Get their name and ask if they have a few minutes to chat
3. \"What brings you to Mutual of Omaha today?\" (discover their interest)
4. Qualify: age range, current coverage, timeline, specific concerns
5. Collect contact info with care: \"What's the best number to reach you?\"
6. \"I'll have one of our specialists call you. They'll take great care of you.\"

Start by introducing yourself as Gaia and ask how you can help them today.";

/// Assistant persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    /// Name the assistant introduces itself with.
    pub name: String,
    /// System prompt placed first in every session's context.
    ///
    /// Empty means the context starts with the greeting directive.
    pub system_prompt: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "Gaia from Mutual of Omaha".to_owned(),
            system_prompt: DEFAULT_PERSONA_PROMPT.to_owned(),
        }
    }
}

/// Which wall clock the business-hours rule reads.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClockBasis {
    /// Local time of the machine running the agent.
    #[default]
    ServerLocal,
    /// UTC.
    Utc,
    /// A fixed offset from UTC.
    FixedOffset { minutes: i32 },
}

/// Greeting directive chosen on connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GreetingConfig {
    /// First hour (0-23) that counts as business hours.
    pub business_start_hour: u32,
    /// Last hour (0-23) that counts as business hours, inclusive.
    pub business_end_hour: u32,
    /// Clock used when the channel does not report its own offset.
    pub clock: ClockBasis,
    /// Use the channel's UTC offset when the transport supplies one.
    pub prefer_channel_offset: bool,
    /// Directive used outside business hours.
    pub off_hours_directive: String,
    /// Directive used during business hours.
    pub business_hours_directive: String,
    /// System message template. `{name}` and `{directive}` are substituted.
    pub intro_template: String,
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            business_start_hour: 8,
            business_end_hour: 17,
            clock: ClockBasis::ServerLocal,
            prefer_channel_offset: true,
            off_hours_directive:
                "Explain that you're available after hours to help with their insurance needs."
                    .to_owned(),
            business_hours_directive:
                "Explain that you're here to help while our other agents are with other families."
                    .to_owned(),
            intro_template:
                "Start by warmly introducing yourself as {name}. {directive} Ask how you can help them today."
                    .to_owned(),
        }
    }
}

/// Session pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of every inter-stage queue.
    pub queue_capacity: usize,
    /// Capacity of the transport input queue feeding the pipeline head.
    pub input_capacity: usize,
    /// Consecutive faults a stage may report before the session is failed.
    pub max_consecutive_faults: u32,
    /// Collect per-stage processing counters.
    pub enable_metrics: bool,
    /// Collect provider usage: language model tokens and synthesized
    /// characters.
    pub enable_usage_metrics: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            input_capacity: 64,
            max_consecutive_faults: 3,
            enable_metrics: true,
            enable_usage_metrics: true,
        }
    }
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS energy threshold for speech when the transport gives no hint.
    ///
    /// Typical values for f32 samples in \[-1, 1\]:
    ///   - 0.005: very sensitive
    ///   - 0.01:  normal sensitivity (default)
    ///   - 0.05:  only loud/close speech
    pub threshold: f32,
    /// Silence in ms that ends an utterance.
    pub min_silence_duration_ms: u32,
    /// Utterances shorter than this are discarded.
    pub min_speech_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            min_silence_duration_ms: 800,
            min_speech_duration_ms: 200,
        }
    }
}

/// Speech-to-text stage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Ask the provider for an interim hypothesis every N audio chunks.
    ///
    /// 0 disables interim transcripts.
    pub interim_every_chunks: u32,
}

/// Language model configuration (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the API server.
    pub api_url: String,
    /// Model identifier.
    pub model: String,
    /// Environment variable holding the API key. The key itself is never
    /// stored in the config file.
    pub api_key_env: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens per reply.
    pub max_tokens: Option<u32>,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            api_key_env: "OPENAI_API_KEY".to_owned(),
            temperature: 0.7,
            max_tokens: Some(256),
            request_timeout_secs: 30,
        }
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Opaque voice identity passed to the provider.
    pub voice_id: String,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice_id: "EXAVITQu4vr4xnSDxMaL".to_owned(),
            sample_rate: 24_000,
        }
    }
}

/// Which audio transport carries the conversation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Browser audio over WebRTC.
    #[default]
    WebRtc,
    /// Typed text on stdin/stdout, no audio.
    Console,
}

/// Audio transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: ChannelKind,
    /// Input sample rate in Hz.
    pub input_sample_rate: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: ChannelKind::WebRtc,
            input_sample_rate: 16_000,
        }
    }
}

impl GaiaConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::GaiaError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::GaiaError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/gaia/config.toml`.
    ///
    /// `GAIA_CONFIG_DIR` overrides the directory.
    pub fn default_config_path() -> PathBuf {
        if let Some(dir) = std::env::var_os("GAIA_CONFIG_DIR") {
            return PathBuf::from(dir).join("config.toml");
        }
        dirs::config_dir()
            .map(|d| d.join("gaia"))
            .unwrap_or_else(|| PathBuf::from("/tmp/gaia-config"))
            .join("config.toml")
    }
}
