//! Voice activity detection and utterance segmentation.
//!
//! Uses the transport's voice-activity hint when it has one and falls back
//! to RMS energy thresholding otherwise.

use crate::config::VadConfig;
use crate::error::ProviderError;
use crate::pipeline::frames::{AudioChunk, Frame, Speaker};
use crate::pipeline::stage::{Emitter, Stage};
use async_trait::async_trait;
use tracing::{debug, info};

/// What a single chunk meant for the current utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// No utterance in progress and the chunk is silent.
    Silence,
    /// The chunk opens a new utterance.
    SpeechStart,
    /// The chunk belongs to the utterance in progress.
    Speech,
    /// The chunk closes an utterance long enough to keep.
    SpeechEnd,
    /// The chunk closes an utterance too short to keep.
    TooShort,
}

/// Voice activity detector using hint or RMS energy thresholding.
#[derive(Debug)]
pub struct EnergyVad {
    threshold: f32,
    min_silence_ms: u64,
    min_speech_ms: u64,
    in_speech: bool,
    /// Voiced milliseconds in the current utterance.
    speech_ms: u64,
    /// Trailing silent milliseconds in the current utterance.
    silence_ms: u64,
}

impl EnergyVad {
    pub fn new(config: &VadConfig) -> Self {
        info!(
            "VAD initialized: threshold={}, min_silence={}ms, min_speech={}ms",
            config.threshold, config.min_silence_duration_ms, config.min_speech_duration_ms
        );
        Self {
            threshold: config.threshold,
            min_silence_ms: u64::from(config.min_silence_duration_ms),
            min_speech_ms: u64::from(config.min_speech_duration_ms),
            in_speech: false,
            speech_ms: 0,
            silence_ms: 0,
        }
    }

    /// Classify one chunk and advance the utterance state.
    pub fn process_chunk(&mut self, chunk: &AudioChunk) -> VadEvent {
        let is_speech = chunk
            .voice_activity
            .unwrap_or_else(|| compute_rms_energy(&chunk.samples) > self.threshold);
        let chunk_ms = chunk_duration_ms(chunk);

        match (self.in_speech, is_speech) {
            (false, false) => VadEvent::Silence,
            (false, true) => {
                self.in_speech = true;
                self.speech_ms = chunk_ms;
                self.silence_ms = 0;
                VadEvent::SpeechStart
            }
            (true, true) => {
                self.speech_ms += chunk_ms;
                self.silence_ms = 0;
                VadEvent::Speech
            }
            (true, false) => {
                self.silence_ms += chunk_ms;
                if self.silence_ms < self.min_silence_ms {
                    return VadEvent::Speech;
                }
                let voiced = self.speech_ms;
                self.reset();
                if voiced >= self.min_speech_ms {
                    VadEvent::SpeechEnd
                } else {
                    VadEvent::TooShort
                }
            }
        }
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Forget any utterance in progress.
    pub fn reset(&mut self) {
        self.in_speech = false;
        self.speech_ms = 0;
        self.silence_ms = 0;
    }
}

/// Compute RMS energy of audio samples.
fn compute_rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

fn chunk_duration_ms(chunk: &AudioChunk) -> u64 {
    if chunk.sample_rate == 0 {
        return 0;
    }
    chunk.samples.len() as u64 * 1000 / u64::from(chunk.sample_rate)
}

/// Head stage that turns a continuous audio feed into user turns.
///
/// Emits the user's start-of-turn marker before the first voiced chunk and
/// the end-of-turn marker after the trailing silence. Silence between
/// utterances is dropped. An utterance shorter than the configured minimum
/// is abandoned with a cancel marker.
pub struct VadStage {
    vad: EnergyVad,
}

impl VadStage {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            vad: EnergyVad::new(config),
        }
    }
}

#[async_trait]
impl Stage for VadStage {
    fn name(&self) -> &str {
        "vad"
    }

    async fn process(&mut self, frame: Frame, out: &mut Emitter) -> Result<(), ProviderError> {
        let Frame::InputAudio(chunk) = frame else {
            return out.push(frame).await;
        };
        match self.vad.process_chunk(&chunk) {
            VadEvent::Silence => Ok(()),
            VadEvent::SpeechStart => {
                debug!("speech started");
                out.push(Frame::start_of_turn(Speaker::User)).await?;
                out.push(Frame::InputAudio(chunk)).await
            }
            VadEvent::Speech => out.push(Frame::InputAudio(chunk)).await,
            VadEvent::SpeechEnd => {
                debug!("speech ended");
                out.push(Frame::InputAudio(chunk)).await?;
                out.push(Frame::end_of_turn(Speaker::User)).await
            }
            VadEvent::TooShort => {
                debug!("utterance too short, discarding");
                out.push(Frame::cancel()).await
            }
        }
    }

    async fn shutdown(&mut self) {
        self.vad.reset();
    }
}
