//! Speech-to-text stage.

use crate::config::SttConfig;
use crate::error::ProviderError;
use crate::pipeline::frames::{AudioChunk, ControlMarker, Frame, Speaker, Transcription};
use crate::pipeline::stage::{Emitter, Stage};
use crate::services::{SpeechToText, Utterance};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Buffers user audio and turns each utterance into a final transcript.
///
/// The user's end-of-turn marker flushes the buffer. Audio frames are
/// consumed; everything else is forwarded.
pub struct SttStage {
    provider: Arc<dyn SpeechToText>,
    utterance: Option<Utterance>,
    interim_every_chunks: u32,
    chunks_since_interim: u32,
}

impl SttStage {
    pub fn new(provider: Arc<dyn SpeechToText>, config: &SttConfig) -> Self {
        Self {
            provider,
            utterance: None,
            interim_every_chunks: config.interim_every_chunks,
            chunks_since_interim: 0,
        }
    }

    fn buffer(&mut self, chunk: AudioChunk) {
        self.chunks_since_interim += 1;
        let utterance = self.utterance.get_or_insert_with(|| Utterance {
            samples: Vec::new(),
            sample_rate: chunk.sample_rate,
            started_at: chunk.captured_at,
        });
        utterance.samples.extend_from_slice(&chunk.samples);
    }

    async fn flush(&mut self, out: &mut Emitter) -> Result<(), ProviderError> {
        self.chunks_since_interim = 0;
        let Some(utterance) = self.utterance.take() else {
            return Ok(());
        };
        if utterance.samples.is_empty() {
            return Ok(());
        }

        let duration_s = utterance.samples.len() as f32 / utterance.sample_rate.max(1) as f32;
        let text = self.provider.transcribe(&utterance).await?;
        let text = text.trim();
        if text.is_empty() {
            debug!("{duration_s:.1}s utterance produced no text");
            return Ok(());
        }
        info!("transcribed {duration_s:.1}s utterance: {text}");
        out.push(Frame::Transcription(Transcription::final_text(text)))
            .await
    }
}

#[async_trait]
impl Stage for SttStage {
    fn name(&self) -> &str {
        "stt"
    }

    async fn process(&mut self, frame: Frame, out: &mut Emitter) -> Result<(), ProviderError> {
        match frame {
            Frame::InputAudio(chunk) => {
                self.buffer(chunk);
                if self.interim_every_chunks == 0
                    || self.chunks_since_interim < self.interim_every_chunks
                {
                    return Ok(());
                }
                self.chunks_since_interim = 0;
                let Some(utterance) = self.utterance.as_ref() else {
                    return Ok(());
                };
                match self.provider.interim(utterance).await? {
                    Some(text) if !text.trim().is_empty() => {
                        out.push(Frame::Transcription(Transcription::partial(text.trim())))
                            .await
                    }
                    _ => Ok(()),
                }
            }
            Frame::Control(ControlMarker::StartOfTurn(Speaker::User)) => {
                self.utterance = None;
                self.chunks_since_interim = 0;
                out.push(frame).await
            }
            Frame::Control(ControlMarker::EndOfTurn(Speaker::User)) => {
                // The marker goes downstream even when transcription fails so
                // the user turn is still closed.
                let flushed = self.flush(out).await;
                out.push(frame).await?;
                flushed
            }
            Frame::Control(ControlMarker::Cancel) => {
                self.utterance = None;
                self.chunks_since_interim = 0;
                out.push(frame).await
            }
            other => out.push(other).await,
        }
    }

    async fn shutdown(&mut self) {
        self.utterance = None;
        self.provider.close().await;
    }
}
