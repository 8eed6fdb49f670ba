//! Speech synthesis stage with clause-level chunking.

use crate::error::ProviderError;
use crate::pipeline::frames::{ControlMarker, Frame, Speaker};
use crate::pipeline::metrics::Usage;
use crate::pipeline::stage::{Emitter, Stage};
use crate::services::TextToSpeech;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::debug;

/// Minimum buffered length (bytes) before splitting on clause punctuation.
const CLAUSE_MIN_LEN: usize = 20;

/// Byte index of the first sentence-ending character (`.`, `!`, `?`, `\n`)
/// that is followed by whitespace or the end of the text.
fn find_sentence_boundary(text: &str) -> Option<usize> {
    text.char_indices().find_map(|(i, c)| {
        if !matches!(c, '.' | '!' | '?' | '\n') {
            return None;
        }
        let rest = &text[i + c.len_utf8()..];
        (rest.is_empty() || rest.starts_with([' ', '\n'])).then_some(i)
    })
}

/// Byte index of the last byte of the best place to cut `text` for
/// synthesis.
///
/// Sentence ends win. Past [`CLAUSE_MIN_LEN`] the last clause mark
/// (`, ; :` and dashes) followed by a space also counts.
fn find_clause_boundary(text: &str) -> Option<usize> {
    if let Some(pos) = find_sentence_boundary(text) {
        return Some(pos);
    }
    if text.len() < CLAUSE_MIN_LEN {
        return None;
    }
    text.char_indices()
        .rev()
        .find(|&(i, c)| {
            matches!(c, ',' | ';' | ':' | '\u{2014}' | '\u{2013}') && {
                let rest = &text[i + c.len_utf8()..];
                rest.is_empty() || rest.starts_with(' ')
            }
        })
        // Last byte of the mark, so `[..=pos]` stays on a char boundary.
        .map(|(i, c)| i + c.len_utf8() - 1)
}

/// Converts streamed assistant text into audio.
///
/// Text frames are forwarded unchanged (the assistant aggregator needs
/// them) and buffered; each completed sentence or long clause is
/// synthesized and its audio emitted right after. The assistant's
/// end-of-turn marker flushes the remainder before it is forwarded.
pub struct TtsStage {
    provider: Arc<dyn TextToSpeech>,
    sentence_buffer: String,
}

impl TtsStage {
    pub fn new(provider: Arc<dyn TextToSpeech>) -> Self {
        Self {
            provider,
            sentence_buffer: String::new(),
        }
    }

    async fn speak(&self, text: &str, out: &mut Emitter) -> Result<(), ProviderError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        debug!(voice = self.provider.voice_id(), "synthesizing: {text}");
        let characters = u64::try_from(text.chars().count()).unwrap_or(u64::MAX);
        out.record_usage(Usage::TtsCharacters(characters));
        let mut audio = self.provider.synthesize(text).await?;
        while let Some(block) = audio.next().await {
            let block = block?;
            if !block.samples.is_empty() {
                out.push(Frame::OutputAudio(block)).await?;
            }
        }
        Ok(())
    }

    async fn speak_ready_clauses(&mut self, out: &mut Emitter) -> Result<(), ProviderError> {
        while let Some(pos) = find_clause_boundary(&self.sentence_buffer) {
            let clause: String = self.sentence_buffer.drain(..=pos).collect();
            self.speak(&clause, out).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for TtsStage {
    fn name(&self) -> &str {
        "tts"
    }

    async fn process(&mut self, frame: Frame, out: &mut Emitter) -> Result<(), ProviderError> {
        match frame {
            Frame::Text(t) => {
                self.sentence_buffer.push_str(&t.text);
                out.push(Frame::Text(t)).await?;
                self.speak_ready_clauses(out).await
            }
            Frame::Control(ControlMarker::EndOfTurn(Speaker::Assistant)) => {
                let rest = std::mem::take(&mut self.sentence_buffer);
                let spoken = self.speak(&rest, out).await;
                out.push(frame).await?;
                spoken
            }
            Frame::Control(ControlMarker::StartOfTurn(Speaker::Assistant))
            | Frame::Control(ControlMarker::Cancel) => {
                self.sentence_buffer.clear();
                out.push(frame).await
            }
            other => out.push(other).await,
        }
    }

    async fn shutdown(&mut self) {
        self.sentence_buffer.clear();
        self.provider.close().await;
    }
}
