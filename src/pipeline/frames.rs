//! Frame types passed between pipeline stages.

use crate::context::ContextSnapshot;
use std::fmt;
use std::time::Instant;

/// A block of raw audio samples from the transport.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples at `sample_rate`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Timestamp when this chunk was captured.
    pub captured_at: Instant,
    /// Voice-activity hint from the transport, if it has one.
    ///
    /// `None` means the transport does not know; the VAD stage falls back
    /// to energy detection.
    pub voice_activity: Option<bool>,
}

impl AudioChunk {
    /// Create a chunk captured now, without a voice-activity hint.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            captured_at: Instant::now(),
            voice_activity: None,
        }
    }

    /// Attach the transport's voice-activity hint.
    pub fn with_voice_activity(mut self, active: bool) -> Self {
        self.voice_activity = Some(active);
        self
    }
}

/// A transcription result from the STT provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    /// The transcribed text.
    pub text: String,
    /// Whether this is a final transcription (vs partial/streaming).
    pub is_final: bool,
    /// Time the transcription completed.
    pub transcribed_at: Instant,
}

impl Transcription {
    /// A final transcript, stamped now.
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            transcribed_at: Instant::now(),
        }
    }

    /// An interim hypothesis, stamped now.
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            transcribed_at: Instant::now(),
        }
    }
}

/// A text fragment emitted by the language model during streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFrame {
    /// The decoded text fragment.
    pub text: String,
}

/// Synthesized audio from TTS, ready for playback.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// f32 audio samples.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// Who a turn marker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    User,
    Assistant,
}

/// Control markers that delimit turns.
///
/// Stages forward markers unchanged unless they interpret them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMarker {
    /// A speaker started a turn.
    StartOfTurn(Speaker),
    /// A speaker finished a turn.
    EndOfTurn(Speaker),
    /// Abandon whatever turn is in progress.
    Cancel,
}

/// One unit of data flowing through the pipeline.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Raw microphone audio.
    InputAudio(AudioChunk),
    /// Partial or final user transcript.
    Transcription(Transcription),
    /// Read-only conversation history; asks the generation stage to respond.
    ContextSnapshot(ContextSnapshot),
    /// Generated assistant text.
    Text(TextFrame),
    /// Synthesized assistant audio.
    OutputAudio(SynthesizedAudio),
    /// Turn delimiters and cancellation.
    Control(ControlMarker),
}

impl Frame {
    /// The kind tag used in fault reports and metrics.
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::InputAudio(_) => FrameKind::InputAudio,
            Self::Transcription(_) => FrameKind::Transcription,
            Self::ContextSnapshot(_) => FrameKind::ContextSnapshot,
            Self::Text(_) => FrameKind::Text,
            Self::OutputAudio(_) => FrameKind::OutputAudio,
            Self::Control(_) => FrameKind::Control,
        }
    }

    /// Shorthand for a generated text fragment.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextFrame { text: text.into() })
    }

    pub fn start_of_turn(speaker: Speaker) -> Self {
        Self::Control(ControlMarker::StartOfTurn(speaker))
    }

    pub fn end_of_turn(speaker: Speaker) -> Self {
        Self::Control(ControlMarker::EndOfTurn(speaker))
    }

    pub fn cancel() -> Self {
        Self::Control(ControlMarker::Cancel)
    }
}

/// Discriminant of [`Frame`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    InputAudio,
    Transcription,
    ContextSnapshot,
    Text,
    OutputAudio,
    Control,
}

impl FrameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InputAudio => "input_audio",
            Self::Transcription => "transcription",
            Self::ContextSnapshot => "context_snapshot",
            Self::Text => "text",
            Self::OutputAudio => "output_audio",
            Self::Control => "control",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
