//! Transport-facing types: channel lifecycle events and the output stage.
//!
//! The physical audio transport lives outside this crate. It reports
//! connects and disconnects as [`ChannelEvent`]s, feeds captured audio into
//! the session's input queue, and receives synthesized audio from
//! [`TransportOutputStage`].

pub use crate::vad::{EnergyVad, VadEvent, VadStage};

use crate::error::ProviderError;
use crate::pipeline::frames::{Frame, SynthesizedAudio};
use crate::pipeline::stage::{Emitter, Stage};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// What the transport knows about a connected channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Transport-assigned channel id, unique among live channels.
    pub id: String,
    /// The caller's UTC offset in minutes, when the transport reports one.
    pub utc_offset_minutes: Option<i32>,
}

impl ChannelInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            utc_offset_minutes: None,
        }
    }

    pub fn with_utc_offset(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = Some(minutes);
        self
    }
}

/// Channel lifecycle notification, delivered once per transition in
/// transport order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected(ChannelInfo),
    Disconnected(String),
}

impl ChannelEvent {
    pub fn channel_id(&self) -> &str {
        match self {
            Self::Connected(info) => &info.id,
            Self::Disconnected(id) => id,
        }
    }
}

/// Delivers synthesized audio to the transport's speaker sink.
///
/// Audio frames are consumed; every other frame continues downstream so
/// the assistant aggregator after this stage still sees the reply.
pub struct TransportOutputStage {
    sink: mpsc::Sender<SynthesizedAudio>,
}

impl TransportOutputStage {
    pub fn new(sink: mpsc::Sender<SynthesizedAudio>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Stage for TransportOutputStage {
    fn name(&self) -> &str {
        "transport_output"
    }

    async fn process(&mut self, frame: Frame, out: &mut Emitter) -> Result<(), ProviderError> {
        match frame {
            Frame::OutputAudio(audio) => self
                .sink
                .send(audio)
                .await
                .map_err(|_| ProviderError::Closed("transport output closed".into())),
            other => out.push(other).await,
        }
    }
}
