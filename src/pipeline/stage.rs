//! The stage contract and the output handle stages push frames into.

use crate::error::ProviderError;
use crate::pipeline::frames::Frame;
use crate::pipeline::metrics::{StageMetrics, Usage};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One element of a pipeline.
///
/// A stage receives frames one at a time, in arrival order, and pushes zero
/// or more frames downstream through the [`Emitter`]. It may keep internal
/// buffers between calls (audio accumulated until an utterance boundary,
/// text accumulated until a sentence boundary).
///
/// Returning an error discards the frame being processed and is reported as
/// a stage fault; the stage keeps running.
#[async_trait]
pub trait Stage: Send + 'static {
    /// Stable name used in logs, fault reports and metrics.
    fn name(&self) -> &str;

    /// Handle one frame.
    async fn process(&mut self, frame: Frame, out: &mut Emitter) -> Result<(), ProviderError>;

    /// Release provider handles. Called once when the stage loop exits.
    async fn shutdown(&mut self) {}
}

/// Where a stage's output goes.
///
/// Inside a running pipeline this is the bounded queue of the next stage;
/// [`Emitter::buffered`] collects frames in memory so a stage can be driven
/// directly.
#[derive(Debug)]
pub struct Emitter {
    inner: Sink,
    usage: Option<Arc<StageMetrics>>,
}

#[derive(Debug)]
enum Sink {
    Channel {
        tx: mpsc::Sender<Frame>,
        cancel: CancellationToken,
    },
    Buffer(Vec<Frame>),
}

impl Emitter {
    pub(crate) fn channel(tx: mpsc::Sender<Frame>, cancel: CancellationToken) -> Self {
        Self {
            inner: Sink::Channel { tx, cancel },
            usage: None,
        }
    }

    /// An emitter that keeps everything pushed into it.
    pub fn buffered() -> Self {
        Self {
            inner: Sink::Buffer(Vec::new()),
            usage: None,
        }
    }

    /// Count [`Usage`] reported through this emitter into `metrics`.
    pub(crate) fn with_usage(mut self, metrics: Option<Arc<StageMetrics>>) -> Self {
        self.usage = metrics;
        self
    }

    /// Report provider usage. Ignored unless usage metrics are on.
    pub fn record_usage(&self, usage: Usage) {
        if let Some(metrics) = &self.usage {
            metrics.record_usage(usage);
        }
    }

    /// Push a frame downstream, suspending while the next queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Closed`] if the session was cancelled while
    /// waiting for capacity (the frame is discarded) or the next stage has
    /// stopped.
    pub async fn push(&mut self, frame: Frame) -> Result<(), ProviderError> {
        match &mut self.inner {
            Sink::Channel { tx, cancel } => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        Err(ProviderError::Closed("session cancelled".into()))
                    }
                    sent = tx.send(frame) => {
                        sent.map_err(|_| ProviderError::Closed("downstream stage stopped".into()))
                    }
                }
            }
            Sink::Buffer(frames) => {
                frames.push(frame);
                Ok(())
            }
        }
    }

    /// Whether pushing can no longer succeed.
    pub fn is_closed(&self) -> bool {
        match &self.inner {
            Sink::Channel { tx, cancel } => cancel.is_cancelled() || tx.is_closed(),
            Sink::Buffer(_) => false,
        }
    }

    /// Take everything collected so far. Always empty for channel emitters.
    pub fn drain(&mut self) -> Vec<Frame> {
        match &mut self.inner {
            Sink::Channel { .. } => Vec::new(),
            Sink::Buffer(frames) => std::mem::take(frames),
        }
    }
}
