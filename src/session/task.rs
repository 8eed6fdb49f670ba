//! The cancellable unit of execution that owns one session's pipeline.

use crate::config::PipelineConfig;
use crate::error::SessionFault;
use crate::pipeline::frames::Frame;
use crate::pipeline::metrics::{PipelineMetrics, StageReport};
use crate::pipeline::runner::{FaultReport, Pipeline, SpawnControl};
use crate::runtime::{self, RuntimeEvent};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Lifecycle of a [`SessionTask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Built but not started.
    Created,
    /// Stages are running.
    Running,
    /// Stopped by `cancel()`.
    Cancelled,
    /// Every stage exited on its own.
    Finished,
    /// Stopped by a fatal fault.
    Faulted(SessionFault),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Finished | Self::Faulted(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Cancelled => "cancelled",
            Self::Finished => "finished",
            Self::Faulted(_) => "faulted",
        }
    }
}

/// One session: a pipeline, its input queues and its cancellation token.
///
/// Frames reach the head stage from two queues. Injected frames (the
/// controller's greeting snapshot) are unbounded and always taken first;
/// transport input is bounded so a stalled pipeline pushes back on the
/// transport. Whatever leaves the tail stage goes to the optional output
/// sink.
///
/// All methods take `&self`, so the task is shared as `Arc<SessionTask>`.
pub struct SessionTask {
    channel: String,
    id: Uuid,
    config: PipelineConfig,
    pipeline: Mutex<Option<Pipeline>>,
    inject_tx: mpsc::UnboundedSender<Frame>,
    inject_rx: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    input_tx: mpsc::Sender<Frame>,
    input_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
    output: Mutex<Option<mpsc::Sender<Frame>>>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
    metrics: PipelineMetrics,
    events: Option<broadcast::Sender<RuntimeEvent>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionTask {
    pub fn new(channel: impl Into<String>, pipeline: Pipeline, config: &PipelineConfig) -> Self {
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::channel(config.input_capacity.max(1));
        let (state, _) = watch::channel(SessionState::Created);
        Self {
            channel: channel.into(),
            id: Uuid::new_v4(),
            config: config.clone(),
            pipeline: Mutex::new(Some(pipeline)),
            inject_tx,
            inject_rx: Mutex::new(Some(inject_rx)),
            input_tx,
            input_rx: Mutex::new(Some(input_rx)),
            output: Mutex::new(None),
            cancel: CancellationToken::new(),
            state: Arc::new(state),
            metrics: PipelineMetrics::new(config.enable_metrics)
                .with_usage(config.enable_usage_metrics),
            events: None,
        }
    }

    /// Send frames leaving the tail stage to `sink`.
    pub fn with_output(self, sink: mpsc::Sender<Frame>) -> Self {
        *lock(&self.output) = Some(sink);
        self
    }

    /// Publish stage faults on `events`.
    pub fn with_events(mut self, events: Option<broadcast::Sender<RuntimeEvent>>) -> Self {
        self.events = events;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Spawn the stage tasks and begin consuming input.
    ///
    /// # Errors
    ///
    /// [`SessionFault::NotRunning`] after `cancel()`, and
    /// [`SessionFault::AlreadyStarted`] on a second call.
    pub fn start(&self) -> Result<(), SessionFault> {
        let mut slot = lock(&self.pipeline);
        if self.cancel.is_cancelled() {
            return Err(SessionFault::NotRunning {
                channel: self.channel.clone(),
            });
        }
        let pipeline = slot.take().ok_or_else(|| SessionFault::AlreadyStarted {
            channel: self.channel.clone(),
        })?;
        let (Some(injected), Some(input)) = (lock(&self.inject_rx).take(), lock(&self.input_rx).take())
        else {
            return Err(SessionFault::AlreadyStarted {
                channel: self.channel.clone(),
            });
        };
        self.state.send_replace(SessionState::Running);

        info!(channel = %self.channel, session = %self.id, stages = ?pipeline.stage_names(), "session started");
        let supervisor = Supervisor {
            channel: self.channel.clone(),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
            state: Arc::clone(&self.state),
            metrics: self.metrics.clone(),
            events: self.events.clone(),
        };
        let output = lock(&self.output).take();
        tokio::spawn(supervisor.run(pipeline, injected, input, output));
        Ok(())
    }

    /// Queue a frame for the head stage ahead of transport input.
    ///
    /// # Errors
    ///
    /// [`SessionFault::NotRunning`] once the session is cancelled or done.
    pub fn inject(&self, frame: Frame) -> Result<(), SessionFault> {
        if self.cancel.is_cancelled() || self.state.borrow().is_terminal() {
            return Err(SessionFault::NotRunning {
                channel: self.channel.clone(),
            });
        }
        self.inject_tx.send(frame).map_err(|_| SessionFault::NotRunning {
            channel: self.channel.clone(),
        })
    }

    /// The bounded queue the transport feeds audio into.
    pub fn input(&self) -> mpsc::Sender<Frame> {
        self.input_tx.clone()
    }

    /// Request cancellation. Calling it again has no further effect.
    ///
    /// A task that never started goes straight to `Cancelled` and drops its
    /// queues, so senders from [`SessionTask::input`] fail instead of
    /// waiting for capacity. A running one gets there once every stage has
    /// stopped.
    pub fn cancel(&self) {
        self.cancel.cancel();
        if lock(&self.pipeline).take().is_some() {
            drop(lock(&self.input_rx).take());
            drop(lock(&self.inject_rx).take());
            drop(lock(&self.output).take());
            self.state.send_replace(SessionState::Cancelled);
            info!(channel = %self.channel, "session cancelled before start");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Wait until the task reaches a terminal state and return it.
    pub async fn wait(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(SessionState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    /// Per-stage counters, in pipeline order. Empty when both processing
    /// and usage metrics are off.
    pub fn metrics(&self) -> Vec<StageReport> {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for SessionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTask")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

struct Supervisor {
    channel: String,
    config: PipelineConfig,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
    metrics: PipelineMetrics,
    events: Option<broadcast::Sender<RuntimeEvent>>,
}

impl Supervisor {
    async fn run(
        self,
        pipeline: Pipeline,
        injected: mpsc::UnboundedReceiver<Frame>,
        input: mpsc::Receiver<Frame>,
        output: Option<mpsc::Sender<Frame>>,
    ) {
        let (fault_tx, mut fault_rx) = mpsc::unbounded_channel();
        let ctl = SpawnControl {
            cancel: self.cancel.clone(),
            faults: fault_tx,
            metrics: self.metrics.clone(),
        };
        let mut stages = JoinSet::new();
        let (head, tail) = pipeline.spawn(&self.config, &ctl, &mut stages);
        drop(ctl);

        let mut io = JoinSet::new();
        io.spawn(pump_head(head, injected, input, self.cancel.clone()));
        io.spawn(drain_tail(tail, output, self.cancel.clone()));

        let outcome = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break SessionState::Cancelled,
                Some(report) = fault_rx.recv() => match report {
                    FaultReport::Stage(fault) => runtime::publish(
                        self.events.as_ref(),
                        RuntimeEvent::StageFault { channel: self.channel.clone(), fault },
                    ),
                    FaultReport::Session(fault) => break SessionState::Faulted(fault),
                },
                joined = stages.join_next() => {
                    if joined.is_none() {
                        break SessionState::Finished;
                    }
                }
            }
        };

        self.cancel.cancel();
        while stages.join_next().await.is_some() {}
        io.shutdown().await;

        for report in self.metrics.snapshot() {
            debug!(
                channel = %self.channel,
                stage = %report.stage,
                processed = report.processed,
                faults = report.faults,
                busy_ms = saturating_millis(report.busy),
                "stage metrics"
            );
        }
        if self.metrics.usage_enabled() {
            let (llm_tokens, tts_characters) = self.metrics.usage_totals();
            debug!(channel = %self.channel, llm_tokens, tts_characters, "session usage");
        }
        match &outcome {
            SessionState::Faulted(fault) => {
                error!(channel = %self.channel, %fault, "session faulted");
            }
            other => info!(channel = %self.channel, state = other.as_str(), "session stopped"),
        }
        self.state.send_replace(outcome);
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Move frames from the session queues into the head stage, injected first.
async fn pump_head(
    head: mpsc::Sender<Frame>,
    mut injected: mpsc::UnboundedReceiver<Frame>,
    mut input: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            Some(frame) = injected.recv() => frame,
            Some(frame) = input.recv() => frame,
            else => return,
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            sent = head.send(frame) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

/// Hand tail output to the sink, or drop it when there is none.
async fn drain_tail(
    mut tail: mpsc::Receiver<Frame>,
    mut output: Option<mpsc::Sender<Frame>>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            frame = tail.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };
        let Some(sink) = &output else {
            continue;
        };
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            sent = sink.send(frame) => sent,
        };
        if sent.is_err() {
            debug!("session output sink closed, dropping further output");
            output = None;
        }
    }
}
