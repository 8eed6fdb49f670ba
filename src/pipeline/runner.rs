//! Runs an ordered chain of stages as independent tasks.
//!
//! Stage `i` reads from a bounded queue and writes into the bounded queue
//! of stage `i + 1`, so a slow stage only holds back its upstream once the
//! queue between them is full. Every loop checks the session's
//! cancellation token at each suspension point.

use crate::config::PipelineConfig;
use crate::error::{SessionFault, StageFault};
use crate::pipeline::frames::Frame;
use crate::pipeline::metrics::{PipelineMetrics, StageMetrics};
use crate::pipeline::stage::{Emitter, Stage};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Faults raised by stage loops, consumed by the session supervisor.
#[derive(Debug, Clone)]
pub(crate) enum FaultReport {
    /// One item was discarded; the stage keeps going.
    Stage(StageFault),
    /// The session has to stop.
    Session(SessionFault),
}

/// An ordered, fixed sequence of stages.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Compose stages in order; the first stage receives injected frames.
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_owned()).collect()
    }

    /// Spawn one task per stage into `tasks`.
    ///
    /// Returns the head sender and the tail receiver. A panicking stage is
    /// reported as [`SessionFault::StagePanicked`].
    pub(crate) fn spawn(
        self,
        config: &PipelineConfig,
        ctl: &SpawnControl,
        tasks: &mut JoinSet<()>,
    ) -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
        let capacity = config.queue_capacity.max(1);
        let (head_tx, mut rx) = mpsc::channel::<Frame>(capacity);

        for stage in self.stages {
            let (tx, next_rx) = mpsc::channel::<Frame>(capacity);
            let name = stage.name().to_owned();
            let registered = ctl.metrics.register(&name);
            let loop_ctl = StageLoopControl {
                cancel: ctl.cancel.clone(),
                faults: ctl.faults.clone(),
                metrics: registered.clone().filter(|_| ctl.metrics.is_enabled()),
                usage: registered.filter(|_| ctl.metrics.usage_enabled()),
                max_consecutive_faults: config.max_consecutive_faults,
            };
            let faults = ctl.faults.clone();
            tasks.spawn(async move {
                let run = AssertUnwindSafe(run_stage(stage, rx, tx, loop_ctl));
                if run.catch_unwind().await.is_err() {
                    error!(stage = %name, "stage panicked");
                    let _ = faults.send(FaultReport::Session(SessionFault::StagePanicked {
                        stage: name,
                    }));
                }
            });
            rx = next_rx;
        }

        (head_tx, rx)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Shared handles every stage loop of one session gets.
pub(crate) struct SpawnControl {
    pub cancel: CancellationToken,
    pub faults: mpsc::UnboundedSender<FaultReport>,
    pub metrics: PipelineMetrics,
}

struct StageLoopControl {
    cancel: CancellationToken,
    faults: mpsc::UnboundedSender<FaultReport>,
    metrics: Option<Arc<StageMetrics>>,
    usage: Option<Arc<StageMetrics>>,
    max_consecutive_faults: u32,
}

async fn run_stage(
    mut stage: Box<dyn Stage>,
    mut rx: mpsc::Receiver<Frame>,
    tx: mpsc::Sender<Frame>,
    ctl: StageLoopControl,
) {
    let name = stage.name().to_owned();
    let mut out = Emitter::channel(tx, ctl.cancel.clone()).with_usage(ctl.usage.clone());
    let mut consecutive_faults: u32 = 0;

    loop {
        let frame = tokio::select! {
            biased;
            () = ctl.cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let kind = frame.kind();
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = ctl.cancel.cancelled() => break,
            result = stage.process(frame, &mut out) => result,
        };
        if let Some(metrics) = &ctl.metrics {
            metrics.record(started.elapsed(), result.is_err());
        }

        let error = match result {
            Ok(()) => {
                consecutive_faults = 0;
                continue;
            }
            Err(error) if out.is_closed() => {
                debug!(stage = %name, frame = %kind, %error, "downstream closed, stopping stage");
                break;
            }
            Err(error) => error,
        };

        consecutive_faults += 1;
        let fault = StageFault {
            stage: name.clone(),
            frame: kind,
            error,
        };
        warn!(stage = %name, frame = %kind, error = %fault.error, "stage fault, item discarded");

        if consecutive_faults > ctl.max_consecutive_faults {
            error!(stage = %name, count = consecutive_faults, "stage fault budget exhausted");
            let _ = ctl.faults.send(FaultReport::Session(SessionFault::RepeatedStageFaults {
                stage: name.clone(),
                count: consecutive_faults,
                last: fault,
            }));
            break;
        }
        let _ = ctl.faults.send(FaultReport::Stage(fault));
    }

    // Anything still queued for this stage is dropped with the receiver.
    drop(rx);
    stage.shutdown().await;
    debug!(stage = %name, "stage stopped");
}
