//! The frame pipeline: frame types, the stage contract, the concurrent
//! runner and per-stage metrics.

pub mod frames;
pub mod metrics;
pub mod runner;
pub mod stage;

pub use frames::{ControlMarker, Frame, FrameKind, Speaker};
pub use metrics::{PipelineMetrics, StageReport, Usage};
pub use runner::Pipeline;
pub use stage::{Emitter, Stage};
