//! Gaia: real-time conversational voice agent orchestrator.
//!
//! Each connected channel gets a session running a cascaded pipeline:
//! Transport → VAD → STT → user aggregator → LLM → TTS → transport output →
//! assistant aggregator
//!
//! # Architecture
//!
//! - **Pipeline**: stages run as independent tasks joined by bounded queues,
//!   so frames keep their order and a slow stage applies backpressure.
//! - **Context**: an append-only conversation log. The user aggregator
//!   commits one message per user turn; the assistant aggregator commits a
//!   reply only once it completed.
//! - **Session task**: owns one pipeline and a cancellation token that every
//!   stage observes at its next suspension point.
//! - **Controller**: maps channel connect/disconnect events to sessions and
//!   seeds each new session with a time-of-day greeting directive.
//! - **Services**: speech recognition, language generation and speech
//!   synthesis sit behind narrow provider traits.

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod services;
pub mod session;
pub mod transport;
pub mod vad;

pub use config::GaiaConfig;
pub use context::{ContextSnapshot, ConversationContext, Message, Role};
pub use error::{GaiaError, ProtocolViolation, ProviderError, Result, SessionFault, StageFault};
pub use pipeline::{Frame, Pipeline, Stage};
pub use runtime::RuntimeEvent;
pub use session::{SessionController, SessionFactory, SessionState, SessionTask};
pub use transport::{ChannelEvent, ChannelInfo};
