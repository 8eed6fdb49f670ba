//! Error types for the gaia voice agent.
//!
//! Errors are split by who sees them: [`ProviderError`] comes out of an
//! external speech/LLM/TTS adapter, [`StageFault`] is what a pipeline stage
//! reports for one item it could not handle, [`SessionFault`] ends a session,
//! and [`ProtocolViolation`] describes a channel event that made no sense for
//! the current session table. [`GaiaError`] wraps all of them.

use crate::pipeline::frames::FrameKind;

/// Stable error codes for provider failures.
///
/// These codes are part of the public API contract and never change.
pub mod error_codes {
    /// Request to the provider failed (connect, HTTP status, serialization).
    pub const REQUEST_FAILED: &str = "REQUEST_FAILED";

    /// Authentication failed (invalid or missing credential).
    pub const AUTH_FAILED: &str = "AUTH_FAILED";

    /// The provider's response stream broke or was malformed.
    pub const STREAM_FAILED: &str = "STREAM_FAILED";

    /// The provider or a downstream sink is no longer available.
    pub const CLOSED: &str = "CLOSED";
}

/// Errors produced by external provider adapters (STT, LLM, TTS, transport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Request to the provider failed.
    #[error("[{}] {}", error_codes::REQUEST_FAILED, .0)]
    Request(String),

    /// Authentication failed.
    #[error("[{}] {}", error_codes::AUTH_FAILED, .0)]
    Auth(String),

    /// Streaming response encountered an error.
    #[error("[{}] {}", error_codes::STREAM_FAILED, .0)]
    Stream(String),

    /// The provider or sink has gone away.
    #[error("[{}] {}", error_codes::CLOSED, .0)]
    Closed(String),
}

impl ProviderError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Request(_) => error_codes::REQUEST_FAILED,
            Self::Auth(_) => error_codes::AUTH_FAILED,
            Self::Stream(_) => error_codes::STREAM_FAILED,
            Self::Closed(_) => error_codes::CLOSED,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Request(m) | Self::Auth(m) | Self::Stream(m) | Self::Closed(m) => m,
        }
    }
}

/// A stage failed to process one item.
///
/// The offending item has already been discarded when this is reported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stage `{stage}` failed on {frame} frame: {error}")]
pub struct StageFault {
    /// Name of the stage that failed.
    pub stage: String,
    /// Kind of the item the stage was processing.
    pub frame: FrameKind,
    /// What went wrong.
    pub error: ProviderError,
}

/// The session cannot continue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionFault {
    /// One stage kept failing past the configured fault budget.
    #[error("stage `{stage}` faulted {count} times in a row, last: {last}")]
    RepeatedStageFaults {
        stage: String,
        count: u32,
        last: StageFault,
    },

    /// A stage task panicked.
    #[error("stage `{stage}` panicked")]
    StagePanicked { stage: String },

    /// `start()` was called on a session that already ran.
    #[error("session `{channel}` was already started")]
    AlreadyStarted { channel: String },

    /// Work was handed to a session that has already stopped.
    #[error("session `{channel}` is no longer running")]
    NotRunning { channel: String },
}

/// A channel event that does not fit the current session table.
///
/// Never fatal: the event is ignored after a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// `connected` for a channel that already has a live session.
    #[error("channel `{channel}` connected while a session is already live")]
    DuplicateConnect { channel: String },

    /// `disconnected` for a channel with no live session.
    #[error("channel `{channel}` disconnected without a live session")]
    UnknownChannel { channel: String },
}

/// Top-level error type for the voice agent.
#[derive(Debug, thiserror::Error)]
pub enum GaiaError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// External provider error.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Session lifecycle error.
    #[error("session error: {0}")]
    Session(#[from] SessionFault),

    /// Channel event rejected by the controller.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, GaiaError>;
