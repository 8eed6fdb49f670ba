//! Runtime events published by the session controller for observability.
//!
//! Events are small and cloned per subscriber. Publishing goes through a
//! `tokio::sync::broadcast` channel and never waits, so a slow or absent
//! subscriber cannot hold up a session.

use crate::error::{ProtocolViolation, StageFault};
use crate::session::SessionState;
use tokio::sync::broadcast;
use uuid::Uuid;

/// What the controller and its sessions are doing "right now".
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A channel connected and its session task is running.
    SessionStarted { channel: String, session_id: Uuid },
    /// A session reached a terminal state.
    SessionEnded { channel: String, state: SessionState },
    /// A stage discarded one item; the session continues.
    StageFault { channel: String, fault: StageFault },
    /// A channel event was rejected.
    ProtocolViolation(ProtocolViolation),
}

/// Publish without blocking; having no subscribers is fine.
pub(crate) fn publish(tx: Option<&broadcast::Sender<RuntimeEvent>>, event: RuntimeEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}
