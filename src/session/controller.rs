//! Creates a session per connected channel and tears it down on disconnect.

use crate::config::{GaiaConfig, PipelineConfig};
use crate::context::{ConversationContext, Message};
use crate::error::{GaiaError, ProtocolViolation, Result};
use crate::pipeline::frames::Frame;
use crate::pipeline::runner::Pipeline;
use crate::runtime::{self, RuntimeEvent};
use crate::session::greeting::{Clock, GreetingPolicy, SystemClock};
use crate::session::task::{SessionState, SessionTask};
use crate::transport::{ChannelEvent, ChannelInfo};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// Builds the stage chain for a new session.
///
/// The context handed in is the session's history; the aggregators the
/// factory creates must write into it.
pub trait SessionFactory: Send + Sync {
    fn build(&self, channel: &ChannelInfo, context: ConversationContext) -> Result<Pipeline>;
}

/// Most recent protocol violations kept for [`SessionController::violations`].
const MAX_RECORDED_VIOLATIONS: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Maps channel events to session tasks.
///
/// At most one live session exists per channel id. A channel whose session
/// already ended (faulted or finished) may connect again.
pub struct SessionController {
    persona_prompt: String,
    policy: GreetingPolicy,
    clock: Arc<dyn Clock>,
    pipeline_config: PipelineConfig,
    factory: Arc<dyn SessionFactory>,
    sessions: Mutex<HashMap<String, Arc<SessionTask>>>,
    violations: Mutex<VecDeque<ProtocolViolation>>,
    events: Option<broadcast::Sender<RuntimeEvent>>,
}

impl SessionController {
    pub fn new(config: &GaiaConfig, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            persona_prompt: config.persona.system_prompt.clone(),
            policy: GreetingPolicy::new(&config.greeting, &config.persona.name),
            clock: Arc::new(SystemClock),
            pipeline_config: config.pipeline.clone(),
            factory,
            sessions: Mutex::new(HashMap::new()),
            violations: Mutex::new(VecDeque::new()),
            events: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish lifecycle events on `events`.
    pub fn with_events(mut self, events: broadcast::Sender<RuntimeEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Start a session for a newly connected channel.
    ///
    /// The context is seeded with the persona prompt and the time-of-day
    /// directive, and a snapshot of it is injected so the assistant greets
    /// the caller without waiting for them to speak.
    ///
    /// # Errors
    ///
    /// [`ProtocolViolation::DuplicateConnect`] if the channel already has a
    /// live session (the existing session is left alone), or whatever the
    /// factory or task start returns.
    pub fn on_connected(&self, channel: ChannelInfo) -> Result<Arc<SessionTask>> {
        let mut sessions = lock(&self.sessions);
        if sessions
            .get(&channel.id)
            .is_some_and(|task| !task.state().is_terminal())
        {
            drop(sessions);
            return Err(self.violation(ProtocolViolation::DuplicateConnect {
                channel: channel.id,
            }));
        }

        let context = ConversationContext::with_system_prompt(&self.persona_prompt);
        let directive = self
            .policy
            .directive_at(self.clock.now(), channel.utc_offset_minutes);
        info!(channel = %channel.id, directive, "channel connected");

        let pipeline = self.factory.build(&channel, context.clone())?;
        let task = Arc::new(
            SessionTask::new(&channel.id, pipeline, &self.pipeline_config)
                .with_events(self.events.clone()),
        );
        context.append(Message::system(self.policy.render(directive)));
        // Queued before start so a failure here never leaves a running task
        // outside the session map.
        task.inject(Frame::ContextSnapshot(context.snapshot()))?;
        task.start()?;

        sessions.insert(channel.id.clone(), Arc::clone(&task));
        drop(sessions);

        runtime::publish(
            self.events.as_ref(),
            RuntimeEvent::SessionStarted {
                channel: channel.id.clone(),
                session_id: task.id(),
            },
        );
        let watched = Arc::clone(&task);
        let events = self.events.clone();
        tokio::spawn(async move {
            let state = watched.wait().await;
            if let SessionState::Faulted(fault) = &state {
                warn!(channel = watched.channel(), %fault, "session ended by fault, waiting for disconnect");
            }
            runtime::publish(
                events.as_ref(),
                RuntimeEvent::SessionEnded {
                    channel: watched.channel().to_owned(),
                    state,
                },
            );
        });
        Ok(task)
    }

    /// Cancel and forget the channel's session, waiting for it to stop.
    ///
    /// # Errors
    ///
    /// [`ProtocolViolation::UnknownChannel`] if the channel has no session.
    pub async fn on_disconnected(&self, channel: &str) -> Result<SessionState> {
        let task = lock(&self.sessions).remove(channel);
        let Some(task) = task else {
            return Err(self.violation(ProtocolViolation::UnknownChannel {
                channel: channel.to_owned(),
            }));
        };
        info!(channel, "channel disconnected");
        task.cancel();
        Ok(task.wait().await)
    }

    /// Drive the controller from a stream of channel events.
    ///
    /// When the stream ends every remaining session is cancelled.
    pub async fn run(&self, mut events: mpsc::Receiver<ChannelEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Connected(info) => match self.on_connected(info) {
                    Ok(_) | Err(GaiaError::Protocol(_)) => {}
                    Err(e) => error!("failed to start session: {e}"),
                },
                ChannelEvent::Disconnected(id) => {
                    // Violations are already recorded and logged.
                    let _ = self.on_disconnected(&id).await;
                }
            }
        }
        self.shutdown().await;
    }

    /// Cancel every session and wait for all of them to stop.
    pub async fn shutdown(&self) {
        let tasks: Vec<Arc<SessionTask>> = lock(&self.sessions).drain().map(|(_, t)| t).collect();
        for task in &tasks {
            task.cancel();
        }
        for task in tasks {
            task.wait().await;
        }
    }

    /// Ids of channels whose session is still running.
    pub fn live_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.sessions)
            .iter()
            .filter(|(_, task)| !task.state().is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn session(&self, channel: &str) -> Option<Arc<SessionTask>> {
        lock(&self.sessions).get(channel).cloned()
    }

    /// The most recent protocol violations, oldest first.
    ///
    /// Only the last [`MAX_RECORDED_VIOLATIONS`] are kept; every violation is
    /// also published as a [`RuntimeEvent::ProtocolViolation`].
    pub fn violations(&self) -> Vec<ProtocolViolation> {
        lock(&self.violations).iter().cloned().collect()
    }

    fn violation(&self, violation: ProtocolViolation) -> GaiaError {
        warn!("{violation}, ignoring");
        {
            let mut recorded = lock(&self.violations);
            if recorded.len() == MAX_RECORDED_VIOLATIONS {
                recorded.pop_front();
            }
            recorded.push_back(violation.clone());
        }
        runtime::publish(
            self.events.as_ref(),
            RuntimeEvent::ProtocolViolation(violation.clone()),
        );
        GaiaError::Protocol(violation)
    }
}
