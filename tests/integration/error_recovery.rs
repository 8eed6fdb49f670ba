//! A provider failure costs one item, not the session, until a stage keeps
//! failing.

use async_trait::async_trait;
use gaia::config::PipelineConfig;
use gaia::context::{AssistantContextAggregator, UserContextAggregator};
use gaia::pipeline::frames::{Speaker, Transcription};
use gaia::services::{LanguageModel, LlmStage, TokenStream};
use gaia::session::FixedClock;
use gaia::{
    ChannelInfo, ContextSnapshot, ConversationContext, Frame, Pipeline, ProviderError, Role,
    RuntimeEvent, SessionController, SessionFactory, SessionFault, SessionState, SessionTask,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::helpers::{eventually, test_config};

/// Fails the first request, answers "ok" afterwards.
#[derive(Default)]
struct FlakyLlm {
    calls: AtomicU32,
}

#[async_trait]
impl LanguageModel for FlakyLlm {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn generate(&self, _context: &ContextSnapshot) -> Result<TokenStream, ProviderError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ProviderError::Request("connection reset".into()));
        }
        Ok(Box::pin(futures_util::stream::iter(vec![Ok("ok".to_owned())])))
    }
}

/// Language model whose every request fails.
struct DownLlm;

#[async_trait]
impl LanguageModel for DownLlm {
    fn name(&self) -> &str {
        "down"
    }

    async fn generate(&self, _context: &ContextSnapshot) -> Result<TokenStream, ProviderError> {
        Err(ProviderError::Request("service unavailable".into()))
    }
}

struct DownFactory;

impl SessionFactory for DownFactory {
    fn build(&self, _channel: &ChannelInfo, context: ConversationContext) -> gaia::Result<Pipeline> {
        Ok(Pipeline::new(vec![
            Box::new(UserContextAggregator::new(context.clone())),
            Box::new(LlmStage::new(Arc::new(DownLlm))),
            Box::new(AssistantContextAggregator::new(context)),
        ]))
    }
}

async fn user_says(task: &SessionTask, text: &str) {
    let input = task.input();
    input.send(Frame::start_of_turn(Speaker::User)).await.unwrap();
    input
        .send(Frame::Transcription(Transcription::final_text(text)))
        .await
        .unwrap();
    input.send(Frame::end_of_turn(Speaker::User)).await.unwrap();
}

#[tokio::test]
async fn failed_generation_is_reported_and_next_turn_succeeds() {
    let context = ConversationContext::new();
    let llm: Arc<dyn LanguageModel> = Arc::new(FlakyLlm::default());
    let pipeline = Pipeline::new(vec![
        Box::new(UserContextAggregator::new(context.clone())),
        Box::new(LlmStage::new(llm)),
        Box::new(AssistantContextAggregator::new(context.clone())),
    ]);
    let (events_tx, mut events) = broadcast::channel(16);
    let task = SessionTask::new("c1", pipeline, &PipelineConfig::default())
        .with_events(Some(events_tx));
    task.start().unwrap();

    user_says(&task, "first").await;
    match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Ok(RuntimeEvent::StageFault { fault, .. })) => {
            assert_eq!(fault.stage, "llm");
            assert!(matches!(fault.error, ProviderError::Request(_)));
        }
        other => panic!("expected a stage fault, got {other:?}"),
    }

    user_says(&task, "second").await;
    eventually("second reply", || context.snapshot().count(Role::Assistant) == 1).await;

    let snapshot = context.snapshot();
    assert_eq!(snapshot.count(Role::User), 2);
    assert_eq!(snapshot.last().map(|m| m.content.as_str()), Some("ok"));
    assert_eq!(task.state(), SessionState::Running);

    task.cancel();
    assert_eq!(task.wait().await, SessionState::Cancelled);
}

#[tokio::test]
async fn repeated_faults_end_a_controller_session_and_allow_reconnect() {
    let mut config = test_config("");
    config.pipeline.max_consecutive_faults = 0;
    let (events_tx, mut events) = broadcast::channel(32);
    let controller = SessionController::new(&config, Arc::new(DownFactory))
        .with_clock(Arc::new(FixedClock::at_utc_hour(10)))
        .with_events(events_tx);

    // The greeting request fails, which is already one fault too many.
    let first = controller.on_connected(ChannelInfo::new("c1")).unwrap();
    let ended = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(RuntimeEvent::SessionEnded { channel, state }) => break (channel, state),
                Ok(_) => {}
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("no session end event");

    assert_eq!(ended.0, "c1");
    match ended.1 {
        SessionState::Faulted(SessionFault::RepeatedStageFaults { stage, count, .. }) => {
            assert_eq!(stage, "llm");
            assert_eq!(count, 1);
        }
        other => panic!("expected repeated stage faults, got {other:?}"),
    }
    assert!(controller.live_sessions().is_empty());
    // The faulted session is kept until the channel disconnects.
    assert!(controller.session("c1").is_some());

    let second = controller.on_connected(ChannelInfo::new("c1")).unwrap();
    assert_ne!(first.id(), second.id());
    assert!(controller.violations().is_empty());
    assert!(first.state().is_terminal());
    controller.shutdown().await;
}
