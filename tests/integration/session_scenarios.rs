//! End-to-end session behaviour driven through the controller.

use crate::helpers::{
    GREETING_REPLY, ScriptedLlm, TestFactory, audio_chunk, controller_at, eventually, test_config,
};
use gaia::session::GreetingPolicy;
use gaia::{ChannelInfo, GaiaError, Message, ProtocolViolation, Role, SessionState};
use std::time::Duration;

fn expected_intro(config: &gaia::GaiaConfig, directive: &str) -> String {
    GreetingPolicy::new(&config.greeting, &config.persona.name).render(directive)
}

#[tokio::test]
async fn off_hours_connect_greets_with_after_hours_directive() {
    let config = test_config("");
    let (factory, _audio) = TestFactory::new(ScriptedLlm::default());
    let controller = controller_at(22, &config, factory.clone());

    controller.on_connected(ChannelInfo::new("c1")).unwrap();
    eventually("greeting request", || !factory.llm.prompts().is_empty()).await;

    let first = &factory.llm.prompts()[0];
    assert_eq!(first.len(), 1);
    assert!(first.last_user().is_none());
    assert_eq!(
        first.last(),
        Some(&Message::system(expected_intro(
            &config,
            &config.greeting.off_hours_directive
        )))
    );

    let context = factory.context("c1");
    eventually("greeting commit", || context.snapshot().count(Role::Assistant) == 1).await;
    assert_eq!(context.snapshot().last(), Some(&Message::assistant(GREETING_REPLY)));
    controller.shutdown().await;
}

#[tokio::test]
async fn business_hours_connect_uses_business_directive() {
    let config = test_config("");
    let (factory, _audio) = TestFactory::new(ScriptedLlm::default());
    let controller = controller_at(10, &config, factory.clone());

    controller.on_connected(ChannelInfo::new("c1")).unwrap();
    eventually("greeting request", || !factory.llm.prompts().is_empty()).await;

    let first = &factory.llm.prompts()[0];
    assert_eq!(
        first.messages(),
        &[Message::system(expected_intro(
            &config,
            &config.greeting.business_hours_directive
        ))]
    );
    controller.shutdown().await;
}

#[tokio::test]
async fn channel_offset_decides_the_local_hour() {
    let config = test_config("");
    let (factory, _audio) = TestFactory::new(ScriptedLlm::default());
    // 03:00 UTC is 10:00 at UTC+7.
    let controller = controller_at(3, &config, factory.clone());

    controller
        .on_connected(ChannelInfo::new("far-east").with_utc_offset(7 * 60))
        .unwrap();
    controller.on_connected(ChannelInfo::new("utc")).unwrap();
    eventually("both greetings", || factory.llm.prompts().len() == 2).await;

    let directives: Vec<String> = [factory.context("far-east"), factory.context("utc")]
        .iter()
        .map(|c| c.snapshot().messages()[0].content.clone())
        .collect();
    assert_eq!(
        directives[0],
        expected_intro(&config, &config.greeting.business_hours_directive)
    );
    assert_eq!(
        directives[1],
        expected_intro(&config, &config.greeting.off_hours_directive)
    );
    controller.shutdown().await;
}

#[tokio::test]
async fn persona_prompt_precedes_the_directive() {
    let config = test_config("You are Gaia, a friendly insurance assistant.");
    let (factory, _audio) = TestFactory::new(ScriptedLlm::default());
    let controller = controller_at(10, &config, factory.clone());

    controller.on_connected(ChannelInfo::new("c1")).unwrap();
    eventually("greeting request", || !factory.llm.prompts().is_empty()).await;

    let first = &factory.llm.prompts()[0];
    assert_eq!(first.len(), 2);
    assert_eq!(
        first.messages()[0],
        Message::system("You are Gaia, a friendly insurance assistant.")
    );
    assert_eq!(first.count(Role::System), 2);
    controller.shutdown().await;
}

#[tokio::test]
async fn immediate_disconnect_cancels_without_assistant_messages() {
    let config = test_config("");
    let (factory, _audio) = TestFactory::new(ScriptedLlm::slow(Duration::from_millis(50)));
    let controller = controller_at(22, &config, factory.clone());

    controller.on_connected(ChannelInfo::new("c1")).unwrap();
    let state = controller.on_disconnected("c1").await.unwrap();

    assert_eq!(state, SessionState::Cancelled);
    assert_eq!(factory.context("c1").snapshot().count(Role::Assistant), 0);
    assert!(controller.live_sessions().is_empty());
}

#[tokio::test]
async fn spoken_hello_becomes_one_user_message_and_a_reply() {
    let config = test_config("");
    let (factory, mut audio) = TestFactory::new(ScriptedLlm::default());
    let controller = controller_at(10, &config, factory.clone());

    let task = controller.on_connected(ChannelInfo::new("c1")).unwrap();
    let context = factory.context("c1");
    eventually("greeting commit", || context.snapshot().count(Role::Assistant) == 1).await;

    let input = task.input();
    for voiced in [true, true, true, false, false, false] {
        input.send(audio_chunk(voiced)).await.unwrap();
    }
    eventually("reply request", || factory.llm.prompts().len() == 2).await;

    let reply_prompt = &factory.llm.prompts()[1];
    assert_eq!(reply_prompt.last(), Some(&Message::user("hello")));
    assert_eq!(reply_prompt.count(Role::User), 1);

    eventually("reply commit", || context.snapshot().count(Role::Assistant) == 2).await;
    let snapshot = context.snapshot();
    let roles: Vec<Role> = snapshot.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::Assistant, Role::User, Role::Assistant]
    );
    assert_eq!(snapshot.last(), Some(&Message::assistant("You said: hello")));

    // Both replies were synthesized and delivered to the transport.
    assert!(audio.recv().await.is_some());

    let stages: Vec<String> = task.metrics().into_iter().map(|r| r.stage).collect();
    assert_eq!(
        stages,
        vec![
            "vad",
            "stt",
            "user_aggregator",
            "llm",
            "tts",
            "transport_output",
            "assistant_aggregator"
        ]
    );

    // Usage covers both replies: the greeting and "You said: hello".
    let report = task.metrics();
    let reply_tokens = GREETING_REPLY.split_inclusive(' ').count() as u64 + 3;
    let llm = report.iter().find(|r| r.stage == "llm").unwrap();
    assert_eq!(llm.llm_tokens, reply_tokens);
    let tts = report.iter().find(|r| r.stage == "tts").unwrap();
    assert!(tts.tts_characters >= "You said: hello".len() as u64);
    assert_eq!(report.iter().map(|r| r.llm_tokens).sum::<u64>(), reply_tokens);
    controller.shutdown().await;
}

#[tokio::test]
async fn double_connect_is_a_violation_and_keeps_one_task() {
    let config = test_config("");
    let (factory, _audio) = TestFactory::new(ScriptedLlm::default());
    let controller = controller_at(10, &config, factory);

    let first = controller.on_connected(ChannelInfo::new("c1")).unwrap();
    let second = controller.on_connected(ChannelInfo::new("c1"));

    assert!(matches!(
        second,
        Err(GaiaError::Protocol(ProtocolViolation::DuplicateConnect { ref channel })) if channel == "c1"
    ));
    assert_eq!(controller.violations().len(), 1);
    assert_eq!(controller.live_sessions(), vec!["c1".to_owned()]);
    assert_eq!(first.state(), SessionState::Running);
    controller.shutdown().await;
    assert!(first.state().is_terminal());
}

#[tokio::test]
async fn cancel_mid_reply_never_commits_the_partial_reply() {
    let config = test_config("");
    let (factory, mut audio) = TestFactory::new(ScriptedLlm::slow(Duration::from_millis(50)));
    let controller = controller_at(22, &config, factory.clone());

    controller.on_connected(ChannelInfo::new("c1")).unwrap();
    // The first sentence is spoken while the rest is still being generated.
    let first_block = tokio::time::timeout(Duration::from_secs(2), audio.recv())
        .await
        .unwrap();
    assert!(first_block.is_some());

    let state = controller.on_disconnected("c1").await.unwrap();
    assert_eq!(state, SessionState::Cancelled);

    let snapshot = factory.context("c1").snapshot();
    assert_eq!(snapshot.count(Role::Assistant), 0);
    assert_eq!(snapshot.len(), 1);
}

#[tokio::test]
async fn reconnect_after_disconnect_starts_a_fresh_session() {
    let config = test_config("");
    let (factory, _audio) = TestFactory::new(ScriptedLlm::default());
    let controller = controller_at(10, &config, factory);

    let first = controller.on_connected(ChannelInfo::new("c1")).unwrap();
    controller.on_disconnected("c1").await.unwrap();
    let second = controller.on_connected(ChannelInfo::new("c1")).unwrap();

    assert_ne!(first.id(), second.id());
    assert_eq!(first.state(), SessionState::Cancelled);
    assert!(controller.violations().is_empty());
    controller.shutdown().await;
}
