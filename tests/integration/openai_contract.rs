//! HTTP contract tests for the OpenAI-compatible language model.

use futures_util::StreamExt;
use gaia::config::LlmConfig;
use gaia::services::{LanguageModel, OpenAiLlm};
use gaia::{ContextSnapshot, Message, ProviderError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_body(tokens: &[&str]) -> String {
    let mut body = String::from("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
    for token in tokens {
        let chunk = json!({"choices": [{"delta": {"content": token}}]});
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
    body.push_str("data: [DONE]\n\n");
    body
}

fn greeting_snapshot() -> ContextSnapshot {
    ContextSnapshot::from(vec![
        Message::system("You are Gaia."),
        Message::user("hello"),
    ])
}

#[tokio::test]
async fn streams_content_deltas_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "stream": true,
            "messages": [
                {"role": "system", "content": "You are Gaia."},
                {"role": "user", "content": "hello"}
            ]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&["Hi", " there", "!"]), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let llm = OpenAiLlm::new(server.uri(), "test-model", "test-key");
    let tokens: Vec<String> = llm
        .generate(&greeting_snapshot())
        .await
        .unwrap()
        .map(|t| t.unwrap())
        .collect()
        .await;

    assert_eq!(tokens, vec!["Hi", " there", "!"]);
}

#[tokio::test]
async fn unauthorized_maps_to_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let llm = OpenAiLlm::new(server.uri(), "test-model", "wrong");
    let err = match llm.generate(&greeting_snapshot()).await {
        Err(e) => e,
        Ok(_) => panic!("expected an auth error"),
    };
    assert!(matches!(err, ProviderError::Auth(ref m) if m.contains("Incorrect API key")));
}

#[tokio::test]
async fn server_error_maps_to_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let llm = OpenAiLlm::new(server.uri(), "test-model", "k");
    match llm.generate(&greeting_snapshot()).await {
        Err(ProviderError::Request(m)) => assert!(m.contains("503")),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("expected a request error"),
    }
}

#[tokio::test]
async fn error_event_mid_stream_ends_with_stream_error() {
    let server = MockServer::start().await;
    let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n\
                data: {\"error\":{\"message\":\"model overloaded\"}}\n\n";
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let llm = OpenAiLlm::new(server.uri(), "test-model", "k");
    let items: Vec<Result<String, ProviderError>> =
        llm.generate(&greeting_snapshot()).await.unwrap().collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Ok("Hi".to_owned()));
    assert!(matches!(&items[1], Err(ProviderError::Stream(m)) if m == "model overloaded"));
}

#[test]
fn missing_credential_is_an_auth_error() {
    let config = LlmConfig {
        api_key_env: "GAIA_TEST_KEY_THAT_IS_NEVER_SET".to_owned(),
        ..LlmConfig::default()
    };
    assert!(matches!(
        OpenAiLlm::from_config(&config),
        Err(ProviderError::Auth(_))
    ));
}
