//! Gateway behavior against real HTTP backends (wiremock) and scripted
//! fallback chains.

mod common;

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{FailingBackend, ScriptedBackend};
use miqat::gateway::ollama::OllamaBackend;
use miqat::gateway::openai::OpenAiBackend;
use miqat::{CoreError, GenerationBackend, GenerationGateway, GenerationRequest};

fn request() -> GenerationRequest {
    GenerationRequest::new("[source:faq1] visa requirements\nQuestion: What visa do I need?")
}

#[tokio::test]
async fn ollama_backend_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({
            "model": "llama3.2",
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "llama3.2",
            "response": "You need a pilgrimage visa.",
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OllamaBackend::new("ollama", server.uri(), "llama3.2").unwrap();
    let text = backend.generate(&request()).await.unwrap();
    assert_eq!(text, "You need a pilgrimage visa.");
}

#[tokio::test]
async fn ollama_backend_surfaces_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let backend = OllamaBackend::new("ollama", server.uri(), "llama3.2").unwrap();
    let err = backend.generate(&request()).await.unwrap_err();
    assert!(matches!(err, CoreError::Backend(_)));
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn openai_backend_sends_bearer_and_parses_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o-mini"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [
                {"message": {"role": "assistant", "content": "Apply through a licensed agent."}}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new("cloud", server.uri(), "sk-test", "gpt-4o-mini").unwrap();
    let text = backend.generate(&request()).await.unwrap();
    assert_eq!(text, "Apply through a licensed agent.");
}

#[tokio::test]
async fn openai_backend_rejects_empty_choices() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
        )
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new("cloud", server.uri(), "sk-test", "gpt-4o-mini").unwrap();
    let err = backend.generate(&request()).await.unwrap_err();
    assert!(err.to_string().contains("no choices"));
}

#[tokio::test]
async fn gateway_falls_back_from_failing_http_backend() {
    // An Ollama server that always errors, then a healthy scripted backend.
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&broken)
        .await;

    let mut gateway = GenerationGateway::new();
    gateway.register(
        "local",
        Arc::new(OllamaBackend::new("local", broken.uri(), "llama3.2").unwrap()),
        Duration::from_secs(2),
    );
    gateway.register(
        "scripted",
        ScriptedBackend::new("scripted", vec![Ok("fallback answer".to_string())]),
        Duration::from_secs(2),
    );

    let order = vec!["local".to_string(), "scripted".to_string()];
    let response = gateway.generate(&request(), &order).await.unwrap();
    assert_eq!(response.backend, "scripted");
    assert_eq!(response.text, "fallback answer");
}

#[tokio::test]
async fn gateway_reports_last_cause_when_exhausted() {
    let mut gateway = GenerationGateway::new();
    gateway.register(
        "a",
        FailingBackend::new("a", "connection refused"),
        Duration::from_secs(1),
    );
    gateway.register(
        "b",
        FailingBackend::new("b", "model overloaded"),
        Duration::from_secs(1),
    );

    let order = vec!["a".to_string(), "b".to_string()];
    let err = gateway.generate(&request(), &order).await.unwrap_err();
    match err {
        CoreError::GenerationUnavailable { last_cause } => {
            assert!(last_cause.contains("model overloaded"));
        }
        other => panic!("expected GenerationUnavailable, got {}", other),
    }
}

#[tokio::test]
async fn gateway_passes_prompt_through_unchanged() {
    let scripted = ScriptedBackend::new("only", vec![Ok("ok".to_string())]);
    let mut gateway = GenerationGateway::new();
    gateway.register("only", scripted.clone(), Duration::from_secs(1));

    let req = request();
    gateway
        .generate(&req, &["only".to_string()])
        .await
        .unwrap();

    let prompts = scripted.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0], req.prompt);
}

#[tokio::test]
async fn slow_http_backend_times_out_and_falls_back() {
    let slow = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"response": "too late"}))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&slow)
        .await;

    let mut gateway = GenerationGateway::new();
    gateway.register(
        "slow",
        Arc::new(OllamaBackend::new("slow", slow.uri(), "llama3.2").unwrap()),
        Duration::from_millis(100),
    );
    gateway.register(
        "quick",
        ScriptedBackend::new("quick", vec![Ok("on time".to_string())]),
        Duration::from_secs(2),
    );

    let order = vec!["slow".to_string(), "quick".to_string()];
    let response = gateway.generate(&request(), &order).await.unwrap();
    assert_eq!(response.backend, "quick");
}
