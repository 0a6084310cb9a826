//! Contract tests for the OpenAI-compatible extraction client against a mock server.

#![cfg(feature = "nl")]

use rust_decimal_macros::dec;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use spendlog::config::ExtractionConfig;
use spendlog::extraction::openai::{OpenAiExtractor, ADVISOR_PERSONA};
use spendlog::extraction::{AdviceRequest, ExtractedExpense, Extraction, Extractor, ADVICE_UNAVAILABLE};
use spendlog_core::{Category, MonthlyExpenses};

fn test_client(server: &MockServer) -> OpenAiExtractor {
    let config = ExtractionConfig {
        base_url: server.uri(),
        api_key: Some("test-key".to_string()),
        timeout_secs: 5,
        ..ExtractionConfig::default()
    };
    OpenAiExtractor::new(&config).unwrap()
}

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-1",
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": content } }
        ]
    }))
}

// ── POST /chat/completions (extraction) ─────────────────────────────

#[tokio::test]
async fn extract_sends_contract_and_parses_expense() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4-turbo",
            "temperature": 0.1,
            "max_tokens": 150,
            "response_format": { "type": "json_object" }
        })))
        .respond_with(chat_reply(
            r#"{"descricao": "Pizza", "valor": 59.9, "categoria": "Diversão"}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let result = client.extract("pizza 59,90", &Category::ALL).await;
    assert_eq!(
        result,
        Extraction::Expense(ExtractedExpense {
            description: "Pizza".to_string(),
            amount: dec!(59.9),
            category: Category::Leisure,
        })
    );
}

#[tokio::test]
async fn extract_not_expense() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(chat_reply(r#"{"not_expense": true}"#))
        .mount(&server)
        .await;

    let result = test_client(&server).extract("good morning", &Category::ALL).await;
    assert_eq!(result, Extraction::NotAnExpense);
}

#[tokio::test]
async fn extract_server_error_is_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let result = test_client(&server).extract("lunch 20", &Category::ALL).await;
    assert!(matches!(result, Extraction::Failed { .. }));
}

#[tokio::test]
async fn extract_malformed_envelope_is_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let result = test_client(&server).extract("lunch 20", &Category::ALL).await;
    assert!(matches!(result, Extraction::Failed { .. }));
}

// ── POST /audio/transcriptions ──────────────────────────────────────

#[tokio::test]
async fn transcribe_returns_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "mercado 120 reais" })))
        .expect(1)
        .mount(&server)
        .await;

    let text = test_client(&server).transcribe(b"RIFF....WAVE".to_vec()).await;
    assert_eq!(text.as_deref(), Some("mercado 120 reais"));

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("filename=\"audio.wav\""));
    assert!(body.contains("whisper-1"));
}

#[tokio::test]
async fn transcribe_failure_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    assert_eq!(test_client(&server).transcribe(vec![1, 2, 3]).await, None);
}

// ── POST /chat/completions (advice) ─────────────────────────────────

#[tokio::test]
async fn advise_uses_advice_model_and_apologizes_on_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "gpt-3.5-turbo" })))
        .respond_with(chat_reply("Cook at home more often."))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let monthly = MonthlyExpenses::default();
    let request = AdviceRequest {
        monthly_budget: dec!(3000),
        monthly: &monthly,
    };

    assert_eq!(client.advise(&request).await, "Cook at home more often.");
    assert_eq!(client.advise(&request).await, ADVICE_UNAVAILABLE);

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[0]["content"], ADVISOR_PERSONA);
    assert_eq!(messages[1]["role"], "user");
    assert!(messages[1]["content"].as_str().unwrap().contains("monthly budget of 3000.00"));
}

#[test]
fn missing_api_key_is_rejected() {
    let config = ExtractionConfig {
        api_key: Some("   ".to_string()),
        ..ExtractionConfig::default()
    };
    assert!(OpenAiExtractor::new(&config).is_err());
}
