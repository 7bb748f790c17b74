use futures::StreamExt;
use llm::providers::OpenAIProvider;
use llm::{ChatMessage, ChatModel, ChatRequest, LlmError, ModelProvider};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SSE_BODY: &str = concat!(
    ": OPENROUTER PROCESSING\n\n",
    "data: {\"id\":\"gen-1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
    "data: {\"id\":\"gen-1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"}}]}\n\n",
    "data: {\"id\":\"gen-1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\" there\"}}]}\n\n",
    "data: {\"id\":\"gen-1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"!\"},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

fn request() -> ChatRequest {
    let messages = [ChatMessage::user("hello")];
    ChatRequest::new(&messages)
        .with_temperature(0.7)
        .with_max_tokens(2048)
}

async fn mount_completions(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "gen-2",
            "model": "openai/gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hi there!"},
                "finish_reason": "stop"
            }]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn streamed_fragments_match_buffered_response() {
    let server = MockServer::start().await;
    mount_completions(&server).await;

    let provider = OpenAIProvider::new(&server.uri(), "test-key").unwrap();
    let model = provider.create_chat_model("openai/gpt-4o-mini");

    let mut stream = model.stream_chat(&request()).await.unwrap();
    let mut fragments = Vec::new();
    while let Some(fragment) = stream.next().await {
        fragments.push(fragment.unwrap());
    }
    assert_eq!(fragments, vec!["Hi", " there", "!"]);

    let buffered = model.chat(&request()).await.unwrap();
    assert_eq!(fragments.concat(), buffered.get_text());
}

#[tokio::test]
async fn request_carries_sampling_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "anthropic/claude-3.5-sonnet",
            "messages": [{"role": "user", "content": "hello"}],
            "temperature": 0.7,
            "max_tokens": 2048,
            "stream": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAIProvider::new(&server.uri(), "test-key").unwrap();
    let model = provider.chat_model("anthropic/claude-3.5-sonnet");
    let text = model.stream_chat(&request()).await.unwrap().collect_text().await.unwrap();
    assert_eq!(text, "Hi there!");
}

#[tokio::test]
async fn malformed_frames_do_not_break_the_stream() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"one\"}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" two\"}}]}\n",
        "data: [DONE]\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = OpenAIProvider::new(&server.uri(), "test-key").unwrap();
    let text = provider
        .chat_model("m")
        .stream_chat(&request())
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap();
    assert_eq!(text, "one two");
}

#[tokio::test]
async fn payment_required_is_a_quota_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {"code": 402, "message": "Insufficient credits. Add more using https://openrouter.ai/credits"}
        })))
        .mount(&server)
        .await;

    let provider = OpenAIProvider::new(&server.uri(), "test-key")
        .unwrap()
        .with_upgrade_url("https://openrouter.ai/settings/credits");
    let err = match provider.chat_model("m").stream_chat(&request()).await {
        Err(e) => e,
        Ok(_) => panic!("expected an error"),
    };
    assert!(err.is_quota());
    assert_eq!(err.upgrade_url(), Some("https://openrouter.ai/settings/credits"));
}

#[tokio::test]
async fn unauthorized_is_an_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 401, "message": "No auth credentials found"}
        })))
        .mount(&server)
        .await;

    let provider = OpenAIProvider::new(&server.uri(), "bad-key").unwrap();
    let err = provider.chat_model("m").chat(&request()).await.unwrap_err();
    match &err {
        LlmError::Http { status, message } => {
            assert_eq!(*status, 401);
            assert_eq!(message, "No auth credentials found");
        }
        other => panic!("expected Http error, got {other:?}"),
    }
    assert!(err.is_configuration());
}

#[tokio::test]
async fn mid_stream_error_frame_ends_with_one_error() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
        "data: {\"error\":{\"code\":502,\"message\":\"Provider returned error\"}}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = OpenAIProvider::new(&server.uri(), "test-key").unwrap();
    let items: Vec<_> = provider
        .chat_model("m")
        .stream_chat(&request())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "partial");
    assert!(matches!(items[1], Err(LlmError::Http { status: 502, .. })));
}

#[tokio::test]
async fn list_models_uses_display_names() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": "openai/gpt-4o-mini", "name": "OpenAI: GPT-4o-mini"},
                {"id": "local-model"}
            ]
        })))
        .mount(&server)
        .await;

    let provider = OpenAIProvider::new(&server.uri(), "test-key").unwrap();
    let models = provider.list_models().await.unwrap();
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].name(), "OpenAI: GPT-4o-mini");
    assert_eq!(models[1].name(), "local-model");
}
