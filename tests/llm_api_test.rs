mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{body, ScriptedProvider, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;
use webapp_api::llm::{LlmError, LlmProvider, MessageRole};

const SONNET: &str = "claude-3-sonnet-20240229";

fn app_with(provider: Arc<ScriptedProvider>) -> TestApp {
    TestApp::new(Some(provider as Arc<dyn LlmProvider>))
}

async fn create_conversation(app: &TestApp, token: &str, body_json: Option<Value>) -> Value {
    let response = app
        .send("POST", "/api/llm/conversations", Some(token), body_json)
        .await;
    assert_eq!(response.status(), 201, "{:?}", response.body());
    body(&response)["data"].clone()
}

#[tokio::test]
async fn test_conversation_lifecycle() {
    let app = TestApp::new(None);
    let token = app.token("convo@example.com").await;

    let created = create_conversation(&app, &token, None).await;
    assert_eq!(created["model"], SONNET);
    assert!(created["title"]
        .as_str()
        .unwrap()
        .starts_with("Conversation "));
    let id = created["id"].as_str().unwrap().to_string();

    let response = app
        .send("GET", "/api/llm/conversations", Some(&token), None)
        .await;
    let json = body(&response);
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
    assert_eq!(json["data"][0]["messageCount"], 0);
    assert_eq!(json["pagination"]["limit"], 50);

    let path = format!("/api/llm/conversations/{}", id);
    let response = app
        .send("PUT", &path, Some(&token), Some(json!({ "title": "Renamed" })))
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(body(&response)["data"]["title"], "Renamed");

    let response = app.send("GET", &path, Some(&token), None).await;
    let json = body(&response);
    assert_eq!(json["data"]["conversation"]["title"], "Renamed");
    assert_eq!(json["data"]["messages"], json!([]));

    let response = app.send("DELETE", &path, Some(&token), None).await;
    assert_eq!(response.status(), 200);
    assert_eq!(body(&response)["message"], "Conversation deleted successfully");

    let response = app.send("GET", &path, Some(&token), None).await;
    assert_eq!(response.status(), 404);
    assert_eq!(body(&response)["error"], "Conversation not found");
}

#[tokio::test]
async fn test_conversations_are_private() {
    let app = TestApp::new(None);
    let owner = app.token("owner@example.com").await;
    let other = app.token("other@example.com").await;

    let created = create_conversation(&app, &owner, Some(json!({ "title": "Mine" }))).await;
    let path = format!("/api/llm/conversations/{}", created["id"].as_str().unwrap());

    let response = app.send("GET", &path, Some(&other), None).await;
    assert_eq!(response.status(), 404);

    let response = app.send("DELETE", &path, Some(&other), None).await;
    assert_eq!(response.status(), 404);

    let response = app
        .send("GET", "/api/llm/conversations", Some(&other), None)
        .await;
    assert_eq!(body(&response)["data"], json!([]));
}

#[tokio::test]
async fn test_llm_validation_errors() {
    let app = TestApp::new(None);
    let token = app.token("invalid@example.com").await;

    let response = app
        .send(
            "POST",
            "/api/llm/conversations",
            Some(&token),
            Some(json!({ "model": "gpt-4" })),
        )
        .await;
    assert_eq!(response.status(), 400);
    assert_eq!(
        body(&response)["error"],
        "Validation error: Invalid model specified"
    );

    // A body of the wrong shape is rejected, not replaced by defaults
    let response = app
        .send(
            "POST",
            "/api/llm/conversations",
            Some(&token),
            Some(json!({ "title": 123, "model": "gpt-4" })),
        )
        .await;
    assert_eq!(response.status(), 400);
    let response = app
        .send("GET", "/api/llm/conversations", Some(&token), None)
        .await;
    assert_eq!(body(&response)["data"], json!([]));

    let response = app
        .send(
            "GET",
            "/api/llm/conversations?limit=500",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status(), 400);
    assert_eq!(
        body(&response)["error"],
        "Validation error: Limit must be between 1 and 100"
    );

    let created = create_conversation(&app, &token, None).await;
    let path = format!(
        "/api/llm/conversations/{}/messages",
        created["id"].as_str().unwrap()
    );
    let response = app
        .send("POST", &path, Some(&token), Some(json!({ "content": "" })))
        .await;
    assert_eq!(response.status(), 400);
    assert_eq!(
        body(&response)["error"],
        "Validation error: Message content must be between 1 and 10000 characters"
    );
}

#[tokio::test]
async fn test_models_listing() {
    let app = TestApp::new(None);
    let token = app.token("models@example.com").await;

    let response = app.send("GET", "/api/llm/models", Some(&token), None).await;
    assert_eq!(response.status(), 200);
    let models = body(&response)["data"].clone();
    let ids: Vec<&str> = models
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&SONNET));
    assert!(ids.contains(&"claude-3-haiku-20240307"));
    assert_eq!(models[0]["inputCost"], 15.0);

    let response = app.send("GET", "/api/llm/models", None, None).await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_send_message() {
    let provider = ScriptedProvider::replying(&["Hello", ", world"]);
    let app = app_with(provider.clone());
    let token = app.token("chat@example.com").await;
    let created = create_conversation(&app, &token, None).await;
    let id = created["id"].as_str().unwrap().to_string();

    let response = app
        .send(
            "POST",
            &format!("/api/llm/conversations/{}/messages", id),
            Some(&token),
            Some(json!({ "content": "Hi there", "temperature": 0 })),
        )
        .await;
    assert_eq!(response.status(), 200, "{:?}", response.body());
    let data = body(&response)["data"].clone();
    assert_eq!(data["message"], "Hello, world");
    assert_eq!(data["tokens"], 500);
    assert!((data["cost"].as_f64().unwrap() - 0.0105).abs() < 1e-9);

    let request = provider.last_request().unwrap();
    assert_eq!(request.model, SONNET);
    assert_eq!(request.config.temperature, Some(0.0));
    assert_eq!(
        request.system.as_deref(),
        Some("You are a helpful AI assistant for developers.")
    );
    assert_eq!(request.messages.len(), 1);
    assert_eq!(request.messages[0].role, MessageRole::User);

    let response = app
        .send(
            "GET",
            &format!("/api/llm/conversations/{}", id),
            Some(&token),
            None,
        )
        .await;
    let json = body(&response);
    let messages = json["data"]["messages"].as_array().unwrap().clone();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "Hi there");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "Hello, world");
    assert_eq!(json["data"]["conversation"]["totalTokens"], 1500);
}

#[tokio::test]
async fn test_history_is_sent_to_provider() {
    let provider = ScriptedProvider::replying(&["ok"]);
    let app = app_with(provider.clone());
    let token = app.token("history@example.com").await;
    let created = create_conversation(&app, &token, None).await;
    let path = format!(
        "/api/llm/conversations/{}/messages",
        created["id"].as_str().unwrap()
    );

    for content in ["first", "second"] {
        let response = app
            .send("POST", &path, Some(&token), Some(json!({ "content": content })))
            .await;
        assert_eq!(response.status(), 200);
    }

    assert_eq!(provider.request_count(), 2);
    let request = provider.last_request().unwrap();
    let turns: Vec<(MessageRole, &str)> = request
        .messages
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        turns,
        vec![
            (MessageRole::User, "first"),
            (MessageRole::Assistant, "ok"),
            (MessageRole::User, "second"),
        ]
    );
}

#[tokio::test]
async fn test_stream_message() {
    let provider = ScriptedProvider::replying(&["Str", "eamed"]);
    let app = app_with(provider);
    let token = app.token("stream@example.com").await;
    let created = create_conversation(&app, &token, None).await;
    let id = created["id"].as_str().unwrap().to_string();

    let response = app
        .send(
            "POST",
            &format!("/api/llm/conversations/{}/messages", id),
            Some(&token),
            Some(json!({ "content": "Stream please", "stream": true })),
        )
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/event-stream");

    let text = String::from_utf8(response.body().to_vec()).unwrap();
    let chunk = text.find(r#"data:{"type":"chunk","content":"Str"}"#).unwrap();
    let complete = text.find(r#"data:{"type":"complete""#).unwrap();
    assert!(chunk < complete);
    assert!(text.contains(&format!(r#""conversationId":"{}""#, id)));

    let response = app
        .send(
            "GET",
            &format!("/api/llm/conversations/{}", id),
            Some(&token),
            None,
        )
        .await;
    let json = body(&response);
    let messages = json["data"]["messages"].as_array().unwrap().clone();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["content"], "Streamed");
    assert_eq!(messages[1]["tokens"], 500);
}

#[tokio::test]
async fn test_stream_reports_provider_failure_in_band() {
    let provider = ScriptedProvider::failing(LlmError::HttpError {
        status: 500,
        body: "upstream exploded".to_string(),
    });
    let app = app_with(provider);
    let token = app.token("streamfail@example.com").await;
    let created = create_conversation(&app, &token, None).await;

    let response = app
        .send(
            "POST",
            &format!(
                "/api/llm/conversations/{}/messages",
                created["id"].as_str().unwrap()
            ),
            Some(&token),
            Some(json!({ "content": "hello", "stream": true })),
        )
        .await;
    assert_eq!(response.status(), 200);
    let text = String::from_utf8(response.body().to_vec()).unwrap();
    assert!(text.contains(r#"{"type":"error","error":"Failed to send streaming message"}"#));
    assert!(!text.contains("upstream exploded"));
}

#[tokio::test]
async fn test_provider_errors() {
    let provider = ScriptedProvider::failing(LlmError::RateLimitExceeded {
        retry_after: Some(Duration::from_secs(30)),
    });
    let app = app_with(provider);
    let token = app.token("limited@example.com").await;
    let created = create_conversation(&app, &token, None).await;

    let response = app
        .send(
            "POST",
            &format!(
                "/api/llm/conversations/{}/messages",
                created["id"].as_str().unwrap()
            ),
            Some(&token),
            Some(json!({ "content": "hello" })),
        )
        .await;
    assert_eq!(response.status(), 429);
    assert_eq!(response.headers()["retry-after"], "30");
}

#[tokio::test]
async fn test_send_without_provider() {
    let app = TestApp::new(None);
    let token = app.token("noprovider@example.com").await;
    let created = create_conversation(&app, &token, None).await;
    let path = format!(
        "/api/llm/conversations/{}/messages",
        created["id"].as_str().unwrap()
    );

    for stream in [false, true] {
        let response = app
            .send(
                "POST",
                &path,
                Some(&token),
                Some(json!({ "content": "hello", "stream": stream })),
            )
            .await;
        assert_eq!(response.status(), 503);
        assert_eq!(body(&response)["error"], "LLM service is not configured");
    }
}

#[tokio::test]
async fn test_usage_stats() {
    let provider = ScriptedProvider::replying(&["fine"]);
    let app = app_with(provider);
    let token = app.token("usage@example.com").await;
    let created = create_conversation(&app, &token, None).await;

    app.send(
        "POST",
        &format!(
            "/api/llm/conversations/{}/messages",
            created["id"].as_str().unwrap()
        ),
        Some(&token),
        Some(json!({ "content": "how are you" })),
    )
    .await;

    let response = app
        .send("GET", "/api/llm/usage?days=7", Some(&token), None)
        .await;
    assert_eq!(response.status(), 200);
    let data = body(&response)["data"].clone();
    assert_eq!(data["totalConversations"], 1);
    assert_eq!(data["totalMessages"], 2);
    assert_eq!(data["totalTokens"], 1500);
    assert!((data["totalCost"].as_f64().unwrap() - 0.0105).abs() < 1e-9);
    assert_eq!(data["period"], "7 days");

    let response = app
        .send("GET", "/api/llm/usage?days=0", Some(&token), None)
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_chat_rate_limit() {
    let app = TestApp::new(None);
    let token = app.token("chatty@example.com").await;
    let path = format!("/api/llm/conversations/{}/messages", Uuid::new_v4());
    let message = json!({ "content": "hello" });

    for _ in 0..20 {
        let response = app
            .send("POST", &path, Some(&token), Some(message.clone()))
            .await;
        assert_ne!(response.status(), 429);
    }
    let response = app
        .send("POST", &path, Some(&token), Some(message))
        .await;
    assert_eq!(response.status(), 429);
    assert_eq!(
        body(&response)["error"],
        "Too many chat messages, please slow down"
    );
    assert!(response.headers().contains_key("retry-after"));

    // Other LLM routes only count against the wider limiter
    let response = app.send("GET", "/api/llm/models", Some(&token), None).await;
    assert_eq!(response.status(), 200);
}
