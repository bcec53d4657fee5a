#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use testcontainers::{core::WaitFor, GenericImage, RunnableImage};
use warp::http::Response;
use bytes::Bytes;
use warp::{Filter, Rejection, Reply};

use webapp_api::auth::hash_password;
use webapp_api::config::Config;
use webapp_api::db::{MemoryStore, Store};
use webapp_api::llm::{
    EventStream, FinishReason, GenerateRequest, LlmError, LlmProvider, StreamEvent, UsageMetadata,
};
use webapp_api::models::{NewUser, UserRole};
use webapp_api::routes::configure_routes;
use webapp_api::state::AppState;

/// PostgreSQL image used by the ignored store tests
pub const POSTGRES_IMAGE: &str = "postgres";
pub const POSTGRES_TAG: &str = "16-alpine";
pub const POSTGRES_PORT: u16 = 5432;
pub const POSTGRES_USER: &str = "postgres";
pub const POSTGRES_PASSWORD: &str = "webapp_test_password";
pub const POSTGRES_DB: &str = "postgres";

pub const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const PASSWORD: &str = "Password123!";

/// Create a runnable PostgreSQL container
pub fn create_postgres_container() -> RunnableImage<GenericImage> {
    let image = GenericImage::new(POSTGRES_IMAGE, POSTGRES_TAG)
        .with_env_var("POSTGRES_PASSWORD", POSTGRES_PASSWORD)
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ));

    RunnableImage::from(image).with_tag(POSTGRES_TAG)
}

/// Build a connection string for the running container
pub fn build_connection_string(host: &str, port: u16) -> String {
    format!(
        "postgresql://{}:{}@{}:{}/{}",
        POSTGRES_USER, POSTGRES_PASSWORD, host, port, POSTGRES_DB
    )
}

/// Test configuration backed by the in-memory store; `overrides` win
pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut vars = vec![
        ("DATABASE_URL", "memory://"),
        ("JWT_SECRET", JWT_SECRET),
        ("APP_ENV", "test"),
    ];
    vars.extend_from_slice(overrides);
    Config::from_vars(vars).expect("valid test config")
}

/// Provider that replays a fixed reply and records every request
pub struct ScriptedProvider {
    pub chunks: Vec<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub fail_with: Option<LlmError>,
    pub requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedProvider {
    pub fn replying(chunks: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            input_tokens: 1000,
            output_tokens: 500,
            fail_with: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: LlmError) -> Arc<Self> {
        Arc::new(Self {
            chunks: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            fail_with: Some(error),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn stream_generate(&self, request: GenerateRequest) -> Result<EventStream, LlmError> {
        self.requests.lock().unwrap().push(request);
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }

        let mut events = vec![Ok(StreamEvent::MessageStart {
            id: "msg_test".to_string(),
            usage: UsageMetadata::new(self.input_tokens, 0),
        })];
        events.extend(self.chunks.iter().map(|chunk| {
            Ok(StreamEvent::TextDelta {
                text: chunk.clone(),
            })
        }));
        events.push(Ok(StreamEvent::MessageEnd {
            finish_reason: FinishReason::EndTurn,
            usage: UsageMetadata::new(self.input_tokens, self.output_tokens),
        }));
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

impl TestApp {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>) -> Self {
        Self::with_config(test_config(&[]), provider)
    }

    pub fn with_config(config: Config, provider: Option<Arc<dyn LlmProvider>>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(config, store.clone(), provider);
        Self { state, store }
    }

    pub fn routes(&self) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
        configure_routes(self.state.clone())
    }

    /// Send a request through the full filter stack
    pub async fn send(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response<Bytes> {
        let mut request = warp::test::request().method(method).path(path);
        if let Some(token) = token {
            request = request.header("authorization", format!("Bearer {}", token));
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.reply(&self.routes()).await
    }

    /// Register through the API and return the `data` object
    pub async fn register(&self, email: &str) -> Value {
        let response = self
            .send(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({
                    "email": email,
                    "password": PASSWORD,
                    "firstName": "Test",
                    "lastName": "User",
                })),
            )
            .await;
        assert_eq!(response.status(), 201, "{:?}", response.body());
        body(&response)["data"].clone()
    }

    /// Register and return the access token
    pub async fn token(&self, email: &str) -> String {
        let data = self.register(email).await;
        data["tokens"]["accessToken"]
            .as_str()
            .expect("access token")
            .to_string()
    }

    /// Insert an admin directly and log in through the API
    pub async fn admin_token(&self, email: &str) -> String {
        let password_hash = hash_password(PASSWORD).await.unwrap();
        self.store
            .create_user(NewUser {
                email: email.to_string(),
                password_hash,
                first_name: Some("Admin".to_string()),
                last_name: None,
                role: UserRole::Admin,
            })
            .await
            .unwrap();

        let response = self
            .send(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(response.status(), 200);
        body(&response)["data"]["tokens"]["accessToken"]
            .as_str()
            .unwrap()
            .to_string()
    }
}

pub fn body(response: &Response<Bytes>) -> Value {
    serde_json::from_slice(response.body()).expect("JSON body")
}
