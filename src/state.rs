// Shared application state handed to every filter and handler

use std::sync::Arc;
use std::time::Instant;

use crate::auth::{AuthService, TokenService};
use crate::config::Config;
use crate::db::Store;
use crate::debug_log::DebugLogService;
use crate::llm::claude::ClaudeClient;
use crate::llm::{ChatService, LlmError, LlmProvider};
use crate::rate_limit::RateLimits;
use crate::ws::WsHub;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub auth: AuthService,
    pub chat: ChatService,
    pub debug_log: DebugLogService,
    pub hub: WsHub,
    pub limits: Arc<RateLimits>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        provider: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        let hub = WsHub::new();
        Self {
            auth: AuthService::new(store.clone(), TokenService::from_config(&config)),
            chat: ChatService::new(store.clone(), provider),
            debug_log: DebugLogService::new(store.clone(), hub.clone()),
            limits: Arc::new(RateLimits::from_config(&config)),
            config: Arc::new(config),
            store,
            hub,
            started_at: Instant::now(),
        }
    }

    /// The Anthropic client when an API key is configured
    pub fn provider_from_config(config: &Config) -> Result<Option<Arc<dyn LlmProvider>>, LlmError> {
        match config.anthropic_api_key.as_deref() {
            Some(key) => {
                let client = ClaudeClient::new(key, config.anthropic_base_url.as_str())?;
                Ok(Some(Arc::new(client)))
            }
            None => Ok(None),
        }
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}
