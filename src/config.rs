//! Process configuration loaded from the environment

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::llm::claude::DEFAULT_BASE_URL;
use crate::logging::Profile;

/// Errors found while reading the environment. All problems are collected
/// before failing.
#[derive(Debug, Error)]
#[error("invalid configuration: {}", .problems.join("; "))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    Production,
    Test,
}

impl AppEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::Development => "development",
            AppEnv::Production => "production",
            AppEnv::Test => "test",
        }
    }

    /// Logging profile matching this environment
    pub fn logging_profile(&self) -> Profile {
        match self {
            AppEnv::Development => Profile::Development,
            AppEnv::Production => Profile::Production,
            AppEnv::Test => Profile::Test,
        }
    }
}

impl FromStr for AppEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(AppEnv::Development),
            "production" => Ok(AppEnv::Production),
            "test" => Ok(AppEnv::Test),
            other => Err(format!(
                "APP_ENV must be development, production or test (got {:?})",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_refresh_secret: String,
    pub jwt_expires_in_secs: i64,
    pub refresh_token_timeout_days: i64,
    pub app_env: AppEnv,
    pub host: IpAddr,
    pub port: u16,
    pub frontend_url: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max_requests: u32,
    /// Key clients on the first `X-Forwarded-For` hop instead of the peer
    pub trust_proxy: bool,
    pub db_max_pool_size: usize,
}

/// Configuration with secrets removed, safe to log
#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    pub app_env: &'static str,
    pub listen: String,
    pub database: &'static str,
    pub frontend_url: String,
    pub llm_enabled: bool,
    pub anthropic_base_url: String,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max_requests: u32,
    pub trust_proxy: bool,
}

const MIN_SECRET_LEN: usize = 32;

impl Config {
    /// Read `.env` (if present) and then the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is not an error
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    /// Build a configuration from explicit key/value pairs
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        let mut reader = Reader {
            vars: &vars,
            problems: Vec::new(),
        };

        let database_url = reader.required("DATABASE_URL");
        if let Some(url) = &database_url {
            let known = ["postgres://", "postgresql://", "memory://"];
            if !known.iter().any(|scheme| url.starts_with(scheme)) {
                reader
                    .problems
                    .push("DATABASE_URL must be a postgres:// or memory:// URL".to_string());
            }
        }

        let jwt_secret = reader.required("JWT_SECRET");
        if let Some(secret) = &jwt_secret {
            reader.check_secret("JWT_SECRET", secret);
        }
        let jwt_refresh_secret = match reader.optional("JWT_REFRESH_SECRET") {
            Some(secret) => {
                reader.check_secret("JWT_REFRESH_SECRET", &secret);
                secret
            }
            None => format!("{}:refresh", jwt_secret.as_deref().unwrap_or_default()),
        };

        let jwt_expires_in_secs = reader.positive("JWT_EXPIRES_IN_SECS", 3600i64);
        let refresh_token_timeout_days = reader.positive("REFRESH_TOKEN_TIMEOUT_DAYS", 7i64);
        let app_env = reader.parsed("APP_ENV", AppEnv::Development);
        let host = reader.parsed("HOST", IpAddr::from([127, 0, 0, 1]));
        let port = reader.parsed("PORT", 3000u16);
        if port == 0 {
            reader.problems.push("PORT must be between 1 and 65535".to_string());
        }
        let frontend_url = reader
            .optional("FRONTEND_URL")
            .unwrap_or_else(|| "http://localhost:5173".to_string());
        if !frontend_url.starts_with("http://") && !frontend_url.starts_with("https://") {
            reader.problems.push("FRONTEND_URL must be an http(s) URL".to_string());
        }
        let anthropic_api_key = reader.optional("ANTHROPIC_API_KEY");
        let anthropic_base_url = reader
            .optional("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let rate_limit_window_ms = reader.positive("RATE_LIMIT_WINDOW_MS", 900_000u64);
        let rate_limit_max_requests = reader.positive("RATE_LIMIT_MAX_REQUESTS", 100u32);
        let trust_proxy = reader.parsed("TRUST_PROXY", false);
        let db_max_pool_size = reader.positive("DB_MAX_POOL_SIZE", 16usize);

        if !reader.problems.is_empty() {
            return Err(ConfigError {
                problems: reader.problems,
            });
        }

        Ok(Self {
            database_url: database_url.unwrap_or_default(),
            jwt_secret: jwt_secret.unwrap_or_default(),
            jwt_refresh_secret,
            jwt_expires_in_secs,
            refresh_token_timeout_days,
            app_env,
            host,
            port,
            frontend_url,
            anthropic_api_key,
            anthropic_base_url,
            rate_limit_window_ms,
            rate_limit_max_requests,
            trust_proxy,
            db_max_pool_size,
        })
    }

    pub fn is_development(&self) -> bool {
        self.app_env == AppEnv::Development
    }

    pub fn is_production(&self) -> bool {
        self.app_env == AppEnv::Production
    }

    pub fn has_llm_key(&self) -> bool {
        self.anthropic_api_key.is_some()
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url.starts_with("memory://")
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            app_env: self.app_env.as_str(),
            listen: self.listen_addr().to_string(),
            database: if self.uses_memory_store() {
                "memory"
            } else {
                "postgres"
            },
            frontend_url: self.frontend_url.clone(),
            llm_enabled: self.has_llm_key(),
            anthropic_base_url: self.anthropic_base_url.clone(),
            rate_limit_window_ms: self.rate_limit_window_ms,
            rate_limit_max_requests: self.rate_limit_max_requests,
            trust_proxy: self.trust_proxy,
        }
    }
}

struct Reader<'a> {
    vars: &'a HashMap<String, String>,
    problems: Vec<String>,
}

impl Reader<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        self.vars.get(key).map(|v| v.trim().to_string())
    }

    fn required(&mut self, key: &str) -> Option<String> {
        let value = self.optional(key);
        if value.is_none() {
            self.problems.push(format!("{} is required", key));
        }
        value
    }

    fn parsed<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => match raw.parse() {
                Ok(value) => value,
                Err(e) => {
                    self.problems.push(format!("Invalid {} value: {}", key, e));
                    default
                }
            },
            None => default,
        }
    }

    fn positive<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr + PartialOrd + Default + Copy,
        T::Err: std::fmt::Display,
    {
        let value = self.parsed(key, default);
        if value <= T::default() {
            self.problems.push(format!("{} must be positive", key));
        }
        value
    }

    fn check_secret(&mut self, key: &str, secret: &str) {
        if secret.len() < MIN_SECRET_LEN {
            self.problems.push(format!(
                "{} must be at least {} characters long",
                key, MIN_SECRET_LEN
            ));
        }
    }
}
