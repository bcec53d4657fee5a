// /api/users handlers

use std::collections::HashMap;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use warp::reply::Response;
use warp::Rejection;

use crate::error::ApiError;
use crate::filters::AuthUser;
use crate::handlers::{ok, ok_with_message, paginated};
use crate::llm::catalog;
use crate::models::{Page, Preferences, PublicUser};
use crate::state::AppState;
use crate::validation::{sanitize_opt, Validator};

pub const THEMES: [&str; 3] = ["light", "dark", "system"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesRequest {
    pub theme: Option<String>,
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub debug_mode: Option<bool>,
    pub llm_model: Option<String>,
    pub llm_temperature: Option<f64>,
    pub max_tokens: Option<i32>,
}

impl PreferencesRequest {
    fn validate(&self) -> Result<(), ApiError> {
        let mut v = Validator::new();
        v.one_of("theme", self.theme.as_deref(), &THEMES)
            .min_len("language", self.language.as_deref(), 2)
            .max_len("language", self.language.as_deref(), 10)
            .max_len("timezone", self.timezone.as_deref(), 64)
            .range("llmTemperature", self.llm_temperature, 0.0, 2.0)
            .range("maxTokens", self.max_tokens, 1, 8192);
        if let Some(model) = self.llm_model.as_deref() {
            v.check("llmModel", catalog::is_known(model), "Invalid model specified");
        }
        v.finish()
    }

    /// Overlay the provided fields on `current`
    fn apply(self, mut current: Preferences) -> Preferences {
        if let Some(theme) = self.theme {
            current.theme = theme;
        }
        if let Some(language) = self.language {
            current.language = language;
        }
        if let Some(timezone) = self.timezone {
            current.timezone = timezone;
        }
        if let Some(debug_mode) = self.debug_mode {
            current.debug_mode = debug_mode;
        }
        if let Some(model) = self.llm_model {
            current.llm_model = model;
        }
        if let Some(temperature) = self.llm_temperature {
            current.llm_temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens {
            current.max_tokens = max_tokens;
        }
        current.updated_at = Utc::now();
        current
    }
}

async fn current_preferences(
    state: &AppState,
    auth: &AuthUser,
) -> Result<Preferences, Rejection> {
    Ok(state
        .store
        .find_preferences(auth.user.id)
        .await
        .map_err(ApiError::from)?
        .unwrap_or_else(|| Preferences::defaults_for(auth.user.id)))
}

// GET /api/users/preferences
pub async fn get_preferences_handler(
    auth: AuthUser,
    state: AppState,
) -> Result<Response, Rejection> {
    let preferences = current_preferences(&state, &auth).await?;
    Ok(ok(json!({ "preferences": preferences })))
}

// PUT /api/users/preferences
pub async fn update_preferences_handler(
    auth: AuthUser,
    mut body: PreferencesRequest,
    state: AppState,
) -> Result<Response, Rejection> {
    body.language = sanitize_opt(body.language);
    body.timezone = sanitize_opt(body.timezone);
    body.validate()?;

    let preferences = body.apply(current_preferences(&state, &auth).await?);
    let saved = state
        .store
        .upsert_preferences(preferences)
        .await
        .map_err(ApiError::from)?;

    info!(user_id = %auth.user.id, "preferences updated");
    Ok(ok_with_message(
        "Preferences updated successfully",
        json!({ "preferences": saved }),
    ))
}

// GET /api/users
pub async fn list_users_handler(
    _admin: AuthUser,
    query: HashMap<String, String>,
    state: AppState,
) -> Result<Response, Rejection> {
    let limit = query.get("limit").map(|v| v.parse::<i64>().unwrap_or(-1));
    let offset = query.get("offset").map(|v| v.parse::<i64>().unwrap_or(-1));

    let mut v = Validator::new();
    v.range("limit", limit, 1, 100).range("offset", offset, 0, i64::MAX);
    v.finish()?;

    let page = Page::new(limit.unwrap_or(50), offset.unwrap_or(0));
    let users: Vec<PublicUser> = state
        .store
        .list_users(page)
        .await
        .map_err(ApiError::from)?
        .iter()
        .map(|user| user.public())
        .collect();

    Ok(paginated(users, page.limit, page.offset))
}
