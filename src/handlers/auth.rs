// /api/auth handlers

use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use warp::reply::Response;
use warp::Rejection;

use crate::auth::{ClientInfo, RegisterInput};
use crate::filters::AuthUser;
use crate::handlers::{created, message, ok, ok_with_message};
use crate::models::{LogLevel, ProfileUpdate};
use crate::state::AppState;
use crate::validation::{sanitize_opt, Validator};

const COMPONENT: &str = "AUTH";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

async fn auth_event(
    state: &AppState,
    level: LogLevel,
    message: String,
    user_id: Option<Uuid>,
    metadata: Value,
) {
    state
        .debug_log
        .log_event(
            level,
            message,
            Some(COMPONENT.to_string()),
            user_id,
            Some(metadata),
        )
        .await;
}

// POST /api/auth/register
pub async fn register_handler(
    body: RegisterRequest,
    client: ClientInfo,
    state: AppState,
) -> Result<Response, Rejection> {
    // Passwords are compared verbatim and never sanitised
    let email = sanitize_opt(body.email);
    let first_name = sanitize_opt(body.first_name).filter(|s| !s.is_empty());
    let last_name = sanitize_opt(body.last_name).filter(|s| !s.is_empty());

    let mut v = Validator::new();
    let email = v.required("email", email.as_deref()).map(str::to_string);
    v.email("email", email.as_deref());
    let password = v.required("password", body.password.as_deref()).map(str::to_string);
    v.password("password", password.as_deref())
        .max_len("firstName", first_name.as_deref(), 50)
        .max_len("lastName", last_name.as_deref(), 50);
    v.finish()?;

    let session = state
        .auth
        .register(
            RegisterInput {
                email: email.unwrap_or_default(),
                password: password.unwrap_or_default(),
                first_name,
                last_name,
            },
            client.clone(),
        )
        .await?;

    auth_event(
        &state,
        LogLevel::Info,
        format!("User registered: {}", session.user.email),
        Some(session.user.id),
        json!({
            "email": session.user.email,
            "role": session.user.role,
            "ip": client.ip_address,
        }),
    )
    .await;

    Ok(created(Some("User registered successfully"), session))
}

// POST /api/auth/login
pub async fn login_handler(
    body: LoginRequest,
    client: ClientInfo,
    state: AppState,
) -> Result<Response, Rejection> {
    let email = sanitize_opt(body.email);

    let mut v = Validator::new();
    v.required("email", email.as_deref());
    v.email("email", email.as_deref());
    v.required("password", body.password.as_deref());
    v.finish()?;

    let email = email.unwrap_or_default();
    let password = body.password.unwrap_or_default();

    match state.auth.login(&email, &password, client.clone()).await {
        Ok(session) => {
            auth_event(
                &state,
                LogLevel::Info,
                format!("User logged in: {}", session.user.email),
                Some(session.user.id),
                json!({
                    "email": session.user.email,
                    "ip": client.ip_address,
                    "userAgent": client.user_agent,
                }),
            )
            .await;
            Ok(ok_with_message("Login successful", session))
        }
        Err(e) => {
            auth_event(
                &state,
                LogLevel::Warn,
                format!("Failed login attempt: {}", email),
                None,
                json!({
                    "email": email,
                    "ip": client.ip_address,
                    "userAgent": client.user_agent,
                }),
            )
            .await;
            Err(e.into())
        }
    }
}

// POST /api/auth/refresh
pub async fn refresh_handler(
    body: RefreshRequest,
    state: AppState,
) -> Result<Response, Rejection> {
    let mut v = Validator::new();
    let token = v
        .required("refreshToken", body.refresh_token.as_deref())
        .map(str::to_string);
    v.finish()?;

    let tokens = state.auth.refresh(&token.unwrap_or_default()).await?;
    Ok(ok_with_message(
        "Token refreshed successfully",
        json!({ "tokens": tokens }),
    ))
}

// POST /api/auth/logout
pub async fn logout_handler(
    auth: AuthUser,
    body: RefreshRequest,
    client: ClientInfo,
    state: AppState,
) -> Result<Response, Rejection> {
    // No token ends every session, same as logout-all
    let token = body.refresh_token.filter(|t| !t.is_empty());
    state.auth.logout(auth.user.id, token.as_deref()).await?;

    auth_event(
        &state,
        LogLevel::Info,
        format!("User logged out: {}", auth.user.email),
        Some(auth.user.id),
        json!({ "email": auth.user.email, "ip": client.ip_address }),
    )
    .await;

    Ok(message("Logout successful"))
}

// POST /api/auth/logout-all
pub async fn logout_all_handler(
    auth: AuthUser,
    client: ClientInfo,
    state: AppState,
) -> Result<Response, Rejection> {
    state.auth.logout(auth.user.id, None).await?;

    auth_event(
        &state,
        LogLevel::Info,
        format!("User logged out from all devices: {}", auth.user.email),
        Some(auth.user.id),
        json!({ "email": auth.user.email, "ip": client.ip_address }),
    )
    .await;

    Ok(message("Logged out from all devices successfully"))
}

// GET /api/auth/me
pub async fn me_handler(auth: AuthUser) -> Result<Response, Rejection> {
    Ok(ok(json!({ "user": auth.user.public() })))
}

// PUT /api/auth/me
pub async fn update_me_handler(
    auth: AuthUser,
    body: ProfileRequest,
    client: ClientInfo,
    state: AppState,
) -> Result<Response, Rejection> {
    let update = ProfileUpdate {
        first_name: sanitize_opt(body.first_name),
        last_name: sanitize_opt(body.last_name),
        email: sanitize_opt(body.email).filter(|s| !s.is_empty()),
    };

    let mut v = Validator::new();
    v.max_len("firstName", update.first_name.as_deref(), 50)
        .max_len("lastName", update.last_name.as_deref(), 50)
        .email("email", update.email.as_deref());
    v.finish()?;

    let changes = serde_json::to_value(&update).unwrap_or(Value::Null);
    let user = state.auth.update_profile(&auth.user, update).await?;

    auth_event(
        &state,
        LogLevel::Info,
        format!("Profile updated: {}", auth.user.email),
        Some(auth.user.id),
        json!({ "changes": changes, "ip": client.ip_address }),
    )
    .await;

    Ok(ok_with_message(
        "Profile updated successfully",
        json!({ "user": user }),
    ))
}

// PUT /api/auth/change-password
pub async fn change_password_handler(
    auth: AuthUser,
    body: ChangePasswordRequest,
    client: ClientInfo,
    state: AppState,
) -> Result<Response, Rejection> {
    let mut v = Validator::new();
    let current = v
        .required("currentPassword", body.current_password.as_deref())
        .map(str::to_string);
    let new = v
        .required("newPassword", body.new_password.as_deref())
        .map(str::to_string);
    v.password("newPassword", new.as_deref());
    v.finish()?;

    state
        .auth
        .change_password(
            auth.user.id,
            &current.unwrap_or_default(),
            &new.unwrap_or_default(),
        )
        .await?;

    auth_event(
        &state,
        LogLevel::Info,
        format!("Password changed: {}", auth.user.email),
        Some(auth.user.id),
        json!({ "ip": client.ip_address }),
    )
    .await;

    Ok(message("Password changed successfully"))
}

// GET /api/auth/sessions
pub async fn sessions_handler(auth: AuthUser, state: AppState) -> Result<Response, Rejection> {
    let sessions = state.auth.sessions(auth.user.id, auth.claims.sid).await?;
    Ok(ok(json!({ "sessions": sessions })))
}

// DELETE /api/auth/sessions/{sessionId}
pub async fn revoke_session_handler(
    session_id: Uuid,
    auth: AuthUser,
    state: AppState,
) -> Result<Response, Rejection> {
    state.auth.revoke_session(auth.user.id, session_id).await?;
    Ok(message("Session revoked successfully"))
}
