//! Account and session operations

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::jwt::{hash_token, TokenPair, TokenService};
use crate::auth::password::{hash_password, verify_password};
use crate::db::{DbError, Store};
use crate::error::ApiError;
use crate::models::{NewSession, NewUser, ProfileUpdate, PublicUser, SessionInfo, User, UserRole};
use crate::validation::validate_password;

/// Where a login came from
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// A user together with a freshly issued token pair
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub user: PublicUser,
    pub tokens: TokenPair,
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn Store>,
    tokens: TokenService,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, tokens: TokenService) -> Self {
        Self { store, tokens }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub async fn register(
        &self,
        input: RegisterInput,
        client: ClientInfo,
    ) -> Result<AuthSession, ApiError> {
        let email = normalize_email(&input.email);
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(ApiError::conflict("User with this email already exists"));
        }

        let password_hash = hash_password(&input.password).await?;
        let user = self
            .store
            .create_user(NewUser {
                email,
                password_hash,
                first_name: input.first_name,
                last_name: input.last_name,
                role: UserRole::User,
            })
            .await
            .map_err(|e| match e {
                DbError::UniqueViolation(_) => {
                    ApiError::conflict("User with this email already exists")
                }
                other => other.into(),
            })?;

        let tokens = self.start_session(&user, client).await?;
        info!(user_id = %user.id, "user registered");
        Ok(AuthSession {
            user: user.public(),
            tokens,
        })
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: ClientInfo,
    ) -> Result<AuthSession, ApiError> {
        let invalid = || ApiError::unauthorized("Invalid credentials");

        let user = self
            .store
            .find_user_by_email(&normalize_email(email))
            .await?
            .filter(|user| user.is_active)
            .ok_or_else(invalid)?;

        if !verify_password(password, &user.password_hash).await? {
            return Err(invalid());
        }

        let tokens = self.start_session(&user, client).await?;
        info!(user_id = %user.id, "user logged in");
        Ok(AuthSession {
            user: user.public(),
            tokens,
        })
    }

    /// Exchange a refresh token for a new pair; the old token stops working
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let claims = self.tokens.verify_refresh(refresh_token)?;
        let invalid = || ApiError::unauthorized("Invalid refresh token");

        let session = self
            .store
            .find_session_by_token_hash(&hash_token(refresh_token))
            .await?
            .filter(|session| session.is_active && session.user_id == claims.sub)
            .ok_or_else(invalid)?;

        let user = self
            .store
            .find_user_by_id(session.user_id)
            .await?
            .filter(|user| user.is_active)
            .ok_or_else(invalid)?;

        if session.is_expired(Utc::now()) {
            self.store.deactivate_session(session.id).await?;
            return Err(ApiError::unauthorized("Refresh token expired"));
        }

        let new_refresh = self.tokens.refresh_token(user.id)?;
        let rotated = self
            .store
            .rotate_session_token(session.id, &session.refresh_token_hash, &hash_token(&new_refresh))
            .await?;
        if !rotated {
            return Err(invalid());
        }
        let access_token = self.tokens.access_token(&user, Some(session.id))?;

        Ok(TokenPair {
            access_token,
            refresh_token: new_refresh,
        })
    }

    /// End the session holding `refresh_token`, or every session when `None`
    pub async fn logout(&self, user_id: Uuid, refresh_token: Option<&str>) -> Result<u64, ApiError> {
        let hash = refresh_token.map(hash_token);
        let count = self
            .store
            .deactivate_user_sessions(user_id, hash.as_deref())
            .await?;
        info!(user_id = %user_id, sessions = count, "user logged out");
        Ok(count)
    }

    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ApiError> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))?;

        if !verify_password(current_password, &user.password_hash).await? {
            return Err(ApiError::unauthorized("Current password is incorrect"));
        }
        validate_password(new_password).map_err(ApiError::bad_request)?;

        let password_hash = hash_password(new_password).await?;
        self.store
            .update_user_password(user_id, &password_hash)
            .await?;
        self.store.deactivate_user_sessions(user_id, None).await?;

        info!(user_id = %user_id, "password changed");
        Ok(())
    }

    pub async fn update_profile(
        &self,
        user: &User,
        mut update: ProfileUpdate,
    ) -> Result<PublicUser, ApiError> {
        update.email = update.email.as_deref().map(normalize_email);

        if let Some(email) = update.email.as_deref() {
            if email != user.email {
                let taken = self
                    .store
                    .find_user_by_email(email)
                    .await?
                    .is_some_and(|other| other.id != user.id);
                if taken {
                    return Err(ApiError::conflict("Email already in use"));
                }
            }
        }

        let updated = self
            .store
            .update_user_profile(user.id, update)
            .await
            .map_err(|e| match e {
                DbError::UniqueViolation(_) => ApiError::conflict("Email already in use"),
                other => other.into(),
            })?;
        Ok(updated.public())
    }

    /// Sessions newest first; `current` marks the caller's own session
    pub async fn sessions(
        &self,
        user_id: Uuid,
        current: Option<Uuid>,
    ) -> Result<Vec<SessionInfo>, ApiError> {
        let sessions = self.store.list_sessions(user_id).await?;
        Ok(sessions.iter().map(|s| s.info(current)).collect())
    }

    pub async fn revoke_session(&self, user_id: Uuid, session_id: Uuid) -> Result<(), ApiError> {
        let revoked = self.store.revoke_session(user_id, session_id).await?;
        if revoked == 0 {
            warn!(user_id = %user_id, session_id = %session_id, "session not found for revoke");
            return Err(ApiError::not_found("Session not found"));
        }
        info!(user_id = %user_id, session_id = %session_id, "session revoked");
        Ok(())
    }

    /// Fresh user row for verified claims; fails for unknown or inactive users
    pub async fn active_user(&self, user_id: Uuid) -> Result<User, ApiError> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .filter(|user| user.is_active)
            .ok_or_else(|| ApiError::unauthorized("User not found or inactive"))
    }

    async fn start_session(&self, user: &User, client: ClientInfo) -> Result<TokenPair, ApiError> {
        let refresh_token = self.tokens.refresh_token(user.id)?;
        let session = self
            .store
            .create_session(NewSession {
                user_id: user.id,
                refresh_token_hash: hash_token(&refresh_token),
                user_agent: client.user_agent,
                ip_address: client.ip_address,
                expires_at: Utc::now() + self.tokens.refresh_ttl(),
            })
            .await?;
        let access_token = self.tokens.access_token(user, Some(session.id))?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
