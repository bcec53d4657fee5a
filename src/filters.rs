// Reusable warp filters: shared state, client identity, auth and rate limits

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use tracing::warn;
use warp::{Filter, Rejection};

use crate::auth::{AccessClaims, ClientInfo};
use crate::error::ApiError;
use crate::models::User;
use crate::rate_limit::Limit;
use crate::state::AppState;

/// Request bodies above this size are rejected with 413
pub const MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub claims: AccessClaims,
}

pub fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// The peer address; the first `X-Forwarded-For` hop instead when running
/// behind a trusted proxy
pub fn client_ip(trust_proxy: bool) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-forwarded-for")
        .and(warp::addr::remote())
        .map(move |forwarded: Option<String>, remote: Option<SocketAddr>| {
            forwarded
                .filter(|_| trust_proxy)
                .as_deref()
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .or_else(|| remote.map(|addr| addr.ip().to_string()))
                .unwrap_or_else(|| "unknown".to_string())
        })
}

pub fn client_info(trust_proxy: bool) -> impl Filter<Extract = (ClientInfo,), Error = Rejection> + Clone {
    warp::header::optional::<String>("user-agent")
        .and(client_ip(trust_proxy))
        .map(|user_agent, ip| ClientInfo {
            user_agent,
            ip_address: Some(ip),
        })
}

/// Count the request against one of the limiters, keyed by client address
pub fn rate_limit(
    state: AppState,
    limit: Limit,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    client_ip(state.config.trust_proxy)
        .and(with_state(state))
        .and_then(move |ip: String, state: AppState| async move {
            state.limits.get(limit).check(&ip).map_err(Rejection::from)
        })
        .untuple_one()
}

/// JSON body with the size limit applied
pub fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// JSON body when one is sent, `T::default()` when the body is empty.
/// A body that is present but malformed still rejects.
pub fn json_body_or_default<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Default + Send + 'static,
{
    let empty = warp::header::optional::<u64>("content-length")
        .and_then(|length: Option<u64>| async move {
            match length {
                None | Some(0) => Ok(()),
                Some(_) => Err(warp::reject::not_found()),
            }
        })
        .untuple_one()
        .map(T::default);

    empty.or(json_body::<T>()).unify()
}

/// Query string as a map; absent query means empty map
pub fn query_map() -> impl Filter<Extract = (HashMap<String, String>,), Error = Rejection> + Clone {
    warp::query::<HashMap<String, String>>()
}

fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn resolve(state: &AppState, token: &str) -> Result<AuthUser, ApiError> {
    let claims = state.auth.tokens().verify_access(token)?;
    let user = state.auth.active_user(claims.sub).await?;
    Ok(AuthUser { user, claims })
}

/// Require `Authorization: Bearer <access token>` for an active user
pub fn authenticated(state: AppState) -> impl Filter<Extract = (AuthUser,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_state(state))
        .and_then(|header: Option<String>, state: AppState| async move {
            let Some(token) = bearer_token(header.as_deref()) else {
                return Err(Rejection::from(ApiError::unauthorized("Access token required")));
            };
            resolve(&state, token).await.map_err(|e| {
                warn!(error = %e, "authentication failed");
                Rejection::from(e)
            })
        })
}

/// Like [`authenticated`] but never fails; bad or missing tokens give `None`
pub fn optional_auth(
    state: AppState,
) -> impl Filter<Extract = (Option<AuthUser>,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_state(state))
        .and_then(|header: Option<String>, state: AppState| async move {
            let user = match bearer_token(header.as_deref()) {
                Some(token) => resolve(&state, token).await.ok(),
                None => None,
            };
            Ok::<_, Infallible>(user)
        })
}

/// Authenticated caller with the `ADMIN` or `SUPER_ADMIN` role
pub fn admin(state: AppState) -> impl Filter<Extract = (AuthUser,), Error = Rejection> + Clone {
    authenticated(state).and_then(|auth: AuthUser| async move {
        if auth.user.role.is_admin() {
            Ok(auth)
        } else {
            warn!(
                user_id = %auth.user.id,
                role = auth.user.role.as_str(),
                "unauthorized role access attempt"
            );
            Err(Rejection::from(ApiError::forbidden("Insufficient permissions")))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[tokio::test]
    async fn test_client_ip_uses_peer_address() {
        let ip = warp::test::request()
            .remote_addr("192.0.2.1:4000".parse().unwrap())
            .header("x-forwarded-for", "203.0.113.7")
            .filter(&client_ip(false))
            .await
            .unwrap();
        assert_eq!(ip, "192.0.2.1");

        let ip = warp::test::request().filter(&client_ip(false)).await.unwrap();
        assert_eq!(ip, "unknown");
    }

    #[tokio::test]
    async fn test_client_ip_behind_proxy() {
        let ip = warp::test::request()
            .remote_addr("192.0.2.1:4000".parse().unwrap())
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .filter(&client_ip(true))
            .await
            .unwrap();
        assert_eq!(ip, "203.0.113.7");

        let ip = warp::test::request()
            .remote_addr("192.0.2.1:4000".parse().unwrap())
            .filter(&client_ip(true))
            .await
            .unwrap();
        assert_eq!(ip, "192.0.2.1");
    }

    #[derive(Debug, Default, serde::Deserialize, PartialEq)]
    struct Named {
        name: Option<String>,
    }

    #[tokio::test]
    async fn test_json_body_or_default() {
        let filter = json_body_or_default::<Named>();

        let empty = warp::test::request().method("POST").filter(&filter).await.unwrap();
        assert_eq!(empty, Named::default());

        let sent = warp::test::request()
            .method("POST")
            .json(&serde_json::json!({ "name": "x" }))
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(sent.name.as_deref(), Some("x"));

        let rejection = warp::test::request()
            .method("POST")
            .json(&serde_json::json!({ "name": 5 }))
            .filter(&filter)
            .await
            .unwrap_err();
        assert!(rejection
            .find::<warp::filters::body::BodyDeserializeError>()
            .is_some());
    }
}
