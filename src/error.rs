//! API error type and the rejection handler that renders it
//!
//! Every failure leaves the server as
//! `{ "success": false, "error": "...", "validationErrors"?: {...} }`.

use std::collections::BTreeMap;
use std::convert::Infallible;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};
use warp::http::{header, HeaderValue, StatusCode};
use warp::reject::Reject;
use warp::{Rejection, Reply};

use crate::db::DbError;

/// Field name to message
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{message}")]
    Validation {
        message: String,
        errors: FieldErrors,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    TooManyRequests {
        message: String,
        retry_after_secs: u64,
    },

    #[error("{0}")]
    ServiceUnavailable(String),

    /// The detail is logged and only shown in development
    #[error("Internal server error")]
    Internal(String),
}

impl Reject for ApiError {}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        ApiError::Internal(detail.into())
    }

    /// 422 with per-field messages
    pub fn validation(errors: FieldErrors) -> Self {
        ApiError::Validation {
            message: "Validation failed".to_string(),
            errors,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn into_response(self, expose_internal: bool) -> warp::reply::Response {
        let status = self.status();
        let message = self.to_string();

        let (validation_errors, details, retry_after) = match self {
            ApiError::Validation { errors, .. } => (Some(errors), None, None),
            ApiError::Internal(detail) => {
                error!(detail = %detail, "internal error");
                (None, expose_internal.then_some(detail), None)
            }
            ApiError::TooManyRequests {
                retry_after_secs, ..
            } => (None, None, Some(retry_after_secs)),
            _ => (None, None, None),
        };

        let body = ErrorBody {
            success: false,
            error: message,
            validation_errors,
            details,
        };
        let mut response =
            warp::reply::with_status(warp::reply::json(&body), status).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::UniqueViolation(_) => ApiError::conflict("Resource already exists"),
            DbError::NotFound(_) => ApiError::not_found("Resource not found"),
            other => ApiError::internal(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(rename = "validationErrors", skip_serializing_if = "Option::is_none")]
    validation_errors: Option<FieldErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Turn any rejection into the JSON error envelope
///
/// `expose_internal` adds the detail of 500 errors to the body.
pub async fn handle_rejection(
    rejection: Rejection,
    expose_internal: bool,
) -> Result<warp::reply::Response, Infallible> {
    if rejection.is_not_found() {
        return Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({ "message": "Route not found" })),
            StatusCode::NOT_FOUND,
        )
        .into_response());
    }

    let api_error = if let Some(err) = rejection.find::<ApiError>() {
        err.clone()
    } else if let Some(err) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        warn!(error = %err, "invalid request body");
        ApiError::bad_request("Invalid JSON body")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(plain(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large"));
    } else if rejection.find::<warp::reject::UnsupportedMediaType>().is_some() {
        ApiError::bad_request("Content-Type must be application/json")
    } else if rejection.find::<warp::reject::LengthRequired>().is_some() {
        ApiError::bad_request("Request body is required")
    } else if let Some(err) = rejection.find::<warp::reject::InvalidQuery>() {
        ApiError::bad_request(format!("Invalid query string: {}", err))
    } else if let Some(err) = rejection.find::<warp::reject::MissingHeader>() {
        if err.name() == "authorization" {
            ApiError::unauthorized("Access token required")
        } else {
            ApiError::bad_request(err.to_string())
        }
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(plain(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"));
    } else {
        ApiError::internal(format!("unhandled rejection: {:?}", rejection))
    };

    Ok(api_error.into_response(expose_internal))
}

fn plain(status: StatusCode, message: &str) -> warp::reply::Response {
    let body = ErrorBody {
        success: false,
        error: message.to_string(),
        validation_errors: None,
        details: None,
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::Filter;

    async fn render(err: ApiError, expose_internal: bool) -> warp::http::Response<bytes::Bytes> {
        let filter = warp::any()
            .and_then(move || {
                let err = err.clone();
                async move { Err::<String, Rejection>(err.into()) }
            })
            .recover(move |r| handle_rejection(r, expose_internal));
        warp::test::request().reply(&filter).await
    }

    fn json(response: &warp::http::Response<bytes::Bytes>) -> serde_json::Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::validation(FieldErrors::new()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::ServiceUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::internal("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_error_message_hides_detail() {
        let err = ApiError::internal("connection refused on 10.0.0.5");
        assert_eq!(err.to_string(), "Internal server error");
    }

    #[test]
    fn test_db_error_conversion() {
        let err: ApiError = DbError::UniqueViolation("users_email_key".into()).into();
        assert!(matches!(err, ApiError::Conflict(_)));
        let err: ApiError = DbError::NotFound("user".into()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
        let err: ApiError = DbError::Pool("timeout".into()).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    #[tokio::test]
    async fn test_validation_envelope() {
        let mut errors = FieldErrors::new();
        errors.insert("email".into(), "Invalid email format".into());
        let response = render(ApiError::validation(errors), false).await;

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json(&response);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Validation failed");
        assert_eq!(body["validationErrors"]["email"], "Invalid email format");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let filter = warp::path("known")
            .map(|| "ok")
            .recover(|r| handle_rejection(r, false));
        let response = warp::test::request()
            .path("/unknown")
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(&response)["message"], "Route not found");
    }

    #[tokio::test]
    async fn test_retry_after_header() {
        let err = ApiError::TooManyRequests {
            message: "Too many requests".into(),
            retry_after_secs: 42,
        };
        let response = render(err, false).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[tokio::test]
    async fn test_internal_detail_only_when_exposed() {
        let hidden = render(ApiError::internal("boom"), false).await;
        assert!(json(&hidden).get("details").is_none());
        assert_eq!(json(&hidden)["error"], "Internal server error");

        let shown = render(ApiError::internal("boom"), true).await;
        assert_eq!(json(&shown)["details"], "boom");
    }
}
