// Handlers module

use serde::Serialize;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Reply;

pub mod auth;
pub mod debug;
pub mod health;
pub mod llm;
pub mod users;

/// Limit/offset echo attached to list responses
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub total: usize,
}

/// `{ "success": true, "data"?, "message"?, "pagination"? }`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl<T: Serialize> Envelope<T> {
    fn into_response(self, status: StatusCode) -> Response {
        warp::reply::with_status(warp::reply::json(&self), status).into_response()
    }
}

pub fn ok<T: Serialize>(data: T) -> Response {
    Envelope {
        success: true,
        message: None,
        data: Some(data),
        pagination: None,
    }
    .into_response(StatusCode::OK)
}

pub fn ok_with_message<T: Serialize>(message: &str, data: T) -> Response {
    Envelope {
        success: true,
        message: Some(message.to_string()),
        data: Some(data),
        pagination: None,
    }
    .into_response(StatusCode::OK)
}

pub fn created<T: Serialize>(message: Option<&str>, data: T) -> Response {
    Envelope {
        success: true,
        message: message.map(str::to_string),
        data: Some(data),
        pagination: None,
    }
    .into_response(StatusCode::CREATED)
}

/// Success with only a message
pub fn message(message: &str) -> Response {
    Envelope::<()> {
        success: true,
        message: Some(message.to_string()),
        data: None,
        pagination: None,
    }
    .into_response(StatusCode::OK)
}

pub fn paginated<T: Serialize>(data: Vec<T>, limit: i64, offset: i64) -> Response {
    let total = data.len();
    Envelope {
        success: true,
        message: None,
        data: Some(data),
        pagination: Some(Pagination {
            limit,
            offset,
            total,
        }),
    }
    .into_response(StatusCode::OK)
}
