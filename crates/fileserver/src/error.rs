//! Errors that end a request early, and how they look on the wire

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::fmt;

use crate::range::RangeError;

/// Request-terminating errors
///
/// Messages are fixed strings: nothing from the request path (and so never
/// the capability token) ends up in a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeError {
    /// Wrong or missing token, or no such resource; deliberately one variant
    NotFound,
    BadRequest(&'static str),
    /// Carries the resource length for `Content-Range: bytes */len`
    RangeNotSatisfiable(u64),
    Internal(String),
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeError::NotFound => write!(f, "File not found"),
            ServeError::BadRequest(reason) => write!(f, "Invalid range request: {}", reason),
            ServeError::RangeNotSatisfiable(_) => write!(f, "Requested Range Not Satisfiable"),
            ServeError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ServeError {}

impl ServeError {
    /// Build the response, turning 404 into a redirect when a target is set
    pub fn into_response_with_redirect(self, redirect: Option<&str>) -> Response {
        match (self, redirect) {
            (ServeError::NotFound, Some(location)) => {
                (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
            }
            (err, _) => err.into_response(),
        }
    }
}

impl From<RangeError> for ServeError {
    fn from(err: RangeError) -> Self {
        match err {
            RangeError::Malformed(reason) => ServeError::BadRequest(reason),
            // Only `resolve` knows the length; reaching this is a caller bug
            RangeError::Unsatisfiable => {
                ServeError::Internal("range resolved without a resource length".to_string())
            }
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            ServeError::NotFound => (StatusCode::NOT_FOUND, message).into_response(),
            ServeError::BadRequest(_) => (StatusCode::BAD_REQUEST, message).into_response(),
            ServeError::RangeNotSatisfiable(size) => (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{}", size))],
                message,
            )
                .into_response(),
            ServeError::Internal(msg) => {
                tracing::error!("Request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
            }
        }
    }
}
