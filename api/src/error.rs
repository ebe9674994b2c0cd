use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::ident::IdentError;

/// Errors surfaced to callers of the services and, through axum, to clients.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Server is busy, try again later")]
    TooManyRequests,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(reason: impl Into<String>) -> Self {
        ApiError::BadRequest(reason.into())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        ApiError::Internal(reason.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::TooManyRequests => "too_many_requests",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Failures inside the scraping layer. These never leave the services as-is.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Ident(#[from] IdentError),

    #[error("failed to fetch {url}: {reason}")]
    FetchFailure { url: String, reason: String },

    #[error("failed to parse page: {0}")]
    ParseFailure(String),

    #[error("unable to fetch {0}")]
    UnableToFetch(String),

    #[error("search engine unavailable: {0}")]
    SearchUnavailable(String),

    #[error("no results")]
    NoResults,
}

impl ScrapeError {
    pub fn parse(reason: impl Into<String>) -> Self {
        ScrapeError::ParseFailure(reason.into())
    }
}
