use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;
use thiserror::Error;

use crate::poller::PollState;

// Toute erreur de la base derrière le cache, sauf l'absence de ligne qui n'en est pas une.
#[derive(Error, Debug)]
#[error("cache store query failed: {0}")]
pub struct StoreError(#[from] pub sqlx::Error);

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("workflow endpoint unreachable: {0}")]
    Network(#[from] reqwest::Error),

    #[error("workflow endpoint answered with status {0}")]
    Rejected(u16),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("both drugs must be selected before calculating")]
    IncompleteSelection,

    #[error("cannot apply '{event}' while the session is {state}")]
    InvalidTransition {
        state: PollState,
        event: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error(
        "poll interval {interval:?} must be non-zero, shorter than the timeout {timeout:?} \
         and leave room for several attempts; the timeout may not exceed one day"
    )]
    PollPolicy { interval: Duration, timeout: Duration },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Session not found")]
    SessionNotFound,

    #[error("Drug not found")]
    DrugNotFound,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::SessionNotFound | AppError::DrugNotFound => StatusCode::NOT_FOUND,
            AppError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            AppError::Session(SessionError::IncompleteSelection) => StatusCode::BAD_REQUEST,
            AppError::Session(SessionError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            AppError::Store(_) | AppError::Database(_) => {
                tracing::error!("Request failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
