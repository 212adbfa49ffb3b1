//! Error types for the abattoir client

use reqwest::StatusCode;
use thiserror::Error;

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /// Login rejected by the backend. The payload is the user-displayable message.
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh token is expired or invalid")]
    RefreshTokenInvalid,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The session could not be recovered and has been cleared.
    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error("Request failed with status {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
