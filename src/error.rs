// Error handling module
// Defines the request error taxonomy and its user-facing messages

use thiserror::Error;

use crate::models::Envelope;

/// Errors that can end an authenticated request
#[derive(Error, Debug)]
pub enum RequestError {
    /// No credential source yielded a token and the refresh failed
    #[error("No credential available")]
    NoCredentialAvailable,

    /// Server answered 401 on every attempt
    #[error("Authorization rejected: {message}")]
    AuthorizationRejected { message: String },

    /// Network unreachable, timeout, or the body could not be read
    #[error("Transport failure ({kind}): {message}")]
    TransportFailure { kind: &'static str, message: String },

    /// Non-401 error status from the server
    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// 2xx response whose body is not a JSON envelope
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Caller abandoned the request
    #[error("Request cancelled")]
    Cancelled,

    /// Internal error (storage, request construction)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RequestError {
    /// Categorize a reqwest transport error
    pub fn from_transport(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connection_failed"
        } else if err.is_request() {
            "request_error"
        } else if err.is_body() {
            "body_error"
        } else if err.is_decode() {
            "decode_error"
        } else {
            "unknown"
        };

        RequestError::TransportFailure {
            kind,
            message: err.to_string(),
        }
    }

    /// Build the error for a non-2xx response, taking the envelope message when present
    pub fn from_status(status: u16, body: &str) -> Self {
        let server_message = Envelope::parse(body).ok().and_then(|e| e.message);

        if status == 401 {
            return RequestError::AuthorizationRejected {
                message: server_message.unwrap_or_else(|| "Unauthorized".to_string()),
            };
        }

        RequestError::ServerError {
            status,
            message: server_message
                .unwrap_or_else(|| format!("Request failed with status code {}", status)),
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::AuthorizationRejected { .. } => Some(401),
            RequestError::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message suitable for showing to the person using the client
    pub fn user_message(&self) -> String {
        match self {
            RequestError::NoCredentialAvailable | RequestError::AuthorizationRejected { .. } => {
                "Your session has expired. Please log in again.".to_string()
            }
            RequestError::TransportFailure { .. } => {
                "Could not reach the server. Please try again later.".to_string()
            }
            RequestError::ServerError { message, .. } => message.clone(),
            RequestError::MalformedResponse(_) | RequestError::Internal(_) => {
                "Something went wrong. Please try again.".to_string()
            }
            RequestError::Cancelled => "Request cancelled.".to_string(),
        }
    }
}

/// Result type alias for request operations
pub type Result<T> = std::result::Result<T, RequestError>;
