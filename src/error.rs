//! # Error Handling
//!
//! Crate-wide error type covering both the HTTP surface and the
//! interview pipeline. The pipeline variants carry the provider
//! failure taxonomy:
//!
//! - `TransientNetwork`: retryable network/DNS failures
//! - `QuotaExceeded`: fatal, carries a user-facing remediation message
//! - `EmptyTranscription`: soft; the candidate is asked to repeat
//! - `AudioConversionUnavailable`: fatal for the current streaming
//!   turn only, never for the whole session
//! - `MalformedControlMessage`: the offending frame is rejected and
//!   the connection stays open

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Retryable network-level failure from an external provider.
    TransientNetwork(String),
    /// Provider quota/credit exhaustion. Never retried; the message
    /// includes remediation steps shown to the user.
    QuotaExceeded(String),
    /// Transcription produced no usable text.
    EmptyTranscription(String),
    /// The audio codec tool needed for streaming STT is missing.
    AudioConversionUnavailable(String),
    /// A control frame that could not be parsed or arrived out of order.
    MalformedControlMessage(String),
    /// Requested session or resource does not exist.
    NotFound(String),
    /// Configuration loading or validation failure.
    ConfigError(String),
    /// Anything not covered above. Logged and surfaced generically.
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::TransientNetwork(msg) => write!(f, "Network error: {}", msg),
            AppError::QuotaExceeded(msg) => write!(f, "Quota exceeded: {}", msg),
            AppError::EmptyTranscription(msg) => write!(f, "Empty transcription: {}", msg),
            AppError::AudioConversionUnavailable(msg) => {
                write!(f, "Audio conversion unavailable: {}", msg)
            }
            AppError::MalformedControlMessage(msg) => {
                write!(f, "Malformed control message: {}", msg)
            }
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    fn error_type(&self) -> &'static str {
        match self {
            AppError::TransientNetwork(_) => "transient_network",
            AppError::QuotaExceeded(_) => "quota_exceeded",
            AppError::EmptyTranscription(_) => "empty_transcription",
            AppError::AudioConversionUnavailable(_) => "audio_conversion_unavailable",
            AppError::MalformedControlMessage(_) => "malformed_control_message",
            AppError::NotFound(_) => "not_found",
            AppError::ConfigError(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Whether the retry policy may re-attempt the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransientNetwork(_))
    }

    /// Message shown to the connected client in an `error` frame.
    pub fn user_message(&self) -> String {
        match self {
            AppError::QuotaExceeded(msg) => msg.clone(),
            AppError::EmptyTranscription(_) => {
                "No speech detected or transcript timeout. Please try speaking again.".to_string()
            }
            AppError::AudioConversionUnavailable(msg) => msg.clone(),
            AppError::MalformedControlMessage(msg) => format!("Invalid message: {}", msg),
            other => format!("{}", other),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let body = json!({
            "error": {
                "type": self.error_type(),
                "message": format!("{}", self),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        });

        match self {
            AppError::NotFound(_) => HttpResponse::NotFound().json(body),
            AppError::MalformedControlMessage(_) => HttpResponse::BadRequest().json(body),
            AppError::QuotaExceeded(_) => HttpResponse::PaymentRequired().json(body),
            AppError::TransientNetwork(_) => HttpResponse::BadGateway().json(body),
            _ => HttpResponse::InternalServerError().json(body),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::MalformedControlMessage(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        // Connect/DNS/timeout failures are the retryable class; anything
        // else (TLS, body decode, redirect policy) is not.
        if err.is_connect() || err.is_timeout() || err.is_request() {
            AppError::TransientNetwork(err.to_string())
        } else {
            AppError::Internal(err.to_string())
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::QuotaExceeded("monthly credits spent".to_string());
        assert_eq!(format!("{}", err), "Quota exceeded: monthly credits spent");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::TransientNetwork("dns".into()).is_retryable());
        assert!(!AppError::QuotaExceeded("quota".into()).is_retryable());
        assert!(!AppError::Internal("boom".into()).is_retryable());
    }

    #[test]
    fn test_empty_transcription_user_message() {
        let err = AppError::EmptyTranscription("poll timeout".into());
        assert!(err.user_message().contains("No speech detected"));
    }

    #[test]
    fn test_error_type_tags() {
        assert_eq!(
            AppError::AudioConversionUnavailable("ffmpeg".into()).error_type(),
            "audio_conversion_unavailable"
        );
        assert_eq!(AppError::NotFound("s".into()).error_type(), "not_found");
    }
}
