//! Error types for the boundary components.
//!
//! Outbound model calls return a structured [`GatewayError`] the pipeline can
//! branch on. Search and upload failures never appear here: those providers
//! degrade in place (empty results, omitted links) and only log.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Categories of gateway errors for consistent error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    /// HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Connection timeout or request timeout
    Timeout,
    /// Failed to parse the response body
    Parse,
    /// API-level error returned by the model service
    ApiError,
    /// The call succeeded but produced no usable text
    EmptyResponse,
}

impl fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayErrorKind::HttpStatus => write!(f, "http_status"),
            GatewayErrorKind::Timeout => write!(f, "timeout"),
            GatewayErrorKind::Parse => write!(f, "parse"),
            GatewayErrorKind::ApiError => write!(f, "api_error"),
            GatewayErrorKind::EmptyResponse => write!(f, "empty_response"),
        }
    }
}

/// Structured error from the model gateway with kind and details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayError {
    /// Error category
    pub kind: GatewayErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., raw error body)
    pub details: Option<String>,
}

impl GatewayError {
    /// Creates a new gateway error.
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Creates an HTTP status error, extracting a cleaner message from a
    /// JSON error body when one is present.
    pub fn http_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {status}");
        let details = if body.is_empty() {
            None
        } else {
            if let Ok(json) = serde_json::from_str::<Value>(body)
                && let Some(error_obj) = json.get("error")
                && let Some(msg) = error_obj.get("message").and_then(|v| v.as_str())
            {
                return Self {
                    kind: GatewayErrorKind::HttpStatus,
                    message: format!("HTTP {status}: {msg}"),
                    details: Some(body.to_string()),
                };
            }
            Some(body.to_string())
        };
        Self {
            kind: GatewayErrorKind::HttpStatus,
            message,
            details,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Timeout, message)
    }

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Parse, message)
    }

    /// Creates an empty-response error.
    pub fn empty_response() -> Self {
        Self::new(
            GatewayErrorKind::EmptyResponse,
            "Model returned no usable text",
        )
    }

    /// Classifies a reqwest error into a gateway error.
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::timeout(format!("Connection failed: {e}"))
        } else if e.is_request() {
            Self::new(GatewayErrorKind::HttpStatus, format!("Request error: {e}"))
        } else {
            Self::new(GatewayErrorKind::HttpStatus, format!("Network error: {e}"))
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GatewayError {}

/// Malformed or empty inbound media. Reported to the caller as a client
/// error; the request aborts before touching the conversation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    BadImageData(String),
    BadAudioData(String),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::BadImageData(detail) => write!(f, "Bad image data: {detail}"),
            MediaError::BadAudioData(detail) => write!(f, "Bad audio data: {detail}"),
        }
    }
}

impl std::error::Error for MediaError {}

/// Failures of the identify phase.
#[derive(Debug)]
pub enum IdentifyError {
    /// The inbound image payload could not be normalized.
    Media(MediaError),
    /// The identification call itself failed. Nothing is appended to the
    /// log; the caller surfaces this as a server error.
    Model(GatewayError),
}

impl fmt::Display for IdentifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifyError::Media(e) => write!(f, "{e}"),
            IdentifyError::Model(e) => write!(f, "Identification failed: {e}"),
        }
    }
}

impl std::error::Error for IdentifyError {}

impl From<MediaError> for IdentifyError {
    fn from(e: MediaError) -> Self {
        IdentifyError::Media(e)
    }
}

/// Failures of the confirm-and-act phase.
#[derive(Debug)]
pub enum ActError {
    /// The inbound image payload could not be normalized. The request
    /// aborts before touching the conversation log.
    Media(MediaError),
    /// The repair-plan branch has no textual fallback; a plan without
    /// model output is not useful, so the model failure is surfaced.
    RepairPlanUnavailable(GatewayError),
}

impl fmt::Display for ActError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActError::Media(e) => write!(f, "{e}"),
            ActError::RepairPlanUnavailable(e) => {
                write!(f, "Repair plan unavailable: {e}")
            }
        }
    }
}

impl std::error::Error for ActError {}

impl From<MediaError> for ActError {
    fn from(e: MediaError) -> Self {
        ActError::Media(e)
    }
}
