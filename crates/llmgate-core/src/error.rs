//! Error taxonomy and the structured boundary result
//!
//! Internal kinds (`NoEndpointAvailable`, `Throttled`, `Timeout`,
//! `VendorError`) are consumed by endpoint/provider rotation inside
//! [`crate::AiManager`]. Only [`GatewayError`] values cross the boundary, and
//! callers receive them wrapped in a [`GatewayResponse`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification shared by every error the gateway produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigInvalid,
    NoProvidersConfigured,
    NoEndpointAvailable,
    Throttled,
    Timeout,
    VendorError,
    AllProvidersExhausted,
    TemplateNotFound,
    InvalidRequest,
    SessionLimitReached,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConfigInvalid => "config_invalid",
            Self::NoProvidersConfigured => "no_providers_configured",
            Self::NoEndpointAvailable => "no_endpoint_available",
            Self::Throttled => "throttled",
            Self::Timeout => "timeout",
            Self::VendorError => "vendor_error",
            Self::AllProvidersExhausted => "all_providers_exhausted",
            Self::TemplateNotFound => "template_not_found",
            Self::InvalidRequest => "invalid_request",
            Self::SessionLimitReached => "session_limit_reached",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Errors that may leave the gateway
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("invalid configuration for provider '{provider}': {reason}")]
    ConfigInvalid { provider: String, reason: String },

    #[error("no providers configured")]
    NoProvidersConfigured,

    #[error("all providers exhausted after {attempts} attempt(s){}", cause_suffix(.last_error))]
    AllProvidersExhausted {
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("request cancelled by caller")]
    Cancelled,
}

fn cause_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_deref()
        .map(|e| format!(": {e}"))
        .unwrap_or_default()
}

impl GatewayError {
    pub fn config(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigInvalid { .. } => ErrorKind::ConfigInvalid,
            Self::NoProvidersConfigured => ErrorKind::NoProvidersConfigured,
            Self::AllProvidersExhausted { .. } => ErrorKind::AllProvidersExhausted,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Failure of a single vendor call, mapped from HTTP/transport errors
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("vendor call timed out")]
    Timeout,

    #[error("vendor returned HTTP {status}: {message}")]
    Vendor { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid vendor response: {0}")]
    InvalidResponse(String),
}

impl AdapterError {
    /// Only 429, 5xx, network and decode failures are worth another attempt.
    /// Other 4xx (bad key, malformed request) would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) | Self::InvalidResponse(_) => true,
            Self::Vendor { status, .. } => *status == 429 || *status >= 500,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::Timeout,
            _ => ErrorKind::VendorError,
        }
    }
}

/// Serializable error carried in a failed [`GatewayResponse`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&GatewayError> for ErrorBody {
    fn from(err: &GatewayError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// `{success, data|error}` envelope returned to the calling layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> GatewayResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(error: ErrorBody) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

impl<T> From<Result<T, GatewayError>> for GatewayResponse<T> {
    fn from(result: Result<T, GatewayError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::fail(ErrorBody::from(&e)),
        }
    }
}
