use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown upload service: {service_id}")]
    UnknownService { service_id: String },

    #[error("Unsupported file: {path} ({reason})")]
    UnsupportedFile { path: String, reason: String },

    #[error("Transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    #[error("Transport is not available")]
    TransportUnavailable,

    #[error("Authentication required for {service_id}")]
    AuthenticationRequired { service_id: String },

    #[error("Authorization failed: {reason}")]
    AuthFailed { reason: String },

    #[error("Unexpected response from {service_id}: {reason}")]
    AdapterParse { service_id: String, reason: String },

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Upload coordinator has been shut down")]
    CoordinatorStopped,

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn unknown_service(service_id: &str) -> Self {
        Self::UnknownService {
            service_id: service_id.to_string(),
        }
    }

    pub fn unsupported_file(path: &str, reason: impl ToString) -> Self {
        Self::UnsupportedFile {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn transport(message: impl ToString) -> Self {
        Self::Transport {
            message: message.to_string(),
            status: None,
        }
    }

    pub fn authentication_required(service_id: &str) -> Self {
        Self::AuthenticationRequired {
            service_id: service_id.to_string(),
        }
    }

    pub fn auth_failed(reason: impl ToString) -> Self {
        Self::AuthFailed {
            reason: reason.to_string(),
        }
    }

    pub fn adapter_parse(service_id: &str, reason: impl ToString) -> Self {
        Self::AdapterParse {
            service_id: service_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, AppError::AuthenticationRequired { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::UnknownService { .. } => ErrorKind::UnknownService,
            AppError::UnsupportedFile { .. } => ErrorKind::UnsupportedFile,
            AppError::TransportUnavailable | AppError::CoordinatorStopped => {
                ErrorKind::TransportUnavailable
            }
            AppError::AuthenticationRequired { .. } => ErrorKind::AuthenticationRequired,
            AppError::AuthFailed { .. } => ErrorKind::AuthenticationRequired,
            AppError::AdapterParse { .. } | AppError::Json(_) => ErrorKind::AdapterParse,
            AppError::Cancelled => ErrorKind::Cancelled,
            AppError::Validation { .. } | AppError::Config(_) => ErrorKind::Validation,
            AppError::Io(_) | AppError::Network(_) | AppError::Transport { .. } => {
                ErrorKind::Transport
            }
        }
    }
}

/// Coarse classification of a failure, carried in notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownService,
    UnsupportedFile,
    Transport,
    TransportUnavailable,
    AuthenticationRequired,
    AdapterParse,
    Cancelled,
    Validation,
}

/// Cloneable description of a failure that can cross the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub http_status: Option<u16>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl ToString) -> Self {
        Self {
            kind,
            message: message.to_string(),
            http_status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn is_auth_failure(&self) -> bool {
        self.kind == ErrorKind::AuthenticationRequired
            || self.http_status.map(is_auth_status).unwrap_or(false)
    }
}

impl From<&AppError> for ErrorInfo {
    fn from(error: &AppError) -> Self {
        let http_status = match error {
            AppError::Transport { status, .. } => *status,
            AppError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        };
        Self {
            kind: error.kind(),
            message: error.to_string(),
            http_status,
        }
    }
}

impl From<ErrorInfo> for AppError {
    fn from(info: ErrorInfo) -> Self {
        match info.kind {
            ErrorKind::TransportUnavailable => AppError::TransportUnavailable,
            ErrorKind::Cancelled => AppError::Cancelled,
            _ => AppError::Transport {
                message: info.message,
                status: info.http_status,
            },
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.http_status {
            Some(status) => write!(f, "{} (HTTP {})", self.message, status),
            None => f.write_str(&self.message),
        }
    }
}

/// 401/403 responses mean the stored session is no longer accepted.
pub fn is_auth_status(status: u16) -> bool {
    matches!(status, 401 | 403)
}

/// Convert to string for presentation layers
impl From<AppError> for String {
    fn from(error: AppError) -> Self {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_status_classification() {
        assert!(is_auth_status(401));
        assert!(is_auth_status(403));
        assert!(!is_auth_status(404));
        assert!(!is_auth_status(500));
    }

    #[test]
    fn test_error_info_from_transport_error_keeps_status() {
        let error = AppError::Transport {
            message: "forbidden".to_string(),
            status: Some(403),
        };
        let info = ErrorInfo::from(&error);

        assert_eq!(info.kind, ErrorKind::Transport);
        assert_eq!(info.http_status, Some(403));
        assert!(info.is_auth_failure());
    }

    #[test]
    fn test_auth_failure_classifier() {
        assert!(AppError::authentication_required("imgur").is_auth_failure());
        assert!(!AppError::transport("timed out").is_auth_failure());
        assert!(!AppError::auth_failed("bad pin").is_auth_failure());
    }
}
