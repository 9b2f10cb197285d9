//! Error types for millbook-core
//!
//! Configuration, transient store, and validation failures are returned to
//! the immediate caller as typed results. Each error carries a stable code,
//! a severity, and suggestions for the presentation layer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Configuration is missing or invalid
    ConfigError,
    /// No tenant could be resolved for the session
    MissingTenant,
    /// Bearer token could not be decoded
    InvalidToken,
    /// Remote store failure
    StoreError,
    /// Input rejected before any write
    ValidationError,
    /// Payment would exceed the remaining balance
    Overpayment,
    /// Requested record does not exist
    NotFound,
    /// Internal error
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::ConfigError => write!(f, "CONFIG_ERROR"),
            ErrorCode::MissingTenant => write!(f, "MISSING_TENANT"),
            ErrorCode::InvalidToken => write!(f, "INVALID_TOKEN"),
            ErrorCode::StoreError => write!(f, "STORE_ERROR"),
            ErrorCode::ValidationError => write!(f, "VALIDATION_ERROR"),
            ErrorCode::Overpayment => write!(f, "OVERPAYMENT"),
            ErrorCode::NotFound => write!(f, "NOT_FOUND"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// Detailed error information for callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Suggestions for resolution
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ErrorDetails {
    /// Create a new error detail
    pub fn new(code: ErrorCode, message: String) -> Self {
        Self {
            code,
            message,
            details: None,
            suggestions: vec![],
        }
    }

    /// Add detail information
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.details = Some(detail);
        self
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestions.push(suggestion);
        self
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, "\nDetails: {}", details)?;
        }
        if !self.suggestions.is_empty() {
            write!(f, "\nSuggestions:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n  - {}", suggestion)?;
            }
        }
        Ok(())
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Informational
    Info,
    /// Warning - operation may be affected
    Warning,
    /// Error - operation failed
    Error,
    /// Critical - session cannot continue
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Info => write!(f, "info"),
            ErrorSeverity::Warning => write!(f, "warning"),
            ErrorSeverity::Error => write!(f, "error"),
            ErrorSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Main error type for millbook-core
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("No tenant resolved for this session")]
    MissingTenant,

    #[error("Invalid tenant token: {reason}")]
    InvalidToken { reason: String },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Payment of {amount} exceeds remaining {remaining} on entry {key}")]
    Overpayment {
        key: String,
        remaining: Decimal,
        amount: Decimal,
    },

    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    /// Shorthand for a field validation failure
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Configuration { .. } => ErrorCode::ConfigError,
            CoreError::MissingTenant => ErrorCode::MissingTenant,
            CoreError::InvalidToken { .. } => ErrorCode::InvalidToken,
            CoreError::Store { .. } => ErrorCode::StoreError,
            CoreError::Validation { .. } => ErrorCode::ValidationError,
            CoreError::Overpayment { .. } => ErrorCode::Overpayment,
            CoreError::NotFound { .. } => ErrorCode::NotFound,
            CoreError::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Get the severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CoreError::Configuration { .. } => ErrorSeverity::Critical,
            CoreError::MissingTenant => ErrorSeverity::Critical,
            CoreError::InvalidToken { .. } => ErrorSeverity::Critical,
            CoreError::Store { .. } => ErrorSeverity::Error,
            CoreError::Validation { .. } => ErrorSeverity::Warning,
            CoreError::Overpayment { .. } => ErrorSeverity::Warning,
            CoreError::NotFound { .. } => ErrorSeverity::Info,
            CoreError::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    /// Whether the failure was caught before anything reached the store
    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Validation { .. } | CoreError::Overpayment { .. })
    }

    /// Convert to detailed error info
    pub fn to_details(&self) -> ErrorDetails {
        let mut details = ErrorDetails::new(self.code(), self.to_string());

        match self {
            CoreError::MissingTenant => {
                details = details.with_suggestion(
                    "Set tenant.key or tenant.token in the configuration file.".to_string(),
                );
            }
            CoreError::InvalidToken { .. } => {
                details = details.with_suggestion(
                    "Sign in again to obtain a fresh token.".to_string(),
                );
            }
            CoreError::Store { .. } => {
                details = details.with_suggestion(
                    "Check the connection and retry; creates are not retried automatically."
                        .to_string(),
                );
            }
            CoreError::Validation { field, message } => {
                details = details.with_detail(serde_json::json!({
                    "field": field,
                    "validation_message": message,
                }));
            }
            CoreError::Overpayment {
                key,
                remaining,
                amount,
            } => {
                details = details.with_detail(serde_json::json!({
                    "entry": key,
                    "remaining": remaining.to_string(),
                    "amount": amount.to_string(),
                }));
                details = details.with_suggestion(format!(
                    "Reduce the payment to at most {} or record it unlinked as an advance.",
                    remaining
                ));
            }
            _ => {}
        }

        details
    }
}

/// Result type with CoreError
pub type CoreResult<T> = Result<T, CoreError>;

impl From<StoreError> for CoreError {
    fn from(error: StoreError) -> Self {
        CoreError::Store {
            message: error.to_string(),
        }
    }
}

impl From<millbook_config::ConfigError> for CoreError {
    fn from(error: millbook_config::ConfigError) -> Self {
        CoreError::Configuration {
            message: error.to_string(),
        }
    }
}

/// Error context for reporting
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Tenant the operation ran under
    pub tenant: Option<String>,
    /// Operation being performed
    pub operation: String,
    /// Additional context data
    pub data: serde_json::Value,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            tenant: None,
            operation: operation.into(),
            data: serde_json::json!({}),
        }
    }

    /// Add tenant
    pub fn with_tenant(mut self, tenant: &str) -> Self {
        self.tenant = Some(tenant.to_string());
        self
    }

    /// Add context data
    pub fn with_data(mut self, key: &str, value: serde_json::Value) -> Self {
        self.data[key] = value;
        self
    }
}

/// Error logger trait
pub trait ErrorLogger: Send + Sync {
    /// Log an error
    fn log_error(&self, error: &CoreError, context: &ErrorContext);
    /// Log a warning
    fn log_warning(&self, message: &str, context: &ErrorContext);
}

/// Default error logger using log crate
#[derive(Default)]
pub struct DefaultErrorLogger;

impl ErrorLogger for DefaultErrorLogger {
    fn log_error(&self, error: &CoreError, context: &ErrorContext) {
        log::error!(
            target: "millbook::error",
            "ERROR [{}] {} - Operation: {} - Tenant: {:?} - Data: {}",
            error.code(),
            error,
            context.operation,
            context.tenant,
            context.data
        );
    }

    fn log_warning(&self, message: &str, context: &ErrorContext) {
        log::warn!(
            target: "millbook::error",
            "WARNING: {} - Operation: {} - Tenant: {:?}",
            message,
            context.operation,
            context.tenant
        );
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::MissingTenant.to_string(), "MISSING_TENANT");
        assert_eq!(ErrorCode::Overpayment.to_string(), "OVERPAYMENT");
        assert_eq!(ErrorCode::StoreError.to_string(), "STORE_ERROR");
    }

    #[test]
    fn test_core_error_severity() {
        assert_eq!(CoreError::MissingTenant.severity(), ErrorSeverity::Critical);
        assert_eq!(
            CoreError::validation("amount", "not a number").severity(),
            ErrorSeverity::Warning
        );
        let err = CoreError::Store {
            message: "offline".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Error);
        assert!(!err.is_validation());
    }

    #[test]
    fn test_overpayment_details() {
        let error = CoreError::Overpayment {
            key: "-Nabc".to_string(),
            remaining: Decimal::from(450),
            amount: Decimal::from_str("500.5").unwrap(),
        };
        let details = error.to_details();

        assert_eq!(details.code, ErrorCode::Overpayment);
        assert!(error.is_validation());
        assert_eq!(details.details.as_ref().unwrap()["remaining"], "450");
        assert!(details.suggestions[0].contains("450"));
    }

    #[test]
    fn test_store_error_converts_verbatim() {
        let error: CoreError = StoreError::Unavailable {
            message: "socket closed".to_string(),
        }
        .into();
        assert_eq!(error.code(), ErrorCode::StoreError);
        assert!(error.to_string().contains("socket closed"));
    }

    #[test]
    fn test_error_context() {
        let context = ErrorContext::new("write")
            .with_tenant("mill-1")
            .with_data("path", serde_json::json!("mill-1/Workers"));

        assert_eq!(context.operation, "write");
        assert_eq!(context.tenant.as_deref(), Some("mill-1"));
        assert_eq!(context.data["path"], "mill-1/Workers");
    }
}
