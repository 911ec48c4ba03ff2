use std::path::PathBuf;

use thiserror::Error;

use crate::core::{
    classify::{self, TABLE_READ_MARKER},
    warehouse::WarehouseError,
};

/// Stable error categories reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Validation,
    NotFound,
    PermissionDenied,
    AlreadyExists,
    TransientBackend,
    Unknown,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::TransientBackend => "TRANSIENT_BACKEND_ERROR",
            ErrorKind::Unknown => "UNKNOWN_ERROR",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    pub fn is_retryable(self) -> bool {
        self == ErrorKind::TransientBackend
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported filter type on column `{column}`: operator {operator} expects {expected}, got {actual}")]
    UnsupportedFilterType {
        column: String,
        operator: String,
        expected: String,
        actual: String,
    },

    /// A failed warehouse call; `message` is already decoded for display.
    #[error("{message}")]
    Warehouse {
        kind: ErrorKind,
        status_code: u16,
        message: String,
    },

    #[error("failed to open warehouse: {path}: {source}")]
    WarehouseOpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        AppError::InvalidRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    /// Categorizes a failed warehouse call and decodes its message for display.
    pub fn from_warehouse(err: &WarehouseError) -> Self {
        let raw = err.message.as_str();
        let mut message = classify::decode_message(raw);
        if message.contains(TABLE_READ_MARKER) {
            message = classify::extract_direct_message(&message);
        }

        let status = err.status_code;
        // Anything the retry predicate accepts is transient, whatever its shape.
        let kind = if classify::is_retryable(status, raw) {
            ErrorKind::TransientBackend
        } else if status == 404 || message.starts_with("Not found:") {
            ErrorKind::NotFound
        } else if status == 409 || message.starts_with("Already Exists:") {
            ErrorKind::AlreadyExists
        } else if status == 403 || message.starts_with("Access Denied:") {
            ErrorKind::PermissionDenied
        } else {
            ErrorKind::Unknown
        };

        AppError::Warehouse {
            kind,
            status_code: status,
            message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidRequest(_) | AppError::Json(_) => ErrorKind::InvalidRequest,
            AppError::Validation(_) | AppError::UnsupportedFilterType { .. } => {
                ErrorKind::Validation
            }
            AppError::Warehouse { kind, .. } => *kind,
            AppError::WarehouseOpenFailed { .. } | AppError::Io(_) | AppError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Structured payload for the error response, when there is one.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::UnsupportedFilterType {
                column,
                operator,
                expected,
                actual,
            } => Some(serde_json::json!({
                "column": column,
                "operator": operator,
                "expected": expected,
                "actual": actual,
            })),
            AppError::Warehouse { status_code, .. } => Some(serde_json::json!({
                "status_code": status_code,
                "retryable": self.kind().is_retryable(),
            })),
            _ => None,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
