use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    PermissionDenied,
    Unavailable,
    Validation,
    Internal,
}

/// Failure reported by a remote key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("permission denied at {path}")]
    PermissionDenied { path: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("write rejected at {path}: {reason}")]
    Rejected { path: String, reason: String },
    #[error("malformed store response: {0}")]
    Malformed(String),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            StoreError::Unavailable(_) => ErrorCode::Unavailable,
            StoreError::Rejected { .. } => ErrorCode::Validation,
            StoreError::Malformed(_) => ErrorCode::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("invalid store path: {0:?}")]
    InvalidPath(String),
    #[error("invalid room id: {0:?}")]
    InvalidRoomId(String),
    #[error("device index {index} out of range 1..={count}")]
    DeviceIndexOutOfRange { index: u8, count: u8 },
    #[error("unknown device kind: {0:?}")]
    UnknownDeviceKind(String),
    #[error("unknown role: {0:?}")]
    UnknownRole(String),
    #[error("invalid email address: {0:?}")]
    InvalidEmail(String),
}
