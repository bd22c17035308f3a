use std::fmt;

use shared::{
    domain::{RoomId, StorePath},
    error::{DomainError, ErrorCode, StoreError},
    protocol::Notice,
};
use thiserror::Error;

use crate::codec::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    AutomaticMode,
    RoomUnoccupied,
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockReason::AutomaticMode => f.write_str("room is in automatic mode"),
            LockReason::RoomUnoccupied => f.write_str("no one is present in the room"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("subscription to {path} failed: {source}")]
    Subscription { path: StorePath, source: StoreError },
    #[error("read of {path} failed: {source}")]
    Read { path: StorePath, source: StoreError },
    #[error("write to {path} failed: {source}")]
    Write { path: StorePath, source: StoreError },
    #[error("update of {count} paths failed: {source}")]
    BatchWrite { count: usize, source: StoreError },
    #[error("unexpected value at {path}: {source}")]
    Decode { path: StorePath, source: DecodeError },
    #[error("controls are locked: {0}")]
    ControlsLocked(LockReason),
    #[error("admin role required")]
    Forbidden,
    #[error("no room is bound to {identity}")]
    NoHomeRoom { identity: String },
    #[error("no profile found for {identity}")]
    UnknownUser { identity: String },
    #[error("room {room_id} does not exist")]
    UnknownRoom { room_id: RoomId },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::Subscription { source, .. }
            | SyncError::Read { source, .. }
            | SyncError::Write { source, .. }
            | SyncError::BatchWrite { source, .. } => source.code(),
            SyncError::Decode { .. } => ErrorCode::Internal,
            SyncError::ControlsLocked(_) | SyncError::UnknownRoom { .. } | SyncError::Domain(_) => {
                ErrorCode::Validation
            }
            SyncError::Forbidden | SyncError::NoHomeRoom { .. } | SyncError::UnknownUser { .. } => {
                ErrorCode::PermissionDenied
            }
        }
    }

    pub fn to_notice(&self) -> Notice {
        Notice::error(self.code(), self.to_string())
    }
}
