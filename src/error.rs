//! Application-wide error types.
//!
//! [`ReconcileError`] is what the engine hands back to the transport layer;
//! [`StoreError`] is raised by [`ContactStore`](crate::store::ContactStore)
//! backends; [`AppError`] covers process bootstrap.

use std::time::Duration;

use thiserror::Error;

use crate::contact::ContactId;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("comms error: {0}")]
    Comms(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised by a contact store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend: {0}")]
    Backend(String),

    #[error("contact {0} not found")]
    NotFound(ContactId),

    #[error("store lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Typed result of a reconciliation call.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The submission carried neither an email nor a phone number.
    #[error("validation error: {0}")]
    Validation(String),

    /// Group linkage is cyclic or points at a missing contact.
    #[error("corrupt group at contact {contact_id}: {reason}")]
    CorruptGroup { contact_id: ContactId, reason: String },

    #[error("store timed out after {0:?}")]
    StoreTimeout(Duration),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// `true` for errors the caller caused (maps to a 4xx status).
    pub fn is_client_error(&self) -> bool {
        matches!(self, ReconcileError::Validation(_))
    }

    /// `true` when re-invoking `identify` with the same input may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::StoreTimeout(_))
    }
}
