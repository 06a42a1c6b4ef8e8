//! Typed error handling for the dispatch pipeline.
//!
//! - Validation errors are rejected before anything is persisted
//! - Mailer errors are recorded on the unit and handed to the retry policy
//! - Store errors during scheduling only affect the recipient being stored

use cadence_store::{StoreError, UnitId};
use thiserror::Error;

/// A request that cannot be accepted as given.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("recipients must be a non-empty array")]
    NoRecipients,

    #[error("recipient at position {0} is blank")]
    BlankRecipient(usize),

    #[error("sender is required")]
    MissingSender,

    #[error("Body is required")]
    EmptyBody,
}

/// Failure reported by the delivery capability.
///
/// The message of this error becomes the unit's failure reason, so every
/// variant renders a non-empty description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailerError {
    /// The transport could not reach the relay.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The relay refused the message.
    #[error("Message rejected: {0}")]
    Rejected(String),

    /// Any other transport failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Failure to accept a campaign.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The campaign record itself could not be created. Failures storing
    /// individual units are not reported here.
    #[error("Failed to store campaign: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced to callers of [`DispatchService`](crate::DispatchService).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Dispatch unit not found: {0}")]
    NotFound(UnitId),

    #[error("Dispatch unit {0} has already been processed")]
    NotPending(UnitId),

    #[error("Store error: {0}")]
    Store(StoreError),

    /// The background scheduling task panicked or was cancelled.
    #[error("Scheduling task did not complete: {0}")]
    Interrupted(String),
}

impl From<StoreError> for ServiceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::NotPending(id) => Self::NotPending(id),
            other => Self::Store(other),
        }
    }
}

impl From<ScheduleError> for ServiceError {
    fn from(error: ScheduleError) -> Self {
        match error {
            ScheduleError::Validation(e) => Self::Validation(e),
            ScheduleError::Store(e) => Self::Store(e),
        }
    }
}

/// Errors raised by the worker pool itself.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Dispatch processor not initialized: {0}")]
    NotInitialized(String),
}
