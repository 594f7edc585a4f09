//! Retry / error policy.
//!
//! Classifies upload failures and decides which actions the UI offers.
//! The core never retries on its own; `Retryable` only means the user is
//! offered a Retry action.

use filmup_protocol::{ApiEnvelope, TaskState};
use filmup_transfer::{Completion, TransportError};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// What a failure means for the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient; retry is offered.
    Retryable,
    /// User-initiated; the task is discarded.
    Cancelled,
    /// Retrying cannot help; only cancel is offered.
    Fatal,
}

/// Actions the UI should present for a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Affordances {
    pub retry: bool,
    pub cancel: bool,
}

pub fn classify(error: &UploadError) -> ErrorClass {
    match error {
        UploadError::Network(_) | UploadError::SessionExpired(_) | UploadError::MissingResource => {
            ErrorClass::Retryable
        }
        UploadError::Rejected { status, .. } => classify_status(*status),
        UploadError::Cancelled => ErrorClass::Cancelled,
        UploadError::Configuration(_)
        | UploadError::UnknownTask(_)
        | UploadError::NotRetryable(_)
        | UploadError::Io(_)
        | UploadError::Json(_) => ErrorClass::Fatal,
    }
}

pub fn classify_transport(error: &TransportError) -> ErrorClass {
    classify(&UploadError::from_transport(error))
}

/// 408, 429 and 5xx are transient; any other 4xx is a permanent rejection.
/// Anything else (including a 2xx with `success: false`) is retryable.
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        408 | 429 => ErrorClass::Retryable,
        400..=499 => ErrorClass::Fatal,
        _ => ErrorClass::Retryable,
    }
}

/// Extracts the server-confirmed resource from a finished transfer.
///
/// A missing body, a body that is not an envelope, or an envelope without
/// `data` is `MissingResource`; `success: false` is `Rejected`.
pub fn check_completion(completion: &Completion) -> Result<serde_json::Value, UploadError> {
    let body = completion
        .body
        .as_ref()
        .ok_or(UploadError::MissingResource)?;
    let envelope = ApiEnvelope::from_value(body).ok_or(UploadError::MissingResource)?;

    if !envelope.success {
        return Err(UploadError::Rejected {
            status: completion.status,
            message: envelope.message,
        });
    }
    envelope.into_resource().ok_or(UploadError::MissingResource)
}

/// Retry is offered for paused tasks and for failures classified
/// `Retryable`; cancel for every task still in the queue.
pub fn affordances(state: TaskState, class: Option<ErrorClass>) -> Affordances {
    let retry = match state {
        TaskState::Paused => true,
        TaskState::Failed => class == Some(ErrorClass::Retryable),
        _ => false,
    };
    Affordances {
        retry,
        cancel: !state.is_terminal(),
    }
}
