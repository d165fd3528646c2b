use domain::radio::{QueueError, SignerError};
use domain::song::SongError;
use domain::user::UserError;
use thiserror::Error;

/// Application-level failure taxonomy. The server layer maps these to HTTP
/// statuses; stable variants let it distinguish authorization, not-found and
/// transient collaborator failures.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("auth error: {0}")]
    AuthError(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("queue is empty")]
    EmptyQueue,
    #[error("collaborator failure: {0}")]
    CollaboratorFailure(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<SongError> for AppError {
    fn from(e: SongError) -> Self {
        match e {
            SongError::SongNotFound(msg) => AppError::NotFound(format!("song {}", msg)),
            SongError::DbErr(msg) | SongError::OtherErr(msg) => AppError::CollaboratorFailure(msg),
        }
    }
}

impl From<UserError> for AppError {
    fn from(e: UserError) -> Self {
        match e {
            UserError::UserNotFound(msg) => AppError::NotFound(format!("user {}", msg)),
            UserError::DbErr(msg) | UserError::OtherErr(msg) => AppError::CollaboratorFailure(msg),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::EntryNotFound(msg) => AppError::NotFound(format!("queue entry {}", msg)),
            QueueError::DbErr(msg) | QueueError::OtherErr(msg) => {
                AppError::CollaboratorFailure(msg)
            }
        }
    }
}

impl From<SignerError> for AppError {
    fn from(e: SignerError) -> Self {
        AppError::CollaboratorFailure(e.to_string())
    }
}
