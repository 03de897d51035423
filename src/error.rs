//! Error taxonomy shared by the session, the service layer and the handlers.

use thiserror::Error;

use crate::export::ExportError;
use crate::records::RecordStoreError;
use crate::store::LocalStoreError;

/// A single rejected field of the subject details form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

/// Missing or invalid subject details. Blocks the session from starting.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid subject details: {}", describe(.violations))]
pub struct ValidationError {
    violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn new(violations: Vec<FieldViolation>) -> Self {
        Self { violations }
    }

    /// No subject details were collected at all.
    pub fn missing_subject() -> Self {
        Self::new(vec![FieldViolation::new(
            "subjectDetails",
            "Subject details are required before starting the assessment",
        )])
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }
}

fn describe(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures raised by the assessment session state machine.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("question {question_id} has not been answered")]
    IncompleteAnswer { question_id: u32 },

    #[error("choice {index} does not exist for question {question_id}")]
    UnknownChoice { question_id: u32, index: usize },

    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: &'static str,
    },

    #[error("remote persistence failed: {0}")]
    Persistence(#[from] RecordStoreError),

    #[error("local store failed: {0}")]
    LocalStore(#[from] LocalStoreError),
}

impl SessionError {
    /// Transient failures the caller may retry without losing answers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Persistence(_) | SessionError::LocalStore(_))
    }
}

/// Errors surfaced by the service layer to HTTP and WebSocket handlers.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown session '{0}'")]
    UnknownSession(String),

    #[error("assessment '{0}' has not finished yet")]
    NotFinished(String),

    #[error("an authenticated identity is required")]
    Unauthenticated,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("record store: {0}")]
    Records(#[from] RecordStoreError),

    #[error("local store: {0}")]
    LocalStore(#[from] LocalStoreError),

    #[error("export failed: {0}")]
    Export(#[from] ExportError),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Session(e) => e.is_retryable(),
            ServiceError::Records(_) | ServiceError::LocalStore(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_every_field() {
        let err = ValidationError::new(vec![
            FieldViolation::new("name", "Name is required"),
            FieldViolation::new("age", "Please enter a valid age"),
        ]);
        assert_eq!(
            err.to_string(),
            "invalid subject details: name: Name is required; age: Please enter a valid age"
        );
        let service: ServiceError = SessionError::from(err).into();
        assert!(!service.is_retryable());
        assert!(service.to_string().starts_with("invalid subject details: name"));
    }
}
