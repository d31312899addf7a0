use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid trigger `{name}`: {reason}")]
    InvalidTrigger { name: String, reason: String },
    #[error("invalid restriction: {0}")]
    InvalidRestriction(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

/// Failure reported by an external collaborator (generation, moderation
/// effector, bot identity provider). The pipeline maps every variant to a
/// fallback action; none of them abort message processing.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("collaborator timed out after {after_secs}s")]
    Timeout { after_secs: u64 },
    #[error("collaborator call cancelled")]
    Cancelled,
    #[error("collaborator failed: {0}")]
    Failed(String),
}

impl CollaboratorError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }

    /// Cancellation means the caller went away, so there is nobody to send a
    /// fallback reply to.
    pub fn wants_fallback(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl ApplicationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Integration(_))
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, CollaboratorError, DomainError};

    #[test]
    fn domain_error_converts_into_application_error() {
        let error = ApplicationError::from(DomainError::InvariantViolation(
            "two active mutes".to_owned(),
        ));

        assert!(matches!(error, ApplicationError::Domain(DomainError::InvariantViolation(_))));
        assert!(!error.is_transient());
    }

    #[test]
    fn persistence_failures_are_transient() {
        let error = ApplicationError::Persistence("database lock timeout".to_owned());
        assert!(error.is_transient());
        assert_eq!(error.to_string(), "persistence failure: database lock timeout");
    }

    #[test]
    fn cancelled_collaborator_call_skips_fallback() {
        assert!(!CollaboratorError::Cancelled.wants_fallback());
        assert!(CollaboratorError::Timeout { after_secs: 30 }.wants_fallback());
        assert!(CollaboratorError::Failed("upstream 500".to_owned()).wants_fallback());
    }

    #[test]
    fn collaborator_kinds_are_stable_log_labels() {
        assert_eq!(CollaboratorError::Unavailable("no key".to_owned()).kind(), "unavailable");
        assert_eq!(CollaboratorError::Timeout { after_secs: 1 }.kind(), "timeout");
        assert_eq!(CollaboratorError::Cancelled.kind(), "cancelled");
    }
}
