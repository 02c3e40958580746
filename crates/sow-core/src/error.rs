//! Error kinds surfaced by the project engine.
//!
//! Errors bubble to the invocation boundary unchanged; nothing retries.
//! `GuardBlocked` and `ActionFailed` guarantee no mutation reached disk.

use crate::fsys::FsError;
use crate::host::HostError;
use crate::schema::SchemaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("schema validation failed: {0}")]
    SchemaInvalid(#[from] SchemaError),
    #[error("transition blocked: {description}{}", render_unmet(.unmet))]
    GuardBlocked {
        description: String,
        unmet: Vec<String>,
    },
    #[error("event {event:?} is not a transition out of state {state:?}")]
    EventNotConfigured { state: String, event: String },
    #[error("cannot advance automatically from {state:?}: {reason}")]
    AmbiguousAdvance { state: String, reason: String },
    #[error("transition action failed: {0}")]
    ActionFailed(String),
    #[error(transparent)]
    Host(HostError),
    #[error("branch {0:?} is already checked out in another worktree")]
    BranchAlreadyCheckedOut(String),
    #[error("uncommitted changes in {0}")]
    UncommittedChanges(String),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<HostError> for Error {
    fn from(err: HostError) -> Self {
        // A subprocess killed by a signal means the invocation itself was
        // interrupted.
        match err {
            HostError::Interrupted { .. } => Self::Cancelled,
            other => Self::Host(other),
        }
    }
}

fn render_unmet(unmet: &[String]) -> String {
    if unmet.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for condition in unmet {
        out.push_str("\n  - ");
        out.push_str(condition);
    }
    out
}

impl Error {
    /// Whether the error indicates a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_blocked_renders_unmet_conditions() {
        let err = Error::GuardBlocked {
            description: "phase planning needs an approved task_list output".to_string(),
            unmet: vec![
                "complete_planning -> ImplementationPlanning: blocked".to_string(),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("transition blocked"));
        assert!(text.contains("\n  - complete_planning"));
    }

    #[test]
    fn guard_blocked_without_conditions_is_single_line() {
        let err = Error::GuardBlocked {
            description: "nope".to_string(),
            unmet: Vec::new(),
        };
        assert_eq!(err.to_string(), "transition blocked: nope");
    }

    #[test]
    fn event_not_configured_names_state_and_event() {
        let err = Error::EventNotConfigured {
            state: "ReviewActive".to_string(),
            event: "jump".to_string(),
        };
        assert!(err.to_string().contains("ReviewActive"));
        assert!(err.to_string().contains("jump"));
    }
}
