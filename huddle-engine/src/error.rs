use thiserror::Error;

use crate::outbox::Draft;

/// Component-boundary errors surfaced to the rendering layer.
///
/// Transport problems are recoverable by design: the subscriber retries and
/// resyncs, and the view keeps showing last known-good state. Validation
/// failures are rejected before any network call. A failed send carries the
/// original draft back so the compose box can be repopulated for retry.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not a member: {0}")]
    NotAMember(String),

    #[error("send failed: {reason}")]
    SendFailed { reason: String, draft: Draft },
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Whether the caller may simply retry later without user action.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// The draft to restore into the compose box, when one was preserved.
    #[must_use]
    pub const fn preserved_draft(&self) -> Option<&Draft> {
        match self {
            Self::SendFailed { draft, .. } => Some(draft),
            _ => None,
        }
    }
}
