use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// UTC timestamp newtype used across all Huddle models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Absolute distance to another timestamp.
    #[must_use]
    pub fn abs_delta(&self, other: &Self) -> chrono::Duration {
        (self.0 - other.0).abs()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S"))
    }
}
