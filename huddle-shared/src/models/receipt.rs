use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ConversationRef, Timestamp};

/// How far one user has read one conversation.
///
/// Group threads track a coarse timestamp; direct threads additionally pin
/// the last read message id. Markers only ever move forward for the owning
/// user: [`ReadMarker::advance`] clamps regressions instead of applying them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadMarker {
    pub user_id: Uuid,
    pub conversation: ConversationRef,
    pub last_read_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_read_message: Option<Uuid>,
}

impl ReadMarker {
    #[must_use]
    pub const fn new(user_id: Uuid, conversation: ConversationRef, last_read_at: Timestamp) -> Self {
        Self {
            user_id,
            conversation,
            last_read_at,
            last_read_message: None,
        }
    }

    /// Moves the marker forward. Returns `true` when the marker changed;
    /// an older timestamp leaves the marker untouched.
    pub fn advance(&mut self, at: Timestamp, message: Option<Uuid>) -> bool {
        if at <= self.last_read_at {
            return false;
        }
        self.last_read_at = at;
        if message.is_some() {
            self.last_read_message = message;
        }
        true
    }
}
