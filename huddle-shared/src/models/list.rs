use serde::{Deserialize, Serialize};

use super::Timestamp;

/// Cosmetic ceiling for the unread badge; larger counts render as `99+`.
pub const UNREAD_DISPLAY_CAP: i64 = 99;

/// Derived summary for one conversation-list row.
///
/// Never authoritative: recomputed incrementally from the latest message,
/// the viewer's read marker, and the typing signal for that row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListMeta {
    /// Preview text from the latest message.
    pub preview: String,
    /// Timestamp of the last activity, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_at: Option<Timestamp>,
    /// Messages newer than the viewer's marker, authored by someone else.
    pub unread_count: i64,
    /// Someone in this row's conversation is typing right now.
    pub is_typing: bool,
    /// Next scheduled event attached to the conversation, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upcoming_event_at: Option<Timestamp>,
}

impl ListMeta {
    /// Badge text, capped at [`UNREAD_DISPLAY_CAP`].
    #[must_use]
    pub fn display_unread(&self) -> Option<String> {
        match self.unread_count {
            n if n <= 0 => None,
            n if n > UNREAD_DISPLAY_CAP => Some(format!("{UNREAD_DISPLAY_CAP}+")),
            n => Some(n.to_string()),
        }
    }
}
