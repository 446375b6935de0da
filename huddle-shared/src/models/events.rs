use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ConversationRef, Message, Timestamp};

/// Payload for a remote `message.deleted` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageDeletedEvent {
    pub conversation: ConversationRef,
    pub message_id: Uuid,
}

/// Payload shared by `reaction.added` and `reaction.removed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionEvent {
    pub conversation: ConversationRef,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
}

/// Payload for a remote read-marker upsert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadMarkerEvent {
    pub conversation: ConversationRef,
    pub user_id: Uuid,
    pub last_read_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_read_message: Option<Uuid>,
}

/// The closed set of typed events the remote change subscriber emits.
///
/// Backend row-change payloads are normalized into this enum before anything
/// downstream sees them; delivery is at-least-once and unordered, so every
/// consumer must be idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    #[serde(rename = "message.inserted")]
    MessageInserted { payload: Message },
    #[serde(rename = "message.deleted")]
    MessageDeleted { payload: MessageDeletedEvent },
    #[serde(rename = "reaction.added")]
    ReactionAdded { payload: ReactionEvent },
    #[serde(rename = "reaction.removed")]
    ReactionRemoved { payload: ReactionEvent },
    #[serde(rename = "read_marker.advanced")]
    ReadMarkerAdvanced { payload: ReadMarkerEvent },
}

impl ChangeEvent {
    /// The conversation this event applies to.
    #[must_use]
    pub fn conversation(&self) -> ConversationRef {
        match self {
            Self::MessageInserted { payload } => payload.conversation,
            Self::MessageDeleted { payload } => payload.conversation,
            Self::ReactionAdded { payload } | Self::ReactionRemoved { payload } => {
                payload.conversation
            }
            Self::ReadMarkerAdvanced { payload } => payload.conversation,
        }
    }
}
