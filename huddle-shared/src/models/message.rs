use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ConversationRef, Timestamp};

/// An uploaded attachment referenced from a message.
///
/// Upload mechanics live behind the blob-store seam; by the time an
/// attachment appears here it is just a stable URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    /// Stable URL returned by the blob store.
    pub url: String,
    /// Media type, when the uploader reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// Original file name, for display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A server-confirmed message row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned identifier, globally unique once persisted.
    pub id: Uuid,

    /// The conversation this message belongs to.
    pub conversation: ConversationRef,

    /// ID of the user who sent the message.
    pub author_id: Uuid,

    /// The message content.
    pub body: String,

    /// Server-assigned creation time; the transcript sort key.
    pub created_at: Timestamp,

    /// Parent message for replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,

    /// Attachments, already uploaded.
    #[serde(default)]
    pub attachments: Vec<Attachment>,

    /// Client idempotency tag echoed back by the store, when the row was
    /// appended by a client that supplied one. Promotion of optimistic
    /// entries keys off this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_tag: Option<Uuid>,
}

/// A locally composed message awaiting server confirmation.
///
/// Exists only between submit and promotion or rollback; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingMessage {
    /// Locally generated idempotency tag; doubles as the entry's identity.
    pub client_tag: Uuid,
    pub conversation: ConversationRef,
    pub author_id: Uuid,
    pub body: String,
    /// Client clock at submit time; stands in for `created_at` until the
    /// server copy arrives.
    pub submitted_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Append request handed to the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation: ConversationRef,
    pub author_id: Uuid,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Idempotency tag the store is expected to echo on the resulting row.
    pub client_tag: Uuid,
}

impl NewMessage {
    /// The optimistic transcript entry for this request.
    #[must_use]
    pub fn to_pending(&self, submitted_at: Timestamp) -> PendingMessage {
        PendingMessage {
            client_tag: self.client_tag,
            conversation: self.conversation,
            author_id: self.author_id,
            body: self.body.clone(),
            submitted_at,
            parent_id: self.parent_id,
            attachments: self.attachments.clone(),
        }
    }
}

/// One visible row of a conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TranscriptEntry {
    /// Server-confirmed row.
    Confirmed(Message),
    /// Optimistic row awaiting confirmation.
    Pending(PendingMessage),
}

impl TranscriptEntry {
    #[must_use]
    pub fn author_id(&self) -> Uuid {
        match self {
            Self::Confirmed(m) => m.author_id,
            Self::Pending(p) => p.author_id,
        }
    }

    #[must_use]
    pub fn body(&self) -> &str {
        match self {
            Self::Confirmed(m) => &m.body,
            Self::Pending(p) => &p.body,
        }
    }

    /// The sort key: server `created_at` for confirmed rows, the submit
    /// clock for pending ones.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        match self {
            Self::Confirmed(m) => m.created_at,
            Self::Pending(p) => p.submitted_at,
        }
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Server id, for confirmed rows only.
    #[must_use]
    pub fn server_id(&self) -> Option<Uuid> {
        match self {
            Self::Confirmed(m) => Some(m.id),
            Self::Pending(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConversationRef;
    use chrono::{TimeZone, Utc};

    fn sample_message() -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation: ConversationRef::direct(Uuid::new_v4()),
            author_id: Uuid::new_v4(),
            body: "Hello, world!".to_string(),
            created_at: Timestamp(Utc.with_ymd_and_hms(2025, 3, 8, 14, 30, 0).unwrap()),
            parent_id: None,
            attachments: vec![],
            client_tag: None,
        }
    }

    #[test]
    fn test_message_serialization_round_trip() {
        let message = sample_message();
        let serialized = serde_json::to_string(&message).unwrap();
        let deserialized: Message = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized, message);
    }

    #[test]
    fn test_absent_client_tag_is_omitted() {
        let message = sample_message();
        let serialized = serde_json::to_string(&message).unwrap();

        assert!(!serialized.contains("client_tag"));
    }

    #[test]
    fn new_message_to_pending_copies_tag() {
        let request = NewMessage {
            conversation: ConversationRef::group(Uuid::new_v4()),
            author_id: Uuid::new_v4(),
            body: "hi".into(),
            parent_id: None,
            attachments: vec![],
            client_tag: Uuid::new_v4(),
        };

        let pending = request.to_pending(Timestamp::now());
        assert_eq!(pending.client_tag, request.client_tag);
        assert_eq!(pending.body, request.body);
        assert!(TranscriptEntry::Pending(pending).is_pending());
    }

    #[test]
    fn entry_sort_key_uses_submit_clock_for_pending() {
        let at = Timestamp(Utc.with_ymd_and_hms(2025, 3, 8, 14, 0, 0).unwrap());
        let pending = PendingMessage {
            client_tag: Uuid::new_v4(),
            conversation: ConversationRef::direct(Uuid::new_v4()),
            author_id: Uuid::new_v4(),
            body: "draft".into(),
            submitted_at: at,
            parent_id: None,
            attachments: vec![],
        };

        let entry = TranscriptEntry::Pending(pending);
        assert_eq!(entry.created_at(), at);
        assert_eq!(entry.server_id(), None);
    }
}
