//! Conversation-list metadata.
//!
//! Every listed conversation keeps a derived [`ListMeta`] row — preview,
//! last activity, unread badge, typing flag — maintained incrementally: one
//! event touches one row, never the whole list. Rows exist independently of
//! which conversation is currently open.

use std::collections::HashMap;

use uuid::Uuid;

use shared::models::{ChangeEvent, ConversationRef, ListMeta, Message, Timestamp};

const PREVIEW_MAX_CHARS: usize = 80;

/// Derived state for the conversation list.
#[derive(Debug, Default)]
pub struct InboxIndex {
    rows: HashMap<ConversationRef, ListMeta>,
}

impl InboxIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one row from a batched head query plus a precomputed unread
    /// count.
    pub fn seed_row(
        &mut self,
        conversation: ConversationRef,
        head: Option<&Message>,
        unread_count: i64,
    ) {
        let mut meta = ListMeta {
            unread_count,
            ..ListMeta::default()
        };
        if let Some(message) = head {
            meta.preview = preview_of(message);
            meta.last_at = Some(message.created_at);
        }
        self.rows.insert(conversation, meta);
    }

    /// Applies one change event to the affected row only.
    pub fn apply(&mut self, event: &ChangeEvent, viewer: Uuid) {
        match event {
            ChangeEvent::MessageInserted { payload } => {
                let row = self.rows.entry(payload.conversation).or_default();
                if row.last_at.is_none_or(|at| payload.created_at >= at) {
                    row.preview = preview_of(payload);
                    row.last_at = Some(payload.created_at);
                }
                if payload.author_id != viewer {
                    row.unread_count += 1;
                }
            }
            ChangeEvent::ReadMarkerAdvanced { payload } if payload.user_id == viewer => {
                if let Some(row) = self.rows.get_mut(&payload.conversation) {
                    row.unread_count = 0;
                }
            }
            // Deletes keep the stale preview until the next insert or
            // reseed; reactions and foreign markers do not affect rows.
            ChangeEvent::MessageDeleted { .. }
            | ChangeEvent::ReactionAdded { .. }
            | ChangeEvent::ReactionRemoved { .. }
            | ChangeEvent::ReadMarkerAdvanced { .. } => {}
        }
    }

    /// Mirrors the typing signal for one row.
    pub fn set_typing(&mut self, conversation: ConversationRef, is_typing: bool) {
        self.rows.entry(conversation).or_default().is_typing = is_typing;
    }

    /// Replaces the badge with a count derived elsewhere, e.g. from the open
    /// transcript after a partial read.
    pub fn set_unread(&mut self, conversation: ConversationRef, count: i64) {
        self.rows.entry(conversation).or_default().unread_count = count;
    }

    /// Zeroes the badge when the viewer reads the conversation.
    pub fn mark_read(&mut self, conversation: ConversationRef) {
        if let Some(row) = self.rows.get_mut(&conversation) {
            row.unread_count = 0;
        }
    }

    /// Attaches the next scheduled event shown on the row, when any.
    pub fn set_upcoming_event(&mut self, conversation: ConversationRef, at: Option<Timestamp>) {
        self.rows.entry(conversation).or_default().upcoming_event_at = at;
    }

    #[must_use]
    pub fn meta(&self, conversation: ConversationRef) -> Option<&ListMeta> {
        self.rows.get(&conversation)
    }

    /// All rows, most recent activity first.
    #[must_use]
    pub fn rows(&self) -> Vec<(ConversationRef, &ListMeta)> {
        let mut rows: Vec<_> = self.rows.iter().map(|(c, m)| (*c, m)).collect();
        rows.sort_by(|a, b| b.1.last_at.cmp(&a.1.last_at));
        rows
    }
}

fn preview_of(message: &Message) -> String {
    if message.body.is_empty() {
        return message
            .attachments
            .first()
            .and_then(|a| a.name.clone())
            .unwrap_or_else(|| "Attachment".to_string());
    }

    if message.body.chars().count() <= PREVIEW_MAX_CHARS {
        message.body.clone()
    } else {
        let truncated: String = message.body.chars().take(PREVIEW_MAX_CHARS).collect();
        format!("{truncated}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared::models::ReadMarkerEvent;

    fn conversation() -> ConversationRef {
        ConversationRef::group(Uuid::new_v4())
    }

    fn at(secs: u32) -> Timestamp {
        Timestamp(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, secs).unwrap())
    }

    fn message(conversation: ConversationRef, author: Uuid, body: &str, secs: u32) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation,
            author_id: author,
            body: body.into(),
            created_at: at(secs),
            parent_id: None,
            attachments: vec![],
            client_tag: None,
        }
    }

    #[test]
    fn insert_updates_only_affected_row() {
        let mut inbox = InboxIndex::new();
        let viewer = Uuid::new_v4();
        let (a, b) = (conversation(), conversation());
        inbox.seed_row(a, None, 0);
        inbox.seed_row(b, None, 0);

        inbox.apply(
            &ChangeEvent::MessageInserted {
                payload: message(a, Uuid::new_v4(), "new in a", 10),
            },
            viewer,
        );

        assert_eq!(inbox.meta(a).unwrap().preview, "new in a");
        assert_eq!(inbox.meta(a).unwrap().unread_count, 1);
        assert_eq!(inbox.meta(b).unwrap().unread_count, 0);
        assert!(inbox.meta(b).unwrap().preview.is_empty());
    }

    #[test]
    fn own_messages_do_not_bump_unread() {
        let mut inbox = InboxIndex::new();
        let viewer = Uuid::new_v4();
        let c = conversation();

        inbox.apply(
            &ChangeEvent::MessageInserted {
                payload: message(c, viewer, "mine", 5),
            },
            viewer,
        );

        assert_eq!(inbox.meta(c).unwrap().unread_count, 0);
        assert_eq!(inbox.meta(c).unwrap().preview, "mine");
    }

    #[test]
    fn older_insert_does_not_clobber_newer_preview() {
        let mut inbox = InboxIndex::new();
        let viewer = Uuid::new_v4();
        let c = conversation();
        let author = Uuid::new_v4();

        inbox.apply(
            &ChangeEvent::MessageInserted {
                payload: message(c, author, "newest", 20),
            },
            viewer,
        );
        inbox.apply(
            &ChangeEvent::MessageInserted {
                payload: message(c, author, "late delivery", 10),
            },
            viewer,
        );

        let meta = inbox.meta(c).unwrap();
        assert_eq!(meta.preview, "newest");
        assert_eq!(meta.last_at, Some(at(20)));
        assert_eq!(meta.unread_count, 2);
    }

    #[test]
    fn viewer_marker_zeroes_badge() {
        let mut inbox = InboxIndex::new();
        let viewer = Uuid::new_v4();
        let c = conversation();
        inbox.seed_row(c, None, 5);

        inbox.apply(
            &ChangeEvent::ReadMarkerAdvanced {
                payload: ReadMarkerEvent {
                    conversation: c,
                    user_id: viewer,
                    last_read_at: at(30),
                    last_read_message: None,
                },
            },
            viewer,
        );

        assert_eq!(inbox.meta(c).unwrap().unread_count, 0);
    }

    #[test]
    fn foreign_marker_leaves_badge() {
        let mut inbox = InboxIndex::new();
        let viewer = Uuid::new_v4();
        let c = conversation();
        inbox.seed_row(c, None, 5);

        inbox.apply(
            &ChangeEvent::ReadMarkerAdvanced {
                payload: ReadMarkerEvent {
                    conversation: c,
                    user_id: Uuid::new_v4(),
                    last_read_at: at(30),
                    last_read_message: None,
                },
            },
            viewer,
        );

        assert_eq!(inbox.meta(c).unwrap().unread_count, 5);
    }

    #[test]
    fn rows_sort_by_recency() {
        let mut inbox = InboxIndex::new();
        let viewer = Uuid::new_v4();
        let (a, b) = (conversation(), conversation());

        inbox.apply(
            &ChangeEvent::MessageInserted {
                payload: message(a, Uuid::new_v4(), "older", 10),
            },
            viewer,
        );
        inbox.apply(
            &ChangeEvent::MessageInserted {
                payload: message(b, Uuid::new_v4(), "newer", 20),
            },
            viewer,
        );

        let rows = inbox.rows();
        assert_eq!(rows[0].0, b);
        assert_eq!(rows[1].0, a);
    }

    #[test]
    fn long_bodies_truncate_with_ellipsis() {
        let mut inbox = InboxIndex::new();
        let viewer = Uuid::new_v4();
        let c = conversation();
        let long = "x".repeat(200);

        inbox.apply(
            &ChangeEvent::MessageInserted {
                payload: message(c, Uuid::new_v4(), &long, 1),
            },
            viewer,
        );

        let preview = &inbox.meta(c).unwrap().preview;
        assert!(preview.ends_with('…'));
        assert_eq!(preview.chars().count(), PREVIEW_MAX_CHARS + 1);
    }
}
