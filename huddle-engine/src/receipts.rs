//! Read-receipt tracking and unread derivation.
//!
//! Visibility observations arrive scroll-driven from the rendering layer;
//! each `(message, user)` pair is upserted at most once. Pending entries are
//! skipped — they have no durable id to mark against. Markers only move
//! forward; stale remote echoes are clamped, never applied.

use std::collections::{HashMap, HashSet};

use metrics::counter;
use tracing::trace;
use uuid::Uuid;

use shared::models::{ConversationRef, ReadMarker, ReadMarkerEvent, Timestamp, TranscriptEntry};

/// Read markers for every participant the client has heard about, plus the
/// idempotency set for the local user's visibility observations.
#[derive(Debug, Default)]
pub struct ReadTracker {
    markers: HashMap<(ConversationRef, Uuid), ReadMarker>,
    observed: HashSet<(Uuid, Uuid)>,
}

impl ReadTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `user` saw a confirmed message in the viewport.
    ///
    /// Returns the marker to upsert remotely the first time this
    /// `(message, user)` pair is seen; repeat observations return `None`.
    /// Pending entries return `None` outright.
    pub fn observe_visible(
        &mut self,
        conversation: ConversationRef,
        user_id: Uuid,
        entry: &TranscriptEntry,
    ) -> Option<ReadMarker> {
        let message_id = entry.server_id()?;
        if !self.observed.insert((message_id, user_id)) {
            return None;
        }

        let marker = self.advance(conversation, user_id, entry.created_at(), Some(message_id));
        trace!(conversation = %conversation, message = %message_id, "visible message marked read");
        marker
    }

    /// Coarse "read up to now" for a conversation, issued on open and on
    /// window-focus regain; zeroes the unread badge.
    pub fn mark_conversation_read(
        &mut self,
        conversation: ConversationRef,
        user_id: Uuid,
        now: Timestamp,
    ) -> Option<ReadMarker> {
        self.advance(conversation, user_id, now, None)
    }

    /// Applies a remote marker event for any participant. Regressions are
    /// clamped.
    pub fn apply_event(&mut self, event: &ReadMarkerEvent) {
        self.advance(
            event.conversation,
            event.user_id,
            event.last_read_at,
            event.last_read_message,
        );
    }

    /// Drops per-message observation state for a deleted message.
    pub fn purge_message(&mut self, message_id: Uuid) {
        self.observed.retain(|(m, _)| *m != message_id);
    }

    #[must_use]
    pub fn marker(&self, conversation: ConversationRef, user_id: Uuid) -> Option<&ReadMarker> {
        self.markers.get(&(conversation, user_id))
    }

    /// Messages newer than `user`'s marker authored by someone else.
    /// Pending entries never count.
    #[must_use]
    pub fn unread_count(
        &self,
        conversation: ConversationRef,
        user_id: Uuid,
        entries: &[TranscriptEntry],
    ) -> i64 {
        let since = self
            .marker(conversation, user_id)
            .map(|marker| marker.last_read_at);

        let count = entries
            .iter()
            .filter(|entry| !entry.is_pending())
            .filter(|entry| entry.author_id() != user_id)
            .filter(|entry| since.is_none_or(|at| entry.created_at() > at))
            .count();
        i64::try_from(count).unwrap_or(i64::MAX)
    }

    fn advance(
        &mut self,
        conversation: ConversationRef,
        user_id: Uuid,
        at: Timestamp,
        message: Option<Uuid>,
    ) -> Option<ReadMarker> {
        match self.markers.get_mut(&(conversation, user_id)) {
            Some(marker) => {
                if marker.advance(at, message) {
                    Some(marker.clone())
                } else {
                    counter!("huddle_marker_regressions_total").increment(1);
                    None
                }
            }
            None => {
                let mut marker = ReadMarker::new(user_id, conversation, at);
                marker.last_read_message = message;
                self.markers.insert((conversation, user_id), marker.clone());
                Some(marker)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared::models::{Message, PendingMessage};

    fn conversation() -> ConversationRef {
        ConversationRef::group(Uuid::new_v4())
    }

    fn at(secs: u32) -> Timestamp {
        Timestamp(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, secs).unwrap())
    }

    fn confirmed(conversation: ConversationRef, author: Uuid, secs: u32) -> TranscriptEntry {
        TranscriptEntry::Confirmed(Message {
            id: Uuid::new_v4(),
            conversation,
            author_id: author,
            body: "m".into(),
            created_at: at(secs),
            parent_id: None,
            attachments: vec![],
            client_tag: None,
        })
    }

    fn pending(conversation: ConversationRef, author: Uuid, secs: u32) -> TranscriptEntry {
        TranscriptEntry::Pending(PendingMessage {
            client_tag: Uuid::new_v4(),
            conversation,
            author_id: author,
            body: "p".into(),
            submitted_at: at(secs),
            parent_id: None,
            attachments: vec![],
        })
    }

    #[test]
    fn observing_same_message_twice_upserts_once() {
        let mut tracker = ReadTracker::new();
        let conversation = conversation();
        let user = Uuid::new_v4();
        let entry = confirmed(conversation, Uuid::new_v4(), 5);

        assert!(tracker.observe_visible(conversation, user, &entry).is_some());
        assert!(tracker.observe_visible(conversation, user, &entry).is_none());
    }

    #[test]
    fn pending_entries_are_skipped() {
        let mut tracker = ReadTracker::new();
        let conversation = conversation();
        let user = Uuid::new_v4();

        let entry = pending(conversation, user, 5);
        assert!(tracker.observe_visible(conversation, user, &entry).is_none());
    }

    #[test]
    fn marker_never_regresses() {
        let mut tracker = ReadTracker::new();
        let conversation = conversation();
        let user = Uuid::new_v4();

        tracker.mark_conversation_read(conversation, user, at(30));
        tracker.apply_event(&ReadMarkerEvent {
            conversation,
            user_id: user,
            last_read_at: at(10),
            last_read_message: None,
        });

        assert_eq!(tracker.marker(conversation, user).unwrap().last_read_at, at(30));
    }

    #[test]
    fn unread_counts_foreign_confirmed_messages_after_marker() {
        let mut tracker = ReadTracker::new();
        let conversation = conversation();
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();

        tracker.mark_conversation_read(conversation, me, at(10));

        let entries = vec![
            confirmed(conversation, peer, 5),  // before marker
            confirmed(conversation, peer, 15), // unread
            confirmed(conversation, me, 20),   // own message
            confirmed(conversation, peer, 25), // unread
            pending(conversation, peer, 30),   // pending never counts
        ];

        assert_eq!(tracker.unread_count(conversation, me, &entries), 2);
    }

    #[test]
    fn mark_read_zeroes_unread() {
        let mut tracker = ReadTracker::new();
        let conversation = conversation();
        let me = Uuid::new_v4();
        let entries = vec![confirmed(conversation, Uuid::new_v4(), 5)];

        assert_eq!(tracker.unread_count(conversation, me, &entries), 1);
        tracker.mark_conversation_read(conversation, me, at(50));
        assert_eq!(tracker.unread_count(conversation, me, &entries), 0);
    }
}
