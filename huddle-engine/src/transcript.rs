//! Transcript reconciliation.
//!
//! One [`Transcript`] per conversation merges the optimistic send stream and
//! the remote change stream into a single ordered, deduplicated list. The
//! re-sort after every mutation is load-bearing: the transport may deliver
//! events in any order, and `created_at` ordering is what makes the final
//! view correct regardless.

use std::collections::HashSet;

use chrono::Duration;
use metrics::counter;
use tracing::{debug, warn};
use uuid::Uuid;

use shared::models::{ConversationRef, Message, PendingMessage, TranscriptEntry};

/// What the rendering layer should do with the viewport after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollHint {
    /// The viewer was already near the bottom; follow the new tail.
    StickToBottom,
    /// The viewer is reading history; do not yank the viewport.
    Preserve,
}

/// Result of applying one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Whether the visible list changed at all.
    pub changed: bool,
    pub scroll: ScrollHint,
}

impl ApplyOutcome {
    const fn unchanged() -> Self {
        Self {
            changed: false,
            scroll: ScrollHint::Preserve,
        }
    }
}

/// Ordered, deduplicated message list for one conversation.
#[derive(Debug)]
pub struct Transcript {
    conversation: ConversationRef,
    entries: Vec<TranscriptEntry>,
    /// Server ids already merged; inserts for these are idempotent no-ops.
    seen_ids: HashSet<Uuid>,
    /// Pending tags already promoted or rolled back; at most one promotion
    /// or rollback happens per pending entry.
    retired_tags: HashSet<Uuid>,
    promotion_window: Duration,
}

impl Transcript {
    #[must_use]
    pub fn new(conversation: ConversationRef, promotion_window: Duration) -> Self {
        Self {
            conversation,
            entries: Vec::new(),
            seen_ids: HashSet::new(),
            retired_tags: HashSet::new(),
            promotion_window,
        }
    }

    #[must_use]
    pub const fn conversation(&self) -> ConversationRef {
        self.conversation
    }

    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a locally composed entry ahead of server confirmation.
    ///
    /// Idempotent: re-submitting a tag that is live or already retired
    /// leaves the list unchanged, which makes pending-append commute with a
    /// promotion that beat it here.
    pub fn push_pending(&mut self, pending: PendingMessage, near_bottom: bool) -> ApplyOutcome {
        if self.retired_tags.contains(&pending.client_tag)
            || self.pending_index_by_tag(pending.client_tag).is_some()
        {
            return ApplyOutcome::unchanged();
        }

        self.entries.push(TranscriptEntry::Pending(pending));
        self.resort();
        ApplyOutcome {
            changed: true,
            scroll: Self::scroll_hint(near_bottom),
        }
    }

    /// Rolls back a pending entry after a failed write. Idempotent.
    pub fn remove_pending(&mut self, client_tag: Uuid) -> bool {
        if let Some(index) = self.pending_index_by_tag(client_tag) {
            self.entries.remove(index);
            self.retired_tags.insert(client_tag);
            counter!("huddle_send_rollbacks_total").increment(1);
            true
        } else {
            false
        }
    }

    /// Merges a server-confirmed row.
    ///
    /// Duplicate ids are ignored. A row matching a pending entry — exactly
    /// by echoed client tag, or fuzzily by author+body within the promotion
    /// window — replaces that entry (promotion); anything else is appended.
    /// The list is re-sorted by `created_at` before returning, stable for
    /// ties.
    pub fn insert(&mut self, message: Message, near_bottom: bool) -> ApplyOutcome {
        if self.seen_ids.contains(&message.id) {
            counter!("huddle_duplicate_inserts_total").increment(1);
            return ApplyOutcome::unchanged();
        }
        self.seen_ids.insert(message.id);

        if let Some(index) = self.promotion_target(&message) {
            if let TranscriptEntry::Pending(pending) = &self.entries[index] {
                self.retired_tags.insert(pending.client_tag);
            }
            self.entries[index] = TranscriptEntry::Confirmed(message);
            counter!("huddle_promotions_total").increment(1);
        } else {
            self.entries.push(TranscriptEntry::Confirmed(message));
        }

        self.resort();
        ApplyOutcome {
            changed: true,
            scroll: Self::scroll_hint(near_bottom),
        }
    }

    /// Applies a remote delete. Pending entries are never targeted — they
    /// have no server id yet.
    pub fn delete(&mut self, message_id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.server_id() != Some(message_id));
        // Keep the id in seen_ids: a late replay of the insert must not
        // resurrect the row.
        before != self.entries.len()
    }

    /// Server ids currently visible, oldest first.
    #[must_use]
    pub fn confirmed_ids(&self) -> Vec<Uuid> {
        self.entries.iter().filter_map(TranscriptEntry::server_id).collect()
    }

    /// The newest confirmed timestamp, for resync cursors.
    #[must_use]
    pub fn latest_confirmed_at(&self) -> Option<shared::models::Timestamp> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_pending())
            .map(TranscriptEntry::created_at)
            .max()
    }

    fn pending_index_by_tag(&self, client_tag: Uuid) -> Option<usize> {
        self.entries.iter().position(|entry| {
            matches!(entry, TranscriptEntry::Pending(p) if p.client_tag == client_tag)
        })
    }

    /// Picks the pending entry this row confirms, if any.
    fn promotion_target(&self, message: &Message) -> Option<usize> {
        if let Some(tag) = message.client_tag
            && let Some(index) = self.pending_index_by_tag(tag)
        {
            return Some(index);
        }

        // Fallback for rows whose tag did not round-trip: author + body
        // within the promotion window. Two plausible matches resolve to the
        // earliest-submitted entry; that is the known soft spot of the
        // heuristic, so it is logged rather than guessed at silently.
        let mut candidates: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry {
                TranscriptEntry::Pending(p)
                    if p.author_id == message.author_id
                        && p.body == message.body
                        && p.submitted_at.abs_delta(&message.created_at)
                            <= self.promotion_window =>
                {
                    Some(index)
                }
                _ => None,
            })
            .collect();

        if candidates.len() > 1 {
            warn!(
                conversation = %self.conversation,
                message_id = %message.id,
                candidates = candidates.len(),
                "ambiguous promotion match; picking earliest-submitted pending entry"
            );
            counter!("huddle_promotion_ambiguities_total").increment(1);
            candidates.sort_by_key(|&index| self.entries[index].created_at());
        }

        candidates.first().copied()
    }

    fn resort(&mut self) {
        // Vec::sort_by_key is stable: ties keep insertion order.
        self.entries.sort_by_key(TranscriptEntry::created_at);
        debug!(conversation = %self.conversation, entries = self.entries.len(), "transcript resorted");
    }

    const fn scroll_hint(near_bottom: bool) -> ScrollHint {
        if near_bottom {
            ScrollHint::StickToBottom
        } else {
            ScrollHint::Preserve
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared::models::{ConversationRef, Timestamp};

    fn conversation() -> ConversationRef {
        ConversationRef::group(Uuid::new_v4())
    }

    fn at(secs: u32) -> Timestamp {
        Timestamp(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, secs).unwrap())
    }

    fn transcript() -> Transcript {
        Transcript::new(conversation(), Duration::seconds(30))
    }

    fn message(body: &str, author: Uuid, created_at: Timestamp, tag: Option<Uuid>) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation: conversation(),
            author_id: author,
            body: body.to_string(),
            created_at,
            parent_id: None,
            attachments: vec![],
            client_tag: tag,
        }
    }

    fn pending(body: &str, author: Uuid, submitted_at: Timestamp) -> PendingMessage {
        PendingMessage {
            client_tag: Uuid::new_v4(),
            conversation: conversation(),
            author_id: author,
            body: body.to_string(),
            submitted_at,
            parent_id: None,
            attachments: vec![],
        }
    }

    fn bodies(t: &Transcript) -> Vec<&str> {
        t.entries().iter().map(TranscriptEntry::body).collect()
    }

    #[test]
    fn inserts_stay_sorted_regardless_of_delivery_order() {
        let mut t = transcript();
        let author = Uuid::new_v4();

        t.insert(message("third", author, at(30), None), true);
        t.insert(message("first", author, at(10), None), true);
        t.insert(message("second", author, at(20), None), true);

        assert_eq!(bodies(&t), vec!["first", "second", "third"]);
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let mut t = transcript();
        let m = message("once", Uuid::new_v4(), at(5), None);

        assert!(t.insert(m.clone(), true).changed);
        assert!(!t.insert(m, true).changed);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn exact_tag_promotion_leaves_single_confirmed_entry() {
        let mut t = transcript();
        let author = Uuid::new_v4();
        let p = pending("hello", author, at(0));
        let tag = p.client_tag;

        t.push_pending(p, true);
        let confirmed = message("hello", author, at(2), Some(tag));
        t.insert(confirmed.clone(), true);

        assert_eq!(t.len(), 1);
        assert_eq!(t.entries()[0], TranscriptEntry::Confirmed(confirmed));
    }

    #[test]
    fn fuzzy_promotion_matches_author_body_within_window() {
        let mut t = transcript();
        let author = Uuid::new_v4();
        t.push_pending(pending("hello", author, at(0)), true);

        // Tag lost in transit; arrives 2s later.
        t.insert(message("hello", author, at(2), None), true);

        assert_eq!(t.len(), 1);
        assert!(!t.entries()[0].is_pending());
    }

    #[test]
    fn fuzzy_promotion_respects_window() {
        let mut t = transcript();
        let author = Uuid::new_v4();
        t.push_pending(pending("hello", author, at(0)), true);

        // 45s later is outside the 30s window: must not merge.
        t.insert(message("hello", author, at(45), None), true);

        assert_eq!(t.len(), 2);
    }

    #[test]
    fn ambiguous_fuzzy_match_takes_earliest_submitted() {
        let mut t = transcript();
        let author = Uuid::new_v4();
        let older = pending("same text", author, at(0));
        let newer = pending("same text", author, at(5));
        let older_tag = older.client_tag;

        t.push_pending(older, true);
        t.push_pending(newer, true);
        t.insert(message("same text", author, at(3), None), true);

        // The older pending entry was promoted, the newer one survives.
        assert_eq!(t.len(), 2);
        let still_pending: Vec<_> = t
            .entries()
            .iter()
            .filter_map(|entry| match entry {
                TranscriptEntry::Pending(p) => Some(p.client_tag),
                TranscriptEntry::Confirmed(_) => None,
            })
            .collect();
        assert_eq!(still_pending.len(), 1);
        assert_ne!(still_pending[0], older_tag);
    }

    #[test]
    fn promotion_and_pending_append_commute() {
        let author = Uuid::new_v4();
        let p = pending("race", author, at(0));
        let confirmed = message("race", author, at(1), Some(p.client_tag));

        // Insert-then-pending: the late pending append is a no-op.
        let mut t = transcript();
        t.push_pending(p.clone(), true);
        t.insert(confirmed.clone(), true);
        t.push_pending(p.clone(), true);
        assert_eq!(t.len(), 1);

        // Pending-then-insert arrives at the same single entry.
        let mut t2 = transcript();
        t2.push_pending(p, true);
        t2.insert(confirmed, true);
        assert_eq!(t2.len(), 1);
        assert!(!t2.entries()[0].is_pending());
    }

    #[test]
    fn rollback_removes_pending_once() {
        let mut t = transcript();
        let p = pending("failed send", Uuid::new_v4(), at(0));
        let tag = p.client_tag;
        t.push_pending(p, true);

        assert!(t.remove_pending(tag));
        assert!(!t.remove_pending(tag));
        assert!(t.is_empty());
    }

    #[test]
    fn delete_removes_row_and_blocks_replay() {
        let mut t = transcript();
        let m = message("gone", Uuid::new_v4(), at(1), None);
        let id = m.id;
        t.insert(m.clone(), true);

        assert!(t.delete(id));
        assert!(t.is_empty());
        // Late at-least-once replay of the insert must not resurrect it.
        assert!(!t.insert(m, true).changed);
        assert!(t.is_empty());
    }

    #[test]
    fn scroll_hint_follows_near_bottom_flag() {
        let mut t = transcript();
        let outcome = t.insert(message("new", Uuid::new_v4(), at(1), None), true);
        assert_eq!(outcome.scroll, ScrollHint::StickToBottom);

        let outcome = t.insert(message("older", Uuid::new_v4(), at(0), None), false);
        assert_eq!(outcome.scroll, ScrollHint::Preserve);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut t = transcript();
        let author = Uuid::new_v4();
        t.insert(message("a", author, at(7), None), true);
        t.insert(message("b", author, at(7), None), true);

        assert_eq!(bodies(&t), vec!["a", "b"]);
    }

    #[test]
    fn latest_confirmed_at_ignores_pending() {
        let mut t = transcript();
        t.insert(message("m", Uuid::new_v4(), at(10), None), true);
        t.push_pending(pending("p", Uuid::new_v4(), at(50)), true);

        assert_eq!(t.latest_confirmed_at(), Some(at(10)));
    }
}
