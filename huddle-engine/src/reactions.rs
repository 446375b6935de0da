//! Per-conversation reaction aggregation.
//!
//! Local toggles flip membership immediately; the authoritative
//! `reaction.added`/`reaction.removed` events overwrite whatever the
//! optimistic state says, so concurrent toggles converge to the backend's
//! record. A failed reaction write is deliberately not reverted here — the
//! next authoritative event for the message corrects it.

use std::collections::HashMap;

use uuid::Uuid;

use shared::models::{ReactionSet, ReactionSummary};

/// Reaction state for every message in one conversation.
#[derive(Debug, Default)]
pub struct ReactionBoard {
    by_message: HashMap<Uuid, ReactionSet>,
}

impl ReactionBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Optimistically flips `user`'s membership for `emoji` on a message.
    /// Returns `true` when the user is now a member, which tells the caller
    /// whether to issue a remote upsert or delete.
    pub fn toggle(&mut self, message_id: Uuid, user_id: Uuid, emoji: &str) -> bool {
        self.by_message
            .entry(message_id)
            .or_default()
            .toggle(user_id, emoji)
    }

    /// Applies an authoritative add event.
    pub fn apply_added(&mut self, message_id: Uuid, user_id: Uuid, emoji: &str) {
        self.by_message
            .entry(message_id)
            .or_default()
            .apply_added(user_id, emoji);
    }

    /// Applies an authoritative remove event, dropping empty sets.
    pub fn apply_removed(&mut self, message_id: Uuid, user_id: Uuid, emoji: &str) {
        if let Some(set) = self.by_message.get_mut(&message_id) {
            set.apply_removed(user_id, emoji);
            if set.is_empty() {
                self.by_message.remove(&message_id);
            }
        }
    }

    /// Drops all reaction state for a deleted message.
    pub fn purge(&mut self, message_id: Uuid) {
        self.by_message.remove(&message_id);
    }

    #[must_use]
    pub fn reactions(&self, message_id: Uuid) -> Option<&ReactionSet> {
        self.by_message.get(&message_id)
    }

    /// Rendering summaries for one message from `viewer`'s side.
    #[must_use]
    pub fn summaries(&self, message_id: Uuid, viewer: Uuid) -> Vec<ReactionSummary> {
        self.by_message
            .get(&message_id)
            .map(|set| set.summaries(viewer))
            .unwrap_or_default()
    }
}
