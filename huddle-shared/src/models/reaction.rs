use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-message reaction state: emoji mapped to the set of users who reacted.
///
/// A user appears at most once per emoji. Remote add/remove events are the
/// source of truth; local toggles are optimistic and converge to whatever
/// the backend recorded last.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionSet {
    by_emoji: BTreeMap<String, BTreeSet<Uuid>>,
}

/// Rendering summary for one emoji on one message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    pub reacted: bool,
}

impl ReactionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an authoritative add. Idempotent.
    pub fn apply_added(&mut self, user_id: Uuid, emoji: &str) {
        self.by_emoji
            .entry(emoji.to_string())
            .or_default()
            .insert(user_id);
    }

    /// Applies an authoritative remove, dropping the emoji entry when the
    /// last reactor leaves. Idempotent.
    pub fn apply_removed(&mut self, user_id: Uuid, emoji: &str) {
        if let Some(users) = self.by_emoji.get_mut(emoji) {
            users.remove(&user_id);
            if users.is_empty() {
                self.by_emoji.remove(emoji);
            }
        }
    }

    /// Optimistically flips membership: removes if present, adds if absent.
    /// Returns `true` when the user is now a member.
    pub fn toggle(&mut self, user_id: Uuid, emoji: &str) -> bool {
        if self.contains(user_id, emoji) {
            self.apply_removed(user_id, emoji);
            false
        } else {
            self.apply_added(user_id, emoji);
            true
        }
    }

    #[must_use]
    pub fn contains(&self, user_id: Uuid, emoji: &str) -> bool {
        self.by_emoji
            .get(emoji)
            .is_some_and(|users| users.contains(&user_id))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_emoji.is_empty()
    }

    /// Per-emoji summaries for rendering, flagged from `viewer`'s side.
    #[must_use]
    pub fn summaries(&self, viewer: Uuid) -> Vec<ReactionSummary> {
        self.by_emoji
            .iter()
            .map(|(emoji, users)| ReactionSummary {
                emoji: emoji.clone(),
                count: users.len(),
                reacted: users.contains(&viewer),
            })
            .collect()
    }
}
