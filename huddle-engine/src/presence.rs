//! Presence and typing signal.
//!
//! Best-effort and lossy by design: a missed "stopped typing" update
//! self-heals when the typing TTL lapses, and a dropped channel clears the
//! whole roster rather than showing stale "online" claims.

use std::collections::HashMap;

use chrono::Duration;
use uuid::Uuid;

use shared::models::{PresenceState, PresenceStatus, PresenceUpdate, Timestamp};

/// Per-conversation roster of who is here and who is typing.
#[derive(Debug)]
pub struct PresenceRoster {
    by_user: HashMap<Uuid, PresenceState>,
    typing_ttl: Duration,
}

impl PresenceRoster {
    #[must_use]
    pub fn new(typing_ttl: Duration) -> Self {
        Self {
            by_user: HashMap::new(),
            typing_ttl,
        }
    }

    /// Marks a participant present without touching their typing state.
    pub fn note_online(&mut self, user_id: Uuid, now: Timestamp) {
        match self.by_user.get(&user_id) {
            Some(PresenceState::Typing { expires_at, .. }) if now.0 < expires_at.0 => {
                let expires_at = *expires_at;
                self.by_user.insert(
                    user_id,
                    PresenceState::Typing {
                        last_seen_at: now,
                        expires_at,
                    },
                );
            }
            _ => {
                self.by_user
                    .insert(user_id, PresenceState::Online { last_seen_at: now });
            }
        }
    }

    /// Keystroke activity: typing until `now + typing_ttl` unless another
    /// keystroke pushes the expiry out.
    pub fn note_keystroke(&mut self, user_id: Uuid, now: Timestamp) {
        self.by_user.insert(
            user_id,
            PresenceState::Typing {
                last_seen_at: now,
                expires_at: Timestamp(now.0 + self.typing_ttl),
            },
        );
    }

    /// Applies a heartbeat from the presence channel.
    pub fn apply_update(&mut self, update: &PresenceUpdate) {
        if matches!(update.status, PresenceStatus::Offline) {
            self.disconnect(update.user_id);
        } else if update.typing {
            self.note_keystroke(update.user_id, update.last_seen_at);
        } else {
            self.note_online(update.user_id, update.last_seen_at);
        }
    }

    /// Decays expired typing states back to plain online.
    pub fn sweep(&mut self, now: Timestamp) {
        for state in self.by_user.values_mut() {
            if let PresenceState::Typing {
                last_seen_at,
                expires_at,
            } = state
                && now.0 >= expires_at.0
            {
                *state = PresenceState::Online {
                    last_seen_at: *last_seen_at,
                };
            }
        }
    }

    /// Immediate clear for one participant on channel close.
    pub fn disconnect(&mut self, user_id: Uuid) {
        self.by_user.remove(&user_id);
    }

    /// Drops the whole roster, used when the conversation's channel closes.
    pub fn clear(&mut self) {
        self.by_user.clear();
    }

    #[must_use]
    pub fn online_users(&self) -> Vec<Uuid> {
        self.by_user
            .iter()
            .filter(|(_, state)| state.is_present())
            .map(|(user, _)| *user)
            .collect()
    }

    #[must_use]
    pub fn typing_users(&self, now: Timestamp) -> Vec<Uuid> {
        self.by_user
            .iter()
            .filter(|(_, state)| state.is_typing_at(now))
            .map(|(user, _)| *user)
            .collect()
    }

    /// Indicator text: one named typist when resolvable, a generic label for
    /// anything else, `None` when nobody is typing.
    pub fn typing_label<F>(&self, now: Timestamp, display_name: F) -> Option<String>
    where
        F: Fn(Uuid) -> Option<String>,
    {
        let typists = self.typing_users(now);
        match typists.as_slice() {
            [] => None,
            [only] => Some(
                display_name(*only)
                    .map_or_else(|| "typing…".to_string(), |name| format!("{name} is typing…")),
            ),
            _ => Some("typing…".to_string()),
        }
    }

    #[must_use]
    pub fn state(&self, user_id: Uuid) -> PresenceState {
        self.by_user
            .get(&user_id)
            .copied()
            .unwrap_or(PresenceState::Idle)
    }
}
