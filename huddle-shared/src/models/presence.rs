use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ConversationRef, Timestamp};

/// Coarse presence classification published over the presence channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

/// One participant's ephemeral state within a conversation channel.
///
/// Never persisted; cleared on channel disconnect. `Typing` carries its own
/// expiry so a missed "stopped typing" signal self-heals by timeout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PresenceState {
    /// Not attending the conversation.
    Idle,
    /// Attending, not typing.
    Online { last_seen_at: Timestamp },
    /// Actively typing until `expires_at`.
    Typing {
        last_seen_at: Timestamp,
        expires_at: Timestamp,
    },
}

impl PresenceState {
    #[must_use]
    pub fn is_typing_at(&self, now: Timestamp) -> bool {
        match self {
            Self::Typing { expires_at, .. } => now.0 < expires_at.0,
            Self::Idle | Self::Online { .. } => false,
        }
    }

    #[must_use]
    pub const fn is_present(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Heartbeat payload published on a conversation's presence channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub conversation: ConversationRef,
    pub user_id: Uuid,
    pub status: PresenceStatus,
    pub typing: bool,
    pub last_seen_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn typing_expires_by_timestamp() {
        let now = Timestamp(Utc::now());
        let state = PresenceState::Typing {
            last_seen_at: now,
            expires_at: Timestamp(now.0 + Duration::milliseconds(1800)),
        };

        assert!(state.is_typing_at(now));
        let later = Timestamp(now.0 + Duration::milliseconds(2000));
        assert!(!state.is_typing_at(later));
    }

    #[test]
    fn idle_is_not_present() {
        assert!(!PresenceState::Idle.is_present());
        assert!(
            PresenceState::Online {
                last_seen_at: Timestamp(Utc::now())
            }
            .is_present()
        );
    }

    #[test]
    fn presence_update_round_trips() {
        let update = PresenceUpdate {
            conversation: ConversationRef::group(Uuid::new_v4()),
            user_id: Uuid::new_v4(),
            status: PresenceStatus::Online,
            typing: true,
            last_seen_at: Timestamp(Utc::now()),
        };

        let json = serde_json::to_string(&update).unwrap();
        let back: PresenceUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, update);
    }
}
