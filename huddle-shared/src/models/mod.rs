pub mod conversation;
pub mod events;
pub mod list;
pub mod message;
pub mod presence;
pub mod reaction;
pub mod receipt;
pub mod timestamp;

pub use conversation::{ConversationKind, ConversationRef};
pub use events::{ChangeEvent, MessageDeletedEvent, ReactionEvent, ReadMarkerEvent};
pub use list::{ListMeta, UNREAD_DISPLAY_CAP};
pub use message::{Attachment, Message, NewMessage, PendingMessage, TranscriptEntry};
pub use presence::{PresenceState, PresenceStatus, PresenceUpdate};
pub use reaction::{ReactionSet, ReactionSummary};
pub use receipt::ReadMarker;
pub use timestamp::Timestamp;
