#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Real-time conversation reconciliation engine for Huddle.
//!
//! The engine merges two event streams per conversation — locally composed
//! optimistic sends and the remote change subscription — into one ordered,
//! deduplicated transcript, and derives reactions, read receipts, presence,
//! and conversation-list metadata from the same events. [`ChatSession`] is
//! the surface a rendering layer talks to.

pub mod error;
pub mod inbox;
pub mod outbox;
pub mod prefs;
pub mod presence;
pub mod reactions;
pub mod receipts;
pub mod session;
pub mod store;
pub mod subscriber;
pub mod transcript;

pub use error::{EngineError, EngineResult};
pub use outbox::{Draft, DraftAttachment};
pub use session::ChatSession;
pub use store::{BlobStore, ChatStore, PresenceChannel};
pub use transcript::{ApplyOutcome, ScrollHint, Transcript};
