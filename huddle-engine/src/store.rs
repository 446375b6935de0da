//! Seams to the remote backend.
//!
//! The engine never talks to a concrete transport; everything it needs from
//! the remote store is expressed here as object-safe async traits. Contract
//! for `subscribe` streams: at-least-once delivery, no ordering guarantee,
//! and silent gaps across network drops — the subscriber repairs gaps by
//! re-fetching a recent window (see [`crate::subscriber`]).

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use shared::models::{
    ChangeEvent, ConversationRef, Message, NewMessage, PresenceUpdate, ReadMarker, Timestamp,
};

/// Push stream of normalized change events for one conversation.
///
/// The sender side lives in the store implementation; the stream ends when
/// the channel drops, at which point the subscriber reconnects.
pub type ChangeStream = mpsc::Receiver<ChangeEvent>;

/// Push stream of presence heartbeats for one conversation.
pub type PresenceStream = mpsc::Receiver<PresenceUpdate>;

/// Durable conversation log and its point-write operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Appends a message and returns the durable row, with a server id and
    /// `created_at`, echoing the request's `client_tag`.
    async fn append_message(&self, request: NewMessage) -> Result<Message>;

    /// Deletes a message by server id.
    async fn delete_message(&self, conversation: ConversationRef, message_id: Uuid) -> Result<()>;

    /// Records a reaction, keyed by `(message, user, emoji)`.
    async fn upsert_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<()>;

    /// Removes a reaction, keyed by `(message, user, emoji)`.
    async fn delete_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<()>;

    /// Upserts a read marker, keyed by `(conversation, user)`.
    async fn upsert_read_marker(&self, marker: ReadMarker) -> Result<()>;

    /// Fetches up to `limit` recent rows, optionally only those newer than
    /// `since`. Used for the initial window and for gap repair after a
    /// reconnect.
    async fn recent_messages(
        &self,
        conversation: ConversationRef,
        since: Option<Timestamp>,
        limit: u32,
    ) -> Result<Vec<Message>>;

    /// Latest message per listed conversation, for seeding list rows in one
    /// batched query.
    async fn conversation_heads(
        &self,
        conversations: Vec<ConversationRef>,
    ) -> Result<Vec<(ConversationRef, Option<Message>)>>;

    /// One user's stored read markers across the listed conversations, in
    /// one batched query. Conversations the user has never read are simply
    /// absent from the result.
    async fn read_markers(
        &self,
        user_id: Uuid,
        conversations: Vec<ConversationRef>,
    ) -> Result<Vec<ReadMarker>>;

    /// Opens a change subscription for one conversation.
    async fn subscribe(&self, conversation: ConversationRef) -> Result<ChangeStream>;
}

/// Ephemeral presence channel per conversation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresenceChannel: Send + Sync {
    /// Publishes the local participant's heartbeat.
    async fn track(&self, update: PresenceUpdate) -> Result<()>;

    /// Delivers membership updates for the conversation.
    async fn watch(&self, conversation: ConversationRef) -> Result<PresenceStream>;
}

/// Opaque attachment upload returning a stable URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Uploads a blob and returns its URL. Awaited before the message
    /// append; a failed upload fails the whole submit.
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<String>;
}
