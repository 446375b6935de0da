//! The surface a rendering layer talks to.
//!
//! [`ChatSession`] owns one state slice per conversation (transcript,
//! reaction board, presence roster), the viewer's read tracker, the inbox
//! index, and one change channel per listed conversation. Every mutation
//! funnels through here so the slices stay consistent with each other; the
//! renderer only ever reads.
//!
//! The channels stay open while a conversation is listed, not just while it
//! is selected: list rows (preview, unread badge) must keep moving for
//! backgrounded conversations too. Selection only adds the presence watch
//! and the initial transcript window on top.
//!
//! Slices are keyed by conversation, never by "currently visible": a submit
//! that is still in flight when the viewer switches away completes against
//! its own conversation's slice.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared::config::SyncConfig;
use shared::models::{
    ChangeEvent, ConversationRef, Message, PresenceStatus, PresenceUpdate, ReactionSummary,
    ReadMarkerEvent, Timestamp, TranscriptEntry,
};

use crate::error::{EngineError, EngineResult};
use crate::inbox::InboxIndex;
use crate::outbox::{Draft, SendBuffer};
use crate::prefs::{PreferenceStore, LAST_SELECTED_KEY};
use crate::presence::PresenceRoster;
use crate::reactions::ReactionBoard;
use crate::receipts::ReadTracker;
use crate::store::{BlobStore, ChatStore, PresenceChannel, PresenceStream};
use crate::subscriber::{ChannelGuard, ChannelSettings};
use crate::transcript::{ApplyOutcome, ScrollHint, Transcript};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-conversation state derived from the two event streams.
struct Slice {
    transcript: Transcript,
    reactions: ReactionBoard,
    roster: PresenceRoster,
}

impl Slice {
    fn new(conversation: ConversationRef, config: &SyncConfig) -> Self {
        Self {
            transcript: Transcript::new(conversation, config.promotion_window()),
            reactions: ReactionBoard::new(),
            roster: PresenceRoster::new(config.typing_ttl()),
        }
    }
}

/// One viewer's live connection to their conversations.
pub struct ChatSession {
    viewer: Uuid,
    config: SyncConfig,
    store: Arc<dyn ChatStore>,
    presence: Arc<dyn PresenceChannel>,
    blobs: Arc<dyn BlobStore>,
    prefs: Arc<dyn PreferenceStore>,
    memberships: HashSet<ConversationRef>,
    slices: HashMap<ConversationRef, Slice>,
    inbox: InboxIndex,
    receipts: ReadTracker,
    outbox: SendBuffer,
    selected: Option<ConversationRef>,
    guards: HashMap<ConversationRef, ChannelGuard>,
    events_tx: mpsc::Sender<ChangeEvent>,
    events_rx: mpsc::Receiver<ChangeEvent>,
    presence_rx: Option<PresenceStream>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("viewer", &self.viewer)
            .field("selected", &self.selected)
            .field("conversations", &self.slices.len())
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    #[must_use]
    pub fn new(
        viewer: Uuid,
        config: SyncConfig,
        store: Arc<dyn ChatStore>,
        presence: Arc<dyn PresenceChannel>,
        blobs: Arc<dyn BlobStore>,
        prefs: Arc<dyn PreferenceStore>,
        memberships: Vec<ConversationRef>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            viewer,
            config,
            store,
            presence,
            blobs,
            prefs,
            memberships: memberships.into_iter().collect(),
            slices: HashMap::new(),
            inbox: InboxIndex::new(),
            receipts: ReadTracker::new(),
            outbox: SendBuffer::new(),
            selected: None,
            guards: HashMap::new(),
            events_tx,
            events_rx,
            presence_rx: None,
        }
    }

    /// Seeds the conversation list from two batched queries (heads and the
    /// viewer's read markers), opens a change channel per listed row, and
    /// reopens the last selected conversation, when one is remembered and
    /// still joined.
    ///
    /// # Errors
    /// `Transport` when the head or marker query fails; a remembered
    /// selection that can no longer be opened degrades to no selection
    /// instead of failing.
    #[instrument(skip(self))]
    pub async fn bootstrap(&mut self) -> EngineResult<()> {
        let listed: Vec<ConversationRef> = self.memberships.iter().copied().collect();
        let heads = self
            .store
            .conversation_heads(listed.clone())
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let markers = self
            .store
            .read_markers(self.viewer, listed)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let mut read_up_to: HashMap<ConversationRef, Timestamp> = HashMap::new();
        for marker in markers {
            read_up_to.insert(marker.conversation, marker.last_read_at);
            // The tracker clamps later echoes against the stored marker.
            self.receipts.apply_event(&ReadMarkerEvent {
                conversation: marker.conversation,
                user_id: marker.user_id,
                last_read_at: marker.last_read_at,
                last_read_message: marker.last_read_message,
            });
        }

        for (conversation, head) in heads {
            let since = read_up_to.get(&conversation).copied();
            let unread = self.seeded_unread(conversation, head.as_ref(), since).await;
            self.inbox.seed_row(conversation, head.as_ref(), unread);
            // The channel watermark is the head: everything up to it is
            // already accounted for by the seed.
            self.ensure_channel(conversation, head.map(|m| m.created_at));
        }

        if let Some(conversation) = self.remembered_selection()
            && self.memberships.contains(&conversation)
        {
            if let Err(error) = self.select_conversation(conversation).await {
                warn!(%conversation, %error, "could not reopen remembered conversation");
            }
        }
        Ok(())
    }

    /// Opens a conversation: leaves the previous presence channel, fetches
    /// the initial message window, joins the new presence channel, and marks
    /// the conversation read. The change channel stays open either way; it
    /// belongs to the list row, not to the selection.
    ///
    /// # Errors
    /// `NotAMember` for a conversation the viewer has not joined;
    /// `Transport` when the initial window fetch fails.
    #[instrument(skip(self))]
    pub async fn select_conversation(
        &mut self,
        conversation: ConversationRef,
    ) -> EngineResult<()> {
        self.require_membership(conversation)?;

        self.presence_rx = None;
        if let Some(previous) = self.selected.take() {
            if let Some(slice) = self.slices.get_mut(&previous) {
                slice.roster.clear();
            }
            self.inbox.set_typing(previous, false);
            // Peers drop us from their rosters right away instead of
            // waiting for the typing TTL to expire.
            self.publish_presence(previous, PresenceStatus::Offline, false)
                .await;
        }

        // Channel before window: a row committed while the fetch is in
        // flight arrives as an event (or in the connect resync) and the
        // transcript deduplicates the overlap.
        self.ensure_channel(conversation, None);

        let window = self
            .store
            .recent_messages(conversation, None, self.config.resync_window)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let slice = self
            .slices
            .entry(conversation)
            .or_insert_with(|| Slice::new(conversation, &self.config));
        for message in window {
            slice.transcript.insert(message, true);
        }

        match self.presence.watch(conversation).await {
            Ok(stream) => self.presence_rx = Some(stream),
            Err(error) => {
                // Presence is cosmetic; the transcript works without it.
                warn!(%conversation, %error, "presence watch failed");
            }
        }
        self.publish_presence(conversation, PresenceStatus::Online, false)
            .await;

        self.selected = Some(conversation);
        self.persist_selection(conversation);
        self.mark_read(conversation).await;
        info!(%conversation, "conversation selected");
        Ok(())
    }

    /// Submits a draft: optimistic entry first, then the remote write.
    ///
    /// On success the confirmed row promotes the optimistic entry in place.
    /// On failure the optimistic entry is rolled back and the returned error
    /// carries the draft so the compose box can be repopulated.
    ///
    /// # Errors
    /// `NotAMember`, `Validation` for an empty or duplicate in-flight draft,
    /// `SendFailed` for a rejected upload or append.
    #[instrument(skip(self, draft))]
    pub async fn submit(
        &mut self,
        conversation: ConversationRef,
        draft: Draft,
        near_bottom: bool,
    ) -> EngineResult<ApplyOutcome> {
        self.require_membership(conversation)?;

        let request = self.outbox.begin(conversation, self.viewer, &draft)?;
        let client_tag = request.client_tag;
        let pending = request.to_pending(Timestamp::now());

        let slice = self
            .slices
            .entry(conversation)
            .or_insert_with(|| Slice::new(conversation, &self.config));
        slice.transcript.push_pending(pending, near_bottom);

        let result = SendBuffer::perform(&*self.store, &*self.blobs, request, &draft).await;
        self.outbox.finish(conversation, &draft);

        match result {
            Ok(message) => {
                let event = ChangeEvent::MessageInserted {
                    payload: message.clone(),
                };
                // The subscription echoes this row too; both paths are
                // idempotent, order does not matter.
                let outcome = self.apply_event(event, near_bottom);
                debug!(%conversation, message_id = %message.id, "send confirmed");
                Ok(outcome)
            }
            Err(error) => {
                if let Some(slice) = self.slices.get_mut(&conversation) {
                    slice.transcript.remove_pending(client_tag);
                }
                Err(error)
            }
        }
    }

    /// Optimistically flips the viewer's reaction and issues the matching
    /// remote write.
    ///
    /// A failed write is not rolled back locally; the authoritative event
    /// stream reconciles the flag either way.
    ///
    /// # Errors
    /// `NotAMember`, or `Transport` when the remote write fails.
    #[instrument(skip(self))]
    pub async fn toggle_reaction(
        &mut self,
        conversation: ConversationRef,
        message_id: Uuid,
        emoji: &str,
    ) -> EngineResult<()> {
        self.require_membership(conversation)?;

        let slice = self
            .slices
            .entry(conversation)
            .or_insert_with(|| Slice::new(conversation, &self.config));
        let now_member = slice.reactions.toggle(message_id, self.viewer, emoji);

        let write = if now_member {
            self.store.upsert_reaction(message_id, self.viewer, emoji).await
        } else {
            self.store.delete_reaction(message_id, self.viewer, emoji).await
        };
        write.map_err(|e| {
            warn!(%conversation, %message_id, error = %e, "reaction write failed");
            EngineError::Transport(e.to_string())
        })
    }

    /// Records that a confirmed message scrolled into the viewport, pushing
    /// a read marker remotely the first time each message is seen.
    pub async fn observe_visible(&mut self, conversation: ConversationRef, message_id: Uuid) {
        let Some(slice) = self.slices.get(&conversation) else {
            return;
        };
        let Some(entry) = slice
            .transcript
            .entries()
            .iter()
            .find(|entry| entry.server_id() == Some(message_id))
            .cloned()
        else {
            return;
        };

        if let Some(marker) = self
            .receipts
            .observe_visible(conversation, self.viewer, &entry)
        {
            if let Err(error) = self.store.upsert_read_marker(marker).await {
                // The local marker already advanced; the next observation
                // retries the push.
                warn!(%conversation, %error, "read marker push failed");
            }
            self.refresh_unread(conversation);
        }
    }

    /// Marks the whole conversation read as of now and zeroes its badge.
    /// Remote push failures degrade to a local-only marker.
    #[instrument(skip(self))]
    pub async fn mark_read(&mut self, conversation: ConversationRef) {
        if let Some(marker) =
            self.receipts
                .mark_conversation_read(conversation, self.viewer, Timestamp::now())
        {
            if let Err(error) = self.store.upsert_read_marker(marker).await {
                warn!(%conversation, %error, "read marker push failed");
            }
        }
        self.inbox.mark_read(conversation);
    }

    /// Publishes the viewer's own typing heartbeat on the selected
    /// conversation's presence channel. Failures degrade silently.
    pub async fn note_typing(&mut self, typing: bool) {
        let Some(conversation) = self.selected else {
            return;
        };
        self.publish_presence(conversation, PresenceStatus::Online, typing)
            .await;
    }

    /// Applies everything the change and presence streams have ready,
    /// without blocking. Call once per render pass.
    pub fn drain_events(&mut self, near_bottom: bool) -> ApplyOutcome {
        let mut outcome = ApplyOutcome {
            changed: false,
            scroll: ScrollHint::Preserve,
        };
        while let Ok(event) = self.events_rx.try_recv() {
            let applied = self.apply_event(event, near_bottom);
            if applied.changed {
                outcome = applied;
            }
        }

        let now = Timestamp::now();
        let mut presence_dirty = false;
        if let Some(rx) = &mut self.presence_rx {
            while let Ok(update) = rx.try_recv() {
                // The channel echoes our own heartbeats; the viewer never
                // shows up in their own typing row.
                if update.user_id == self.viewer {
                    continue;
                }
                let conversation = update.conversation;
                if let Some(slice) = self.slices.get_mut(&conversation) {
                    slice.roster.apply_update(&update);
                    presence_dirty = true;
                }
            }
        }
        if let Some(conversation) = self.selected
            && let Some(slice) = self.slices.get_mut(&conversation)
        {
            slice.roster.sweep(now);
            let typing = !slice.roster.typing_users(now).is_empty();
            self.inbox.set_typing(conversation, typing);
            if presence_dirty {
                outcome.changed = true;
            }
        }
        outcome
    }

    /// Applies one normalized change event to its conversation's slice.
    pub fn apply_event(&mut self, event: ChangeEvent, near_bottom: bool) -> ApplyOutcome {
        let conversation = event.conversation();
        let slice = self
            .slices
            .entry(conversation)
            .or_insert_with(|| Slice::new(conversation, &self.config));

        match &event {
            ChangeEvent::MessageInserted { payload } => {
                let applied = slice.transcript.insert(payload.clone(), near_bottom);
                if applied.changed {
                    self.inbox.apply(&event, self.viewer);
                }
                applied
            }
            ChangeEvent::MessageDeleted { payload } => {
                let changed = slice.transcript.delete(payload.message_id);
                if changed {
                    slice.reactions.purge(payload.message_id);
                    self.receipts.purge_message(payload.message_id);
                }
                ApplyOutcome {
                    changed,
                    scroll: ScrollHint::Preserve,
                }
            }
            ChangeEvent::ReactionAdded { payload } => {
                slice
                    .reactions
                    .apply_added(payload.message_id, payload.user_id, &payload.emoji);
                ApplyOutcome {
                    changed: true,
                    scroll: ScrollHint::Preserve,
                }
            }
            ChangeEvent::ReactionRemoved { payload } => {
                slice
                    .reactions
                    .apply_removed(payload.message_id, payload.user_id, &payload.emoji);
                ApplyOutcome {
                    changed: true,
                    scroll: ScrollHint::Preserve,
                }
            }
            ChangeEvent::ReadMarkerAdvanced { payload } => {
                self.receipts.apply_event(payload);
                self.inbox.apply(&event, self.viewer);
                ApplyOutcome {
                    changed: payload.user_id == self.viewer,
                    scroll: ScrollHint::Preserve,
                }
            }
        }
    }

    #[must_use]
    pub fn selected(&self) -> Option<ConversationRef> {
        self.selected
    }

    #[must_use]
    pub fn transcript(&self, conversation: ConversationRef) -> Option<&Transcript> {
        self.slices.get(&conversation).map(|s| &s.transcript)
    }

    /// Reaction summaries for one message, from the viewer's side.
    #[must_use]
    pub fn reactions(
        &self,
        conversation: ConversationRef,
        message_id: Uuid,
    ) -> Vec<ReactionSummary> {
        self.slices
            .get(&conversation)
            .map(|s| s.reactions.summaries(message_id, self.viewer))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn list_meta(&self, conversation: ConversationRef) -> Option<&shared::models::ListMeta> {
        self.inbox.meta(conversation)
    }

    /// All list rows, most recent activity first.
    #[must_use]
    pub fn list_rows(&self) -> Vec<(ConversationRef, &shared::models::ListMeta)> {
        self.inbox.rows()
    }

    /// Typing indicator text for the selected conversation.
    #[must_use]
    pub fn typing_label<F>(&self, display_name: F) -> Option<String>
    where
        F: Fn(Uuid) -> Option<String>,
    {
        let slice = self.slices.get(&self.selected?)?;
        slice.roster.typing_label(Timestamp::now(), display_name)
    }

    /// Whether a viewport `distance` entries above the tail still counts as
    /// "near the bottom" for the scroll-to-latest policy.
    #[must_use]
    pub fn is_near_bottom(&self, distance_from_bottom: usize) -> bool {
        distance_from_bottom <= self.config.near_bottom_threshold
    }

    fn require_membership(&self, conversation: ConversationRef) -> EngineResult<()> {
        if self.memberships.contains(&conversation) {
            Ok(())
        } else {
            Err(EngineError::NotAMember(conversation.to_string()))
        }
    }

    fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            reconnect_backoff: StdDuration::from_millis(self.config.reconnect_backoff_ms),
            resync_window: self.config.resync_window,
        }
    }

    /// Opens the change channel for a listed conversation, once. The guard
    /// lives until the session drops; de-selection does not close it.
    fn ensure_channel(&mut self, conversation: ConversationRef, since: Option<Timestamp>) {
        if self.guards.contains_key(&conversation) {
            return;
        }
        let guard = ChannelGuard::open(
            Arc::clone(&self.store),
            conversation,
            self.channel_settings(),
            since,
            self.events_tx.clone(),
        );
        self.guards.insert(conversation, guard);
    }

    /// Badge for one seeded row: foreign messages newer than the viewer's
    /// stored marker. Rows whose head is already read skip the fetch; a
    /// failed fetch degrades to an unknown-as-zero badge.
    async fn seeded_unread(
        &self,
        conversation: ConversationRef,
        head: Option<&Message>,
        read_up_to: Option<Timestamp>,
    ) -> i64 {
        let Some(head) = head else {
            return 0;
        };
        if read_up_to.is_some_and(|at| head.created_at <= at) {
            return 0;
        }
        match self
            .store
            .recent_messages(conversation, read_up_to, self.config.resync_window)
            .await
        {
            Ok(rows) => {
                let unseen = rows.iter().filter(|m| m.author_id != self.viewer).count();
                i64::try_from(unseen).unwrap_or(i64::MAX)
            }
            Err(error) => {
                warn!(%conversation, %error, "unread seed fetch failed");
                0
            }
        }
    }

    async fn publish_presence(
        &self,
        conversation: ConversationRef,
        status: PresenceStatus,
        typing: bool,
    ) {
        let update = PresenceUpdate {
            conversation,
            user_id: self.viewer,
            status,
            typing,
            last_seen_at: Timestamp::now(),
        };
        if let Err(error) = self.presence.track(update).await {
            warn!(%conversation, %error, "presence track failed");
        }
    }

    /// Recomputes the badge from the open transcript after a partial read.
    fn refresh_unread(&mut self, conversation: ConversationRef) {
        if let Some(slice) = self.slices.get(&conversation) {
            let count =
                self.receipts
                    .unread_count(conversation, self.viewer, slice.transcript.entries());
            self.inbox.set_unread(conversation, count);
        }
    }

    fn remembered_selection(&self) -> Option<ConversationRef> {
        match self.prefs.get(LAST_SELECTED_KEY) {
            Ok(value) => value
                .as_ref()
                .and_then(serde_json::Value::as_str)
                .and_then(|raw| raw.parse().ok()),
            Err(error) => {
                warn!(%error, "preference read failed");
                None
            }
        }
    }

    fn persist_selection(&self, conversation: ConversationRef) {
        if let Err(error) = self
            .prefs
            .set(LAST_SELECTED_KEY, json!(conversation.to_string()))
        {
            warn!(%conversation, %error, "preference write failed");
        }
    }
}

/// Seeding helper for tests and embedders that already hold messages.
impl ChatSession {
    /// Merges an out-of-band fetched message, e.g. from pagination.
    pub fn merge_message(&mut self, message: Message, near_bottom: bool) -> ApplyOutcome {
        self.apply_event(ChangeEvent::MessageInserted { payload: message }, near_bottom)
    }

    /// A visible entry by server id, for viewport bookkeeping.
    #[must_use]
    pub fn entry(
        &self,
        conversation: ConversationRef,
        message_id: Uuid,
    ) -> Option<&TranscriptEntry> {
        self.slices.get(&conversation).and_then(|slice| {
            slice
                .transcript
                .entries()
                .iter()
                .find(|entry| entry.server_id() == Some(message_id))
        })
    }
}
