//! Remote change subscription with reconnect and gap repair.
//!
//! One conversation gets one channel. The reader task forwards normalized
//! [`ChangeEvent`]s to the session and reconnects with capped exponential
//! backoff when the push stream drops. Every successful connect replays the
//! message window past the current watermark as synthetic inserts: on the
//! first connect that covers rows committed between the caller's snapshot
//! query and the subscription coming up, afterwards it covers network gaps.
//! Replays reach the same idempotent apply path as live events. Subscription
//! failures degrade to a stale-but-usable transcript and never surface as
//! errors.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shared::models::{ChangeEvent, ConversationRef, Timestamp};

use crate::store::ChatStore;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Tuning knobs for one channel, derived from `SyncConfig`.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings {
    /// Initial delay before a reconnect attempt; doubles per failure.
    pub reconnect_backoff: Duration,
    /// How many recent messages to replay after a reconnect.
    pub resync_window: u32,
}

/// Handle owning one conversation's reader task.
///
/// Dropping the guard cancels the task, so switching conversations cannot
/// leak a subscription: the previous channel is torn down before the next
/// one opens.
#[derive(Debug)]
pub struct ChannelGuard {
    conversation: ConversationRef,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

impl ChannelGuard {
    /// Spawns the reader task for `conversation`, forwarding events into
    /// `events`.
    ///
    /// `since` is the newest row the caller already holds (e.g. the head
    /// from the list seed query); the first resync replays only what landed
    /// after it. `None` replays the whole recent window, which the
    /// transcript deduplicates.
    pub fn open(
        store: Arc<dyn ChatStore>,
        conversation: ConversationRef,
        settings: ChannelSettings,
        since: Option<Timestamp>,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let reader = tokio::spawn(async move {
            run_channel(store, conversation, settings, since, events, task_cancel).await;
        });
        info!(%conversation, "change channel opened");

        Self {
            conversation,
            cancel,
            reader,
        }
    }

    #[must_use]
    pub fn conversation(&self) -> ConversationRef {
        self.conversation
    }

    /// Explicit teardown; equivalent to dropping the guard.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.reader.abort();
        debug!(conversation = %self.conversation, "change channel closed");
    }
}

async fn run_channel(
    store: Arc<dyn ChatStore>,
    conversation: ConversationRef,
    settings: ChannelSettings,
    since: Option<Timestamp>,
    events: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
) {
    let mut last_seen = since;
    let mut backoff = settings.reconnect_backoff;
    let mut connected_before = false;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let mut stream = match store.subscribe(conversation).await {
            Ok(stream) => stream,
            Err(error) => {
                warn!(%conversation, %error, "subscribe failed, retrying");
                if wait_or_cancelled(&cancel, backoff).await {
                    return;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };
        backoff = settings.reconnect_backoff;

        if connected_before {
            counter!("huddle_channel_reconnects_total").increment(1);
        }
        connected_before = true;

        // Anything committed after the watermark but before this subscribe
        // would otherwise be lost until the next event for the same row.
        if resync(&*store, conversation, settings, &mut last_seen, &events).await {
            return;
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                event = stream.recv() => match event {
                    Some(event) => {
                        if let ChangeEvent::MessageInserted { payload } = &event
                            && last_seen.is_none_or(|seen| payload.created_at > seen)
                        {
                            last_seen = Some(payload.created_at);
                        }
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        warn!(%conversation, "change stream dropped, reconnecting");
                        break;
                    }
                },
            }
        }

        if wait_or_cancelled(&cancel, backoff).await {
            return;
        }
    }
}

/// Replays a recent window as synthetic inserts to cover the gap, advancing
/// the watermark past the replayed rows. Returns true when the session side
/// is gone and the task should stop.
async fn resync(
    store: &dyn ChatStore,
    conversation: ConversationRef,
    settings: ChannelSettings,
    last_seen: &mut Option<Timestamp>,
    events: &mpsc::Sender<ChangeEvent>,
) -> bool {
    match store
        .recent_messages(conversation, *last_seen, settings.resync_window)
        .await
    {
        Ok(messages) => {
            counter!("huddle_resyncs_total").increment(1);
            debug!(%conversation, replayed = messages.len(), "resync window replayed");
            for message in messages {
                if last_seen.is_none_or(|seen| message.created_at > seen) {
                    *last_seen = Some(message.created_at);
                }
                let event = ChangeEvent::MessageInserted { payload: message };
                if events.send(event).await.is_err() {
                    return true;
                }
            }
            false
        }
        Err(error) => {
            // Stale transcript until the next event or reconnect; no error
            // reaches the caller.
            warn!(%conversation, %error, "resync fetch failed");
            false
        }
    }
}

async fn wait_or_cancelled(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(delay) => false,
    }
}
