//! Optimistic send buffer.
//!
//! `submit` shows the composed message immediately and reconciles later: the
//! pending entry is appended synchronously, then the attachment uploads and
//! the remote append run asynchronously. Success needs no follow-up — the
//! confirmed row retires the pending entry by client tag. Failure rolls the
//! pending entry back and hands the original draft back for retry.

use std::collections::HashSet;

use futures::future;
use metrics::counter;
use tracing::warn;
use uuid::Uuid;

use shared::models::{Attachment, ConversationRef, Message, NewMessage};

use crate::error::{EngineError, EngineResult};
use crate::store::{BlobStore, ChatStore};

/// A composed-but-unsent message as it exists in the compose box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub body: String,
    pub parent_id: Option<Uuid>,
    pub attachments: Vec<DraftAttachment>,
}

/// A file picked for upload, not yet a stable URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftAttachment {
    pub name: String,
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl Draft {
    /// A plain text draft.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            parent_id: None,
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty() && self.attachments.is_empty()
    }

    /// Re-entrancy key: two in-flight submits of the same text and files in
    /// the same conversation are one submit.
    fn fingerprint(&self) -> String {
        let mut key = self.body.clone();
        for attachment in &self.attachments {
            key.push('\u{1f}');
            key.push_str(&attachment.name);
        }
        key
    }
}

/// Tracks in-flight submits and runs the upload-then-append pipeline.
#[derive(Debug, Default)]
pub struct SendBuffer {
    in_flight: HashSet<(ConversationRef, String)>,
}

impl SendBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a draft and reserves its re-entrancy slot, returning the
    /// append request with a fresh client tag.
    ///
    /// # Errors
    /// `Validation` for an empty draft or a duplicate in-flight submit.
    pub fn begin(
        &mut self,
        conversation: ConversationRef,
        author_id: Uuid,
        draft: &Draft,
    ) -> EngineResult<NewMessage> {
        if draft.is_empty() {
            return Err(EngineError::Validation(
                "message needs text or an attachment".into(),
            ));
        }

        let key = (conversation, draft.fingerprint());
        if !self.in_flight.insert(key) {
            return Err(EngineError::Validation(
                "an identical send is already in flight".into(),
            ));
        }

        Ok(NewMessage {
            conversation,
            author_id,
            body: draft.body.clone(),
            parent_id: draft.parent_id,
            // Placeholders until upload; the store never sees these.
            attachments: draft
                .attachments
                .iter()
                .map(|a| Attachment {
                    url: String::new(),
                    mime: a.mime.clone(),
                    name: Some(a.name.clone()),
                })
                .collect(),
            client_tag: Uuid::new_v4(),
        })
    }

    /// Releases the re-entrancy slot once the submit settled either way.
    pub fn finish(&mut self, conversation: ConversationRef, draft: &Draft) {
        self.in_flight.remove(&(conversation, draft.fingerprint()));
    }

    /// Uploads attachments, then appends the message remotely.
    ///
    /// # Errors
    /// `SendFailed` carrying the original draft when the upload or the
    /// append is rejected; no pending entry survives a failure (the caller
    /// rolls it back with the same client tag).
    pub async fn perform(
        store: &dyn ChatStore,
        blobs: &dyn BlobStore,
        mut request: NewMessage,
        draft: &Draft,
    ) -> EngineResult<Message> {
        let uploads = draft.attachments.iter().map(|attachment| async move {
            let url = blobs
                .upload(&attachment.name, attachment.bytes.clone())
                .await
                .map_err(|err| {
                    warn!(name = %attachment.name, error = %err, "attachment upload failed");
                    err
                })?;
            Ok::<_, anyhow::Error>(Attachment {
                url,
                mime: attachment.mime.clone(),
                name: Some(attachment.name.clone()),
            })
        });
        match future::try_join_all(uploads).await {
            Ok(uploaded) => request.attachments = uploaded,
            Err(err) => {
                counter!("huddle_send_failures_total").increment(1);
                return Err(EngineError::SendFailed {
                    reason: format!("attachment upload failed: {err}"),
                    draft: draft.clone(),
                });
            }
        }

        match store.append_message(request).await {
            Ok(message) => Ok(message),
            Err(err) => {
                counter!("huddle_send_failures_total").increment(1);
                Err(EngineError::SendFailed {
                    reason: err.to_string(),
                    draft: draft.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockBlobStore, MockChatStore};
    use shared::models::Timestamp;

    fn conversation() -> ConversationRef {
        ConversationRef::direct(Uuid::new_v4())
    }

    #[test]
    fn empty_draft_is_rejected_before_any_io() {
        let mut buffer = SendBuffer::new();
        let result = buffer.begin(conversation(), Uuid::new_v4(), &Draft::text("   "));

        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn identical_in_flight_submit_is_rejected_until_finished() {
        let mut buffer = SendBuffer::new();
        let conversation = conversation();
        let author = Uuid::new_v4();
        let draft = Draft::text("hello");

        assert!(buffer.begin(conversation, author, &draft).is_ok());
        assert!(matches!(
            buffer.begin(conversation, author, &draft),
            Err(EngineError::Validation(_))
        ));

        buffer.finish(conversation, &draft);
        assert!(buffer.begin(conversation, author, &draft).is_ok());
    }

    #[test]
    fn same_text_in_other_conversation_is_allowed() {
        let mut buffer = SendBuffer::new();
        let author = Uuid::new_v4();
        let draft = Draft::text("hello");

        assert!(buffer.begin(conversation(), author, &draft).is_ok());
        assert!(buffer.begin(conversation(), author, &draft).is_ok());
    }

    #[tokio::test]
    async fn failed_upload_fails_whole_submit_with_draft() {
        let store = MockChatStore::new();
        let mut blobs = MockBlobStore::new();
        blobs
            .expect_upload()
            .returning(|_, _| Err(anyhow::anyhow!("bucket unavailable")));

        let draft = Draft {
            body: "with file".into(),
            parent_id: None,
            attachments: vec![DraftAttachment {
                name: "photo.jpg".into(),
                mime: Some("image/jpeg".into()),
                bytes: vec![1, 2, 3],
            }],
        };
        let mut buffer = SendBuffer::new();
        let request = buffer.begin(conversation(), Uuid::new_v4(), &draft).unwrap();

        let result = SendBuffer::perform(&store, &blobs, request, &draft).await;
        match result {
            Err(EngineError::SendFailed { draft: restored, .. }) => {
                assert_eq!(restored, draft);
            }
            other => panic!("expected SendFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn successful_send_echoes_client_tag() {
        let mut store = MockChatStore::new();
        store.expect_append_message().returning(|request| {
            Ok(Message {
                id: Uuid::new_v4(),
                conversation: request.conversation,
                author_id: request.author_id,
                body: request.body,
                created_at: Timestamp::now(),
                parent_id: request.parent_id,
                attachments: request.attachments,
                client_tag: Some(request.client_tag),
            })
        });
        let blobs = MockBlobStore::new();

        let draft = Draft::text("hello");
        let mut buffer = SendBuffer::new();
        let request = buffer.begin(conversation(), Uuid::new_v4(), &draft).unwrap();
        let tag = request.client_tag;

        let message = SendBuffer::perform(&store, &blobs, request, &draft)
            .await
            .unwrap();
        assert_eq!(message.client_tag, Some(tag));
    }
}
