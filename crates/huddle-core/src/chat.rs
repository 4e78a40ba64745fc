use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};

use crate::auth::Identity;
use crate::errors::ChatError;
use crate::events::{ClientEvent, EventEmitter};
use crate::media::AudioClip;
use crate::store::{ChangeKind, CollectionPath, Document, DocumentStore};

/// Advisory client-side ceiling on an inlined image, checked against
/// the raw bytes before encoding. Not enforced server-side.
pub const IMAGE_MAX_BYTES: usize = 700_000;

/// Advisory ceiling on an inlined audio payload, checked against the
/// encoded data-URL. Not enforced server-side.
pub const AUDIO_MAX_PAYLOAD_BYTES: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
}

/// One chat message as observed through the room subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    /// UTF-8 text, or a base64 data-URL for image/audio kinds.
    pub content: String,
    pub author_uid: String,
    pub author_email: String,
    /// Server-assigned creation time.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MessageDoc {
    #[serde(rename = "type")]
    kind: MessageKind,
    content: String,
    uid: String,
    email: String,
}

/// Shared message log between the feed task and the service.
pub type MessageLog = Arc<Mutex<Vec<Message>>>;

/// Message send/receive for one room session.
pub struct ChatService {
    collection: CollectionPath,
    store: Arc<dyn DocumentStore>,
    emitter: EventEmitter,
    identity: watch::Receiver<Option<Identity>>,
    messages: MessageLog,
}

impl ChatService {
    pub(crate) fn new(
        collection: CollectionPath,
        store: Arc<dyn DocumentStore>,
        emitter: EventEmitter,
        identity: watch::Receiver<Option<Identity>>,
    ) -> Self {
        Self {
            collection,
            store,
            emitter,
            identity,
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Send a text message. Rejected synchronously when unauthenticated
    /// or empty after trimming; no state changes on rejection.
    pub async fn send_text(&self, text: &str) -> Result<(), ChatError> {
        let identity = self.require_identity()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.write(MessageKind::Text, text.to_string(), &identity).await
    }

    /// Send an image, inlined as a base64 data-URL.
    pub async fn send_image(&self, bytes: &[u8], mime: &str) -> Result<(), ChatError> {
        let identity = self.require_identity()?;
        if bytes.len() >= IMAGE_MAX_BYTES {
            return Err(ChatError::PayloadTooLarge {
                kind: "image",
                size: bytes.len(),
                max: IMAGE_MAX_BYTES,
            });
        }
        let content = format!("data:{mime};base64,{}", BASE64.encode(bytes));
        self.write(MessageKind::Image, content, &identity).await
    }

    /// Send a recorded voice clip, inlined as a base64 data-URL.
    pub async fn send_audio(&self, clip: &AudioClip) -> Result<(), ChatError> {
        let identity = self.require_identity()?;
        let content = format!("data:{};base64,{}", clip.mime, BASE64.encode(&clip.bytes));
        if content.len() >= AUDIO_MAX_PAYLOAD_BYTES {
            return Err(ChatError::PayloadTooLarge {
                kind: "audio",
                size: content.len(),
                max: AUDIO_MAX_PAYLOAD_BYTES,
            });
        }
        self.write(MessageKind::Audio, content, &identity).await
    }

    /// All messages observed so far, oldest first.
    pub async fn messages(&self) -> Vec<Message> {
        self.messages.lock().await.clone()
    }

    /// Start the room feed: replays history, then live additions.
    /// Own sends arrive through here too — there is no local echo.
    pub(crate) async fn start_feed(&self) -> tokio::task::JoinHandle<()> {
        let mut sub = self.store.watch_collection(&self.collection).await;
        let messages = self.messages.clone();
        let emitter = self.emitter.clone();
        tokio::spawn(async move {
            while let Some(change) = sub.next().await {
                if change.kind != ChangeKind::Added {
                    continue;
                }
                match Self::message_from_doc(&change.doc) {
                    Some(msg) => {
                        messages.lock().await.push(msg.clone());
                        emitter.emit(ClientEvent::MessageReceived(msg));
                    }
                    None => {
                        tracing::warn!("malformed message document {} skipped", change.doc.id);
                    }
                }
            }
        })
    }

    fn message_from_doc(doc: &Document) -> Option<Message> {
        let parsed: MessageDoc = serde_json::from_value(doc.fields.clone()).ok()?;
        Some(Message {
            id: doc.id.clone(),
            kind: parsed.kind,
            content: parsed.content,
            author_uid: parsed.uid,
            author_email: parsed.email,
            timestamp: doc.create_time,
        })
    }

    fn require_identity(&self) -> Result<Identity, ChatError> {
        self.identity.borrow().clone().ok_or(ChatError::NotSignedIn)
    }

    async fn write(
        &self,
        kind: MessageKind,
        content: String,
        identity: &Identity,
    ) -> Result<(), ChatError> {
        let doc = MessageDoc {
            kind,
            content,
            uid: identity.uid.clone(),
            email: identity.email.clone(),
        };
        let fields = serde_json::to_value(doc)
            .map_err(|e| crate::errors::StoreError::InvalidData(e.to_string()))?;
        self.store.add(&self.collection, fields).await?;
        Ok(())
    }
}
