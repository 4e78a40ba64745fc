use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::auth::Identity;
use crate::call::CallService;
use crate::chat::ChatService;
use crate::errors::RoomError;
use crate::events::EventEmitter;
use crate::media::MediaDevices;
use crate::store::{CollectionPath, DocumentStore};

/// Five characters from an alphabet without 0/O/1/I lookalikes.
/// Codes are random with no uniqueness guarantee; collisions are
/// handled at creation by retrying against the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    pub const LENGTH: usize = 5;
    pub const ALPHABET: &'static [u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..Self::LENGTH)
            .map(|_| Self::ALPHABET[rng.gen_range(0..Self::ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Validate user input. Trims and uppercases before checking
    /// length and alphabet membership.
    pub fn parse(input: &str) -> Result<Self, RoomError> {
        let code = input.trim().to_ascii_uppercase();
        if code.len() != Self::LENGTH {
            return Err(RoomError::InvalidCode(format!(
                "room code must be {} characters",
                Self::LENGTH
            )));
        }
        if !code.bytes().all(|b| Self::ALPHABET.contains(&b)) {
            return Err(RoomError::InvalidCode(format!(
                "room code contains characters outside the allowed alphabet: {code}"
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Room metadata as observed at join time.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub code: RoomCode,
    pub name: String,
    pub created_by: String,
}

/// Stored room document. The password is plaintext-compared at join.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RoomDoc {
    pub name: String,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "createdBy")]
    pub created_by: String,
}

pub(crate) fn rooms_collection() -> CollectionPath {
    CollectionPath::root("rooms")
}

/// Everything owned while inside one room: the message feed, the
/// message log, and the room's call slot. Dropped wholesale on leave
/// — an explicit session context rather than ambient shared state.
pub struct RoomSession {
    info: RoomInfo,
    chat: ChatService,
    calls: CallService,
    feed_task: StdMutex<Option<JoinHandle<()>>>,
}

impl RoomSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn open(
        info: RoomInfo,
        store: Arc<dyn DocumentStore>,
        media: Arc<dyn MediaDevices>,
        emitter: EventEmitter,
        identity: watch::Receiver<Option<Identity>>,
        display_name: Option<String>,
        ice_servers: Vec<String>,
    ) -> Arc<Self> {
        let messages = rooms_collection().doc(info.code.as_str()).collection("messages");
        let chat = ChatService::new(messages, store.clone(), emitter.clone(), identity.clone());
        let calls = CallService::new(
            &info.code,
            store,
            media,
            emitter,
            identity,
            display_name,
            ice_servers,
        );
        let session = Arc::new(Self {
            info,
            chat,
            calls,
            feed_task: StdMutex::new(None),
        });
        let feed = session.chat.start_feed().await;
        *session.feed_task.lock().unwrap() = Some(feed);
        session.calls.start_incoming_watch().await;
        session
    }

    pub fn info(&self) -> &RoomInfo {
        &self.info
    }

    pub fn code(&self) -> &RoomCode {
        &self.info.code
    }

    pub fn chat(&self) -> &ChatService {
        &self.chat
    }

    pub fn calls(&self) -> &CallService {
        &self.calls
    }

    /// Tear down the session: end any call, stop the feed. In-flight
    /// external writes are not cancelled.
    pub(crate) async fn close(&self) {
        self.calls.shutdown().await;
        if let Some(task) = self.feed_task.lock().unwrap().take() {
            task.abort();
        }
    }
}
