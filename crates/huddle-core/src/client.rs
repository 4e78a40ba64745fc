use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as TokioMutex;

use crate::auth::{AuthService, Identity};
use crate::config::ServiceConfig;
use crate::errors::{AuthError, RoomError, StoreError};
use crate::events::{ClientEvent, ClientEventListener, EventEmitter};
use crate::media::{MediaDevices, NullMediaDevices};
use crate::rooms::{RoomCode, RoomDoc, RoomInfo, RoomSession, rooms_collection};
use crate::screen::{Screen, ScreenController};
use crate::store::rest::RestStore;
use crate::store::DocumentStore;

/// Collision retries when minting a room code.
const CREATE_ROOM_ATTEMPTS: usize = 4;

/// The client: identity, screen state, and the current room session.
///
/// Each lifecycle phase is an explicit context value — the signed-in
/// identity lives in [`AuthService`], an active room in
/// [`RoomSession`], an active call in the session's `CallService` —
/// rather than ambient shared state.
pub struct Client {
    config: ServiceConfig,
    store: Arc<dyn DocumentStore>,
    media: Arc<dyn MediaDevices>,
    auth: AuthService,
    emitter: EventEmitter,
    screen: ScreenController,
    room: TokioMutex<Option<Arc<RoomSession>>>,
    display_name: StdMutex<Option<String>>,
}

impl Client {
    /// Client against the hosted backend, with no capture hardware
    /// wired up. Embedders supply a real [`MediaDevices`] via
    /// [`Client::with_backends`].
    pub fn new(config: ServiceConfig) -> Self {
        let store = Arc::new(RestStore::new(&config));
        Self::with_backends(config, store, Arc::new(NullMediaDevices::granting()))
    }

    pub fn with_backends(
        config: ServiceConfig,
        store: Arc<dyn DocumentStore>,
        media: Arc<dyn MediaDevices>,
    ) -> Self {
        let emitter = EventEmitter::new();
        let auth = AuthService::new(&config, emitter.clone());
        let screen = ScreenController::new(emitter.clone());
        Self {
            config,
            store,
            media,
            auth,
            emitter,
            screen,
            room: TokioMutex::new(None),
            display_name: StdMutex::new(None),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ClientEventListener>) {
        self.emitter.add_listener(listener);
    }

    pub fn screen(&self) -> &ScreenController {
        &self.screen
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    /// Display-name override used in call offers (settings-backed).
    pub fn set_display_name(&self, name: Option<String>) {
        *self.display_name.lock().unwrap() = name;
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let identity = self.auth.sign_up(email, password).await?;
        self.screen.apply_auth_state(Some(&identity));
        Ok(identity)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let identity = self.auth.sign_in(email, password).await?;
        self.screen.apply_auth_state(Some(&identity));
        Ok(identity)
    }

    /// Install a previously issued identity (session restore).
    pub fn restore_session(&self, identity: Identity) {
        self.auth.adopt_identity(identity.clone());
        self.screen.apply_auth_state(Some(&identity));
    }

    /// Sign out, leaving the current room first.
    pub async fn sign_out(&self) {
        self.leave_room().await;
        self.auth.sign_out();
        self.screen.apply_auth_state(None);
    }

    /// Create a room and join it. The code is minted locally and
    /// claimed with a conditional create, retrying on collision.
    pub async fn create_room(
        &self,
        name: &str,
        password: &str,
    ) -> Result<Arc<RoomSession>, RoomError> {
        let identity = self.auth.current().ok_or(RoomError::NotSignedIn)?;
        let name = {
            let trimmed = name.trim();
            if trimmed.is_empty() { "Unnamed Room" } else { trimmed }
        };
        let doc = RoomDoc {
            name: name.to_string(),
            password: password.trim().to_string(),
            created_by: identity.uid.clone(),
        };
        let fields = serde_json::to_value(&doc)
            .map_err(|e| RoomError::Store(StoreError::InvalidData(e.to_string())))?;

        for _ in 0..CREATE_ROOM_ATTEMPTS {
            let code = RoomCode::generate();
            match self
                .store
                .create(&rooms_collection().doc(code.as_str()), fields.clone())
                .await
            {
                Ok(()) => {
                    tracing::info!("room created: {code}");
                    return self.join_room(code.as_str(), password).await;
                }
                Err(StoreError::AlreadyExists) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(RoomError::Store(StoreError::AlreadyExists))
    }

    /// Join a room by code. The room password, when set, is
    /// plaintext-compared here and gates entry.
    pub async fn join_room(
        &self,
        code: &str,
        password: &str,
    ) -> Result<Arc<RoomSession>, RoomError> {
        if self.auth.current().is_none() {
            return Err(RoomError::NotSignedIn);
        }
        let code = RoomCode::parse(code)?;
        let path = rooms_collection().doc(code.as_str());
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| RoomError::NotFound(code.to_string()))?;
        let room: RoomDoc = serde_json::from_value(doc.fields)
            .map_err(|e| RoomError::Store(StoreError::InvalidData(e.to_string())))?;
        if !room.password.is_empty() && room.password != password.trim() {
            return Err(RoomError::WrongPassword);
        }

        // One room at a time.
        self.leave_room().await;

        let session = RoomSession::open(
            RoomInfo {
                code: code.clone(),
                name: room.name.clone(),
                created_by: room.created_by,
            },
            self.store.clone(),
            self.media.clone(),
            self.emitter.clone(),
            self.auth.watch(),
            self.display_name.lock().unwrap().clone(),
            self.config.ice_servers.clone(),
        )
        .await;

        *self.room.lock().await = Some(session.clone());
        tracing::info!("joined room {code}");
        self.emitter.emit(ClientEvent::RoomJoined {
            code: code.to_string(),
            name: room.name,
        });
        self.screen.show(Screen::Chat);
        Ok(session)
    }

    /// Leave the current room. A no-op when outside a room.
    pub async fn leave_room(&self) {
        let session = self.room.lock().await.take();
        let Some(session) = session else { return };

        session.close().await;
        tracing::info!("left room {}", session.code());
        self.emitter.emit(ClientEvent::RoomLeft {
            code: session.code().to_string(),
        });
        if self.auth.current().is_some() {
            self.screen.show(Screen::RoomList);
        }
    }

    pub async fn room(&self) -> Option<Arc<RoomSession>> {
        self.room.lock().await.clone()
    }
}
