//! Huddle client core.
//!
//! Room-based chat with 1:1 audio/video calls. Identity and document
//! state live in hosted backend services; call signaling reuses the
//! document store as a mailbox. Pure Rust crate with no platform
//! dependencies — capture backends and UI shells plug in from the
//! outside.

pub mod auth;
pub mod call;
pub mod chat;
pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod media;
pub mod rooms;
pub mod screen;
pub mod settings;
pub mod store;

pub use auth::Identity;
pub use call::{CallMedium, CallPhase, CallRole};
pub use chat::{Message, MessageKind};
pub use client::Client;
pub use config::ServiceConfig;
pub use errors::{AuthError, CallError, ChatError, MediaError, RoomError, StoreError};
pub use events::{ClientEvent, ClientEventListener};
pub use media::{AudioClip, AudioRecorder, MediaDevices, TrackKind};
pub use rooms::{RoomCode, RoomInfo, RoomSession};
pub use screen::Screen;
