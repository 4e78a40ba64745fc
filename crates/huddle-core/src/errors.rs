use thiserror::Error;

/// Identity-service failures, mapped once from the vendor's string
/// error codes at the auth boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid email address")]
    InvalidEmail,
    #[error("user account disabled")]
    UserDisabled,
    #[error("user not found")]
    UserNotFound,
    #[error("incorrect password")]
    WrongPassword,
    #[error("email already in use")]
    EmailAlreadyInUse,
    #[error("password is too weak")]
    WeakPassword,
    #[error("auth service unavailable: {0}")]
    Unavailable(String),
    #[error("auth service error: {0}")]
    Service(String),
}

/// Document-store failures, mapped once from transport/status codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("document not found")]
    NotFound,
    #[error("document already exists")]
    AlreadyExists,
    #[error("query requires an index: {0}")]
    MissingIndex(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid document data: {0}")]
    InvalidData(String),
}

/// Capture-device failures. These abort the in-progress call or
/// recording attempt and restore the prior state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("media access denied")]
    PermissionDenied,
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture failed: {0}")]
    Capture(String),
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("invalid room code: {0}")]
    InvalidCode(String),
    #[error("room {0} not found")]
    NotFound(String),
    #[error("wrong room password")]
    WrongPassword,
    #[error("not signed in")]
    NotSignedIn,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("not signed in")]
    NotSignedIn,
    #[error("{kind} payload of {size} bytes exceeds the {max} byte ceiling")]
    PayloadTooLarge {
        kind: &'static str,
        size: usize,
        max: usize,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("not signed in")]
    NotSignedIn,
    #[error("a call is already active in this room session")]
    CallAlreadyActive,
    #[error("another caller holds the room's call slot")]
    RoomBusy,
    #[error("no incoming call to act on")]
    NoPendingOffer,
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
}
