//! Error types for the forwarder
//!
//! The variants double as the failure taxonomy: callers branch on them to
//! tell fatal conditions (an unresolvable chat) from recoverable ones
//! (rate limits, deleted messages, transient RPC failures).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Chat not found: {reference} ({reason})")]
    ChatNotFound { reference: String, reason: String },

    #[error("Rate limited, retry after {seconds}s")]
    RateLimited { seconds: u32 },

    #[error("Message no longer exists: {0}")]
    MessageGone(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Telegram API error: {0}")]
    TelegramError(String),

    #[error("Session file not found: {0}")]
    SessionNotFound(String),

    #[error("Session is locked by another process: {0}")]
    SessionLocked(String),

    #[error("Failed to acquire session lock: {0}")]
    LockError(String),

    #[error("Authorization required: {0}")]
    AuthorizationRequired(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a `ChatNotFound` for the raw reference the user typed.
    pub fn chat_not_found(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ChatNotFound {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Server-requested wait in seconds, if this is a rate-limit condition.
    pub fn rate_limit(&self) -> Option<u32> {
        match self {
            Error::RateLimited { seconds } => Some(*seconds),
            _ => None,
        }
    }

    /// Re-tag a lookup failure with the reference being resolved.
    ///
    /// Errors the backend already classified as "chat not found" get the raw
    /// reference attached; everything else passes through untouched.
    pub fn for_reference(self, reference: &str) -> Self {
        match self {
            Error::ChatNotFound { reason, .. } => Error::chat_not_found(reference, reason),
            other => other,
        }
    }
}

/// Map an RPC error name (as reported by Telegram) onto the taxonomy.
///
/// `value` is the numeric suffix Telegram appends to some errors, e.g. the
/// `420` in `FLOOD_WAIT_420`.
pub fn classify_rpc(name: &str, value: Option<u32>) -> Error {
    match name {
        "FLOOD_WAIT" | "FLOOD_PREMIUM_WAIT" | "SLOWMODE_WAIT" => Error::RateLimited {
            seconds: value.unwrap_or(1),
        },
        "MESSAGE_ID_INVALID" | "MESSAGE_IDS_EMPTY" | "MESSAGE_EMPTY" => {
            Error::MessageGone(name.to_string())
        }
        "CHAT_ADMIN_REQUIRED"
        | "USER_NOT_PARTICIPANT"
        | "RIGHT_FORBIDDEN"
        | "CHAT_WRITE_FORBIDDEN"
        | "CHAT_FORWARDS_RESTRICTED"
        | "ADMINS_TOO_MUCH"
        | "BOT_CHANNELS_NA"
        | "USER_PRIVACY_RESTRICTED" => Error::PermissionDenied(name.to_string()),
        "USERNAME_NOT_OCCUPIED"
        | "USERNAME_INVALID"
        | "PEER_ID_INVALID"
        | "CHANNEL_INVALID"
        | "CHANNEL_PRIVATE"
        | "CHAT_ID_INVALID"
        | "INVITE_HASH_EXPIRED"
        | "INVITE_HASH_INVALID"
        | "INVITE_HASH_EMPTY" => Error::chat_not_found(String::new(), name),
        _ => Error::TelegramError(match value {
            Some(v) => format!("{}_{}", name, v),
            None => name.to_string(),
        }),
    }
}

impl From<grammers_client::InvocationError> for Error {
    fn from(err: grammers_client::InvocationError) -> Self {
        match err {
            grammers_client::InvocationError::Rpc(rpc) => classify_rpc(&rpc.name, rpc.value),
            other => Error::TelegramError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<ini::Error> for Error {
    fn from(err: ini::Error) -> Self {
        Error::Config(err.to_string())
    }
}
