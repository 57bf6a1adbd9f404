//! Telegram message forwarder
//!
//! Copies a range of messages from one chat to another:
//! - Resolves both chats from ids, usernames or links (creating the
//!   destination when none is given)
//! - Enumerates message ids with optional text search and kind filters
//! - Forwards them one by one at a rate-limited pace
//! - Keeps a per-pair checkpoint so interrupted runs can resume
//! - Optionally repeats every four hours to pick up new messages

pub mod backend;
pub mod chat;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod forward;
pub mod messages;
pub mod metrics;
pub mod runner;
pub mod session;
pub mod telegram;

// Re-export common types
pub use backend::{ChatService, ForwardService};
pub use chat::{ChatPair, ChatTarget, ResolvedChat};
pub use checkpoint::CheckpointStore;
pub use config::{BotIdentity, Mode, Settings};
pub use error::{Error, Result};
pub use forward::{ForwardReport, Forwarder};
pub use messages::{KindFilter, MediaKind, MessageInfo};
pub use runner::{run_forever, run_once, RunContext, RunOptions};
pub use session::{SessionKind, SessionLock, TelegramClient};
pub use telegram::TelegramBackend;
