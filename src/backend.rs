//! Capabilities the forwarder needs from a messaging client
//!
//! The pipeline only talks to these traits. `telegram::TelegramBackend`
//! implements them on top of grammers; tests use in-memory fakes.

#![allow(async_fn_in_trait)]

use crate::chat::{ChatTarget, ResolvedChat};
use crate::config::BotIdentity;
use crate::error::Result;
use crate::messages::MessageInfo;

/// Lookup side: resolving chats and listing their messages.
pub trait ChatService {
    /// Find an existing chat. Unknown or inaccessible chats are
    /// `Error::ChatNotFound`.
    async fn resolve(&self, target: &ChatTarget) -> Result<ResolvedChat>;

    /// Create a new broadcast channel owned by the current account.
    async fn create_channel(&self, title: &str) -> Result<ResolvedChat>;

    /// Give `bot` the right to post messages in `chat`.
    async fn promote_poster(&self, chat: &ResolvedChat, bot: &BotIdentity) -> Result<()>;

    /// Total number of messages in the chat history.
    async fn message_count(&self, chat: &ResolvedChat) -> Result<usize>;

    /// Every message in the chat, in whatever order the server returns.
    async fn history(&self, chat: &ResolvedChat) -> Result<Vec<MessageInfo>>;

    /// Messages matching a server-side text search.
    async fn search(&self, chat: &ResolvedChat, query: &str) -> Result<Vec<MessageInfo>>;
}

/// Sending side: forwarding one message at a time.
pub trait ForwardService {
    /// Check that this account can reach both chats before a batch starts.
    /// An unreachable chat is `Error::ChatNotFound`.
    async fn prepare(&self, _source: &ResolvedChat, _destination: &ResolvedChat) -> Result<()> {
        Ok(())
    }

    async fn forward(
        &self,
        source: &ResolvedChat,
        destination: &ResolvedChat,
        message_id: i32,
    ) -> Result<()>;
}
