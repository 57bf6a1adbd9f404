//! grammers-backed implementation of the chat and forward services

use std::collections::HashMap;
use std::sync::Mutex;

use grammers_client::types::peer::{Peer, User};
use grammers_client::Client;
use grammers_tl_types as tl;
use tracing::{debug, info};

use crate::backend::{ChatService, ForwardService};
use crate::chat::{mark_channel_id, ChatTarget, ResolvedChat, CHANNEL_ID_OFFSET};
use crate::config::BotIdentity;
use crate::error::{Error, Result};
use crate::messages::{MediaKind, MessageInfo};

/// Marked id of a raw chat: `-id` for basic groups, `-100id` for channels.
fn raw_chat_id(chat: &tl::enums::Chat) -> i64 {
    match chat {
        tl::enums::Chat::Empty(c) => -c.id,
        tl::enums::Chat::Chat(c) => -c.id,
        tl::enums::Chat::Forbidden(c) => -c.id,
        tl::enums::Chat::Channel(c) => mark_channel_id(c.id),
        tl::enums::Chat::ChannelForbidden(c) => mark_channel_id(c.id),
    }
}

/// Marked id of a peer, comparable with [`ChatTarget::marked_id`].
pub fn peer_id(peer: &Peer) -> i64 {
    match peer {
        Peer::User(user) => user.raw.id(),
        Peer::Channel(channel) => mark_channel_id(channel.raw.id),
        Peer::Group(group) => raw_chat_id(&group.raw),
    }
}

fn peer_title(peer: &Peer) -> String {
    match peer {
        Peer::User(user) => user.full_name(),
        Peer::Channel(channel) => channel.title().to_string(),
        Peer::Group(group) => group.title().unwrap_or("Group").to_string(),
    }
}

fn peer_username(peer: &Peer) -> Option<String> {
    match peer {
        Peer::User(user) => user.username().map(str::to_string),
        Peer::Channel(channel) => channel.raw.username.clone(),
        Peer::Group(group) => match &group.raw {
            tl::enums::Chat::Channel(c) => c.username.clone(),
            _ => None,
        },
    }
}

fn to_resolved(peer: &Peer) -> ResolvedChat {
    ResolvedChat::new(peer_id(peer), peer_title(peer)).with_username(peer_username(peer))
}

fn document_kind(media: &tl::types::MessageMediaDocument) -> MediaKind {
    let Some(tl::enums::Document::Document(doc)) = &media.document else {
        return MediaKind::Document;
    };

    let (mut sticker, mut animated, mut round, mut video, mut voice, mut audio) =
        (false, false, false, false, false, false);
    for attribute in &doc.attributes {
        match attribute {
            tl::enums::DocumentAttribute::Sticker(_) => sticker = true,
            tl::enums::DocumentAttribute::Animated => animated = true,
            tl::enums::DocumentAttribute::Video(v) => {
                if v.round_message {
                    round = true;
                } else {
                    video = true;
                }
            }
            tl::enums::DocumentAttribute::Audio(a) => {
                if a.voice {
                    voice = true;
                } else {
                    audio = true;
                }
            }
            _ => {}
        }
    }

    if sticker {
        MediaKind::Sticker
    } else if animated {
        MediaKind::Animation
    } else if round {
        MediaKind::VideoNote
    } else if video {
        MediaKind::Video
    } else if voice {
        MediaKind::Voice
    } else if audio {
        MediaKind::Audio
    } else {
        MediaKind::Document
    }
}

fn media_kind(media: &tl::enums::MessageMedia) -> Option<MediaKind> {
    use tl::enums::MessageMedia as M;
    match media {
        M::Photo(_) => Some(MediaKind::Photo),
        M::Document(d) => Some(document_kind(d)),
        M::Contact(_) => Some(MediaKind::Contact),
        M::Geo(_) | M::GeoLive(_) => Some(MediaKind::Location),
        M::Venue(_) => Some(MediaKind::Venue),
        M::Poll(_) => Some(MediaKind::Poll),
        M::Dice(_) => Some(MediaKind::Dice),
        M::WebPage(_) => Some(MediaKind::WebPage),
        M::Game(_) => Some(MediaKind::Game),
        M::Story(_) => Some(MediaKind::Story),
        M::Invoice(_) => Some(MediaKind::Invoice),
        M::Giveaway(_) | M::GiveawayResults(_) => Some(MediaKind::Giveaway),
        M::PaidMedia(_) => Some(MediaKind::PaidMedia),
        _ => None,
    }
}

/// Reduce a raw message to what enumeration needs.
pub fn describe_message(raw: &tl::enums::Message) -> MessageInfo {
    match raw {
        tl::enums::Message::Message(m) => {
            let media = m.media.as_ref().and_then(media_kind);
            let has_text = !m.message.is_empty()
                && matches!(media, None | Some(MediaKind::WebPage));
            MessageInfo {
                id: m.id,
                media,
                has_text,
                service: false,
            }
        }
        tl::enums::Message::Service(m) => MessageInfo::service(m.id),
        tl::enums::Message::Empty(m) => MessageInfo {
            id: m.id,
            media: None,
            has_text: false,
            service: false,
        },
    }
}

/// A logged-in account, user or bot, with a cache of peers it has seen.
pub struct TelegramBackend<'a> {
    client: &'a Client,
    is_bot: bool,
    peers: Mutex<HashMap<i64, Peer>>,
}

impl<'a> TelegramBackend<'a> {
    pub fn user(client: &'a Client) -> Self {
        Self {
            client,
            is_bot: false,
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn bot(client: &'a Client) -> Self {
        Self {
            client,
            is_bot: true,
            peers: Mutex::new(HashMap::new()),
        }
    }

    fn remember(&self, peer: &Peer) -> ResolvedChat {
        let resolved = to_resolved(peer);
        self.peers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(resolved.id, peer.clone());
        resolved
    }

    fn cached(&self, id: i64) -> Option<Peer> {
        self.peers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
    }

    /// Scan the account's dialogs for a peer with the given marked id.
    async fn find_in_dialogs(&self, marked_id: i64) -> Result<Option<Peer>> {
        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs.next().await? {
            if peer_id(&dialog.peer) == marked_id {
                return Ok(Some(dialog.peer.clone()));
            }
        }
        Ok(None)
    }

    async fn resolve_username(&self, username: &str) -> Result<Peer> {
        self.client
            .resolve_username(username)
            .await?
            .ok_or_else(|| Error::chat_not_found(username, "no chat with this username"))
    }

    /// Invite links only reveal the chat; the peer itself comes from dialogs.
    async fn resolve_invite(&self, token: &str) -> Result<Peer> {
        let request = tl::functions::messages::CheckChatInvite {
            hash: token.to_string(),
        };
        let chat = match self.client.invoke(&request).await? {
            tl::enums::ChatInvite::Already(already) => already.chat,
            tl::enums::ChatInvite::Peek(peek) => peek.chat,
            tl::enums::ChatInvite::Invite(_) => {
                return Err(Error::chat_not_found(
                    token,
                    "this account has not joined the invite's chat",
                ))
            }
        };
        let marked = raw_chat_id(&chat);
        self.find_in_dialogs(marked)
            .await?
            .ok_or_else(|| Error::chat_not_found(token, "invite chat is not in dialogs"))
    }

    /// Fetch a peer straight from its marked id.
    ///
    /// Bots cannot list dialogs, but they may ask for chats they belong to
    /// with a zero access hash.
    async fn fetch_by_id(&self, marked_id: i64) -> Result<Option<Peer>> {
        let chats = if marked_id <= -CHANNEL_ID_OFFSET {
            let request = tl::functions::channels::GetChannels {
                id: vec![tl::enums::InputChannel::Channel(tl::types::InputChannel {
                    channel_id: -marked_id - CHANNEL_ID_OFFSET,
                    access_hash: 0,
                })],
            };
            self.client.invoke(&request).await?
        } else if marked_id < 0 {
            let request = tl::functions::messages::GetChats {
                id: vec![-marked_id],
            };
            self.client.invoke(&request).await?
        } else {
            let request = tl::functions::users::GetUsers {
                id: vec![tl::enums::InputUser::User(tl::types::InputUser {
                    user_id: marked_id,
                    access_hash: 0,
                })],
            };
            let users = self.client.invoke(&request).await?;
            return Ok(users
                .into_iter()
                .map(|user| Peer::User(User::from_raw(user)))
                .find(|peer| peer_id(peer) == marked_id));
        };

        let chats = match chats {
            tl::enums::messages::Chats::Chats(chats) => chats.chats,
            tl::enums::messages::Chats::Slice(slice) => slice.chats,
        };
        Ok(chats
            .into_iter()
            .map(Peer::from_raw)
            .find(|peer| peer_id(peer) == marked_id))
    }

    /// Look a marked id up the way this kind of account can.
    async fn find_by_id(&self, marked_id: i64) -> Result<Option<Peer>> {
        if let Some(peer) = self.cached(marked_id) {
            return Ok(Some(peer));
        }
        let peer = if self.is_bot {
            match self.fetch_by_id(marked_id).await {
                Ok(peer) => peer,
                Err(Error::ChatNotFound { .. }) => None,
                Err(e) => return Err(e),
            }
        } else {
            self.find_in_dialogs(marked_id).await?
        };
        if let Some(peer) = &peer {
            self.remember(peer);
        }
        Ok(peer)
    }

    /// Peer for a chat resolved earlier, by this account or another one.
    async fn peer_for(&self, chat: &ResolvedChat) -> Result<Peer> {
        if let Some(peer) = self.find_by_id(chat.id).await? {
            return Ok(peer);
        }
        if let Some(username) = &chat.username {
            let peer = self.resolve_username(username).await?;
            self.remember(&peer);
            return Ok(peer);
        }
        let reason = if self.is_bot {
            "the bot is not a member of this chat"
        } else {
            "chat is not in dialogs"
        };
        Err(Error::chat_not_found(chat.id.to_string(), reason))
    }
}

impl ChatService for TelegramBackend<'_> {
    async fn resolve(&self, target: &ChatTarget) -> Result<ResolvedChat> {
        let peer = match target {
            ChatTarget::Username(name) => match name.strip_prefix('+') {
                Some(token) => self.resolve_invite(token).await?,
                None => self.resolve_username(name).await?,
            },
            _ => {
                let marked = target.marked_id().unwrap_or_default();
                self.find_by_id(marked)
                    .await?
                    .ok_or_else(|| Error::chat_not_found(marked.to_string(), "not reachable"))?
            }
        };
        let resolved = self.remember(&peer);
        debug!(id = resolved.id, title = %resolved.title, "Resolved chat");
        Ok(resolved)
    }

    async fn create_channel(&self, title: &str) -> Result<ResolvedChat> {
        let request = tl::functions::channels::CreateChannel {
            broadcast: true,
            megagroup: false,
            for_import: false,
            forum: false,
            title: title.to_string(),
            about: String::new(),
            geo_point: None,
            address: None,
            ttl_period: None,
        };
        let chats = match self.client.invoke(&request).await? {
            tl::enums::Updates::Updates(updates) => updates.chats,
            tl::enums::Updates::Combined(updates) => updates.chats,
            _ => Vec::new(),
        };
        let marked = chats
            .iter()
            .find(|chat| matches!(chat, tl::enums::Chat::Channel(_)))
            .map(raw_chat_id)
            .ok_or_else(|| Error::TelegramError("channel creation returned no channel".into()))?;

        let peer = self
            .find_in_dialogs(marked)
            .await?
            .ok_or_else(|| Error::chat_not_found(title, "created channel is not in dialogs"))?;
        info!(id = marked, title, "Created destination channel");
        Ok(self.remember(&peer))
    }

    async fn promote_poster(&self, chat: &ResolvedChat, bot: &BotIdentity) -> Result<()> {
        let chat_peer = self.peer_for(chat).await?;
        if matches!(chat_peer, Peer::User(_)) {
            return Err(Error::PermissionDenied(
                "admin rights cannot be granted in a private chat".to_string(),
            ));
        }

        let bot_peer = match &bot.username {
            Some(username) => self.resolve_username(username).await?,
            None => self
                .find_in_dialogs(bot.id)
                .await?
                .ok_or_else(|| Error::chat_not_found(bot.id.to_string(), "bot is not in dialogs"))?,
        };

        self.client
            .set_admin_rights(&chat_peer, &bot_peer)
            .post_messages(true)
            .await?;
        info!(chat = %chat.title, bot = bot.id, "Granted posting rights to bot");
        Ok(())
    }

    async fn message_count(&self, chat: &ResolvedChat) -> Result<usize> {
        let peer = self.peer_for(chat).await?;
        Ok(self.client.iter_messages(&peer).total().await?)
    }

    async fn history(&self, chat: &ResolvedChat) -> Result<Vec<MessageInfo>> {
        let peer = self.peer_for(chat).await?;
        let mut messages = self.client.iter_messages(&peer);
        let mut out = Vec::new();
        while let Some(message) = messages.next().await? {
            out.push(describe_message(&message.raw));
        }
        Ok(out)
    }

    async fn search(&self, chat: &ResolvedChat, query: &str) -> Result<Vec<MessageInfo>> {
        let peer = self.peer_for(chat).await?;
        let mut messages = self.client.search_messages(&peer).query(query);
        let mut out = Vec::new();
        while let Some(message) = messages.next().await? {
            out.push(describe_message(&message.raw));
        }
        Ok(out)
    }
}

impl ForwardService for TelegramBackend<'_> {
    async fn prepare(&self, source: &ResolvedChat, destination: &ResolvedChat) -> Result<()> {
        self.peer_for(source).await?;
        self.peer_for(destination).await?;
        debug!(source = source.id, destination = destination.id, "Both chats reachable");
        Ok(())
    }

    async fn forward(
        &self,
        source: &ResolvedChat,
        destination: &ResolvedChat,
        message_id: i32,
    ) -> Result<()> {
        let source_peer = self.peer_for(source).await?;
        let destination_peer = self.peer_for(destination).await?;

        let sent = self
            .client
            .forward_messages(&destination_peer, &[message_id], &source_peer)
            .await?;
        if sent.iter().all(Option::is_none) {
            return Err(Error::MessageGone(format!("message {} was not forwarded", message_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_chat_ids_are_marked() {
        let group = tl::enums::Chat::Empty(tl::types::ChatEmpty { id: 42 });
        assert_eq!(raw_chat_id(&group), -42);
    }

    #[test]
    fn unsupported_media_has_no_kind() {
        assert_eq!(media_kind(&tl::enums::MessageMedia::Empty), None);
        assert_eq!(media_kind(&tl::enums::MessageMedia::Unsupported), None);
    }
}
