//! Message enumeration and selection
//!
//! Turns a chat history (or search result) into the ascending list of
//! message ids to forward: drop empty messages, apply the kind filter, sort,
//! skip what a previous run already sent, and cap the count.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::backend::ChatService;
use crate::chat::{retry_rate_limited, ResolvedChat};
use crate::config::{LARGE_CHAT_THRESHOLD, RECOMMENDED_DAILY_CAP};
use crate::error::Result;

/// Media attached to a message, named by its filter tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
    VideoNote,
    Animation,
    Audio,
    Voice,
    Document,
    Sticker,
    Contact,
    Location,
    Venue,
    Poll,
    Dice,
    WebPage,
    Game,
    Story,
    Invoice,
    Giveaway,
    PaidMedia,
}

impl MediaKind {
    pub const ALL: [MediaKind; 19] = [
        MediaKind::Photo,
        MediaKind::Video,
        MediaKind::VideoNote,
        MediaKind::Animation,
        MediaKind::Audio,
        MediaKind::Voice,
        MediaKind::Document,
        MediaKind::Sticker,
        MediaKind::Contact,
        MediaKind::Location,
        MediaKind::Venue,
        MediaKind::Poll,
        MediaKind::Dice,
        MediaKind::WebPage,
        MediaKind::Game,
        MediaKind::Story,
        MediaKind::Invoice,
        MediaKind::Giveaway,
        MediaKind::PaidMedia,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::VideoNote => "video_note",
            MediaKind::Animation => "animation",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice",
            MediaKind::Document => "document",
            MediaKind::Sticker => "sticker",
            MediaKind::Contact => "contact",
            MediaKind::Location => "location",
            MediaKind::Venue => "venue",
            MediaKind::Poll => "poll",
            MediaKind::Dice => "dice",
            MediaKind::WebPage => "web_page",
            MediaKind::Game => "game",
            MediaKind::Story => "story",
            MediaKind::Invoice => "invoice",
            MediaKind::Giveaway => "giveaway",
            MediaKind::PaidMedia => "paid_media",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_lowercase();
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

/// What the enumerator needs to know about one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    pub id: i32,
    pub media: Option<MediaKind>,
    /// Message body is plain text (possibly with a link preview).
    pub has_text: bool,
    /// Join/leave/pin and other service notices.
    pub service: bool,
}

impl MessageInfo {
    pub fn text(id: i32) -> Self {
        Self {
            id,
            media: None,
            has_text: true,
            service: false,
        }
    }

    pub fn media(id: i32, kind: MediaKind) -> Self {
        Self {
            id,
            media: Some(kind),
            has_text: false,
            service: false,
        }
    }

    pub fn service(id: i32) -> Self {
        Self {
            id,
            media: None,
            has_text: false,
            service: true,
        }
    }

    pub fn has_poll(&self) -> bool {
        self.media == Some(MediaKind::Poll)
    }

    /// Messages with nothing worth forwarding.
    pub fn is_empty(&self) -> bool {
        self.service
            || matches!(self.media, Some(MediaKind::Dice | MediaKind::Location))
            || (self.media.is_none() && !self.has_text)
    }
}

/// Set of lower-cased kind tags restricting which messages are forwarded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindFilter {
    tags: BTreeSet<String>,
}

impl KindFilter {
    /// Build from user-supplied tags. Returns `None` when no tag remains.
    pub fn from_tags<I, T>(tags: I) -> Option<Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let tags: BTreeSet<String> = tags
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        (!tags.is_empty()).then_some(Self { tags })
    }

    /// Parse a comma-separated list such as `"photo,Text,poll"`.
    pub fn parse(list: &str) -> Option<Self> {
        Self::from_tags(list.split(','))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Tags that match neither a media kind nor `text`.
    pub fn unknown_tags(&self) -> Vec<&str> {
        self.tags
            .iter()
            .map(String::as_str)
            .filter(|t| *t != "text" && MediaKind::from_tag(t).is_none())
            .collect()
    }

    /// Kept if its media kind is listed, or it is text and `text` is listed,
    /// or it carries a poll and `poll` is listed.
    pub fn matches(&self, message: &MessageInfo) -> bool {
        let media_match = message
            .media
            .map(|kind| self.contains(kind.tag()))
            .unwrap_or(false);
        media_match
            || (message.has_text && self.contains("text"))
            || (message.has_poll() && self.contains("poll"))
    }
}

/// Ascending, de-duplicated ids of the messages that pass the filters.
pub fn select_ids(
    messages: &[MessageInfo],
    filter: Option<&KindFilter>,
    drop_empty: bool,
) -> Vec<i32> {
    let mut ids: Vec<i32> = messages
        .iter()
        .filter(|m| !(drop_empty && m.is_empty()))
        .filter(|m| filter.map(|f| f.matches(m)).unwrap_or(true))
        .map(|m| m.id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Drop everything up to and including the greatest id `<= last_id`.
///
/// If no id in the list is `<= last_id` the list is returned unchanged.
/// `ids` must be ascending.
pub fn resume_after(ids: &[i32], last_id: i32) -> &[i32] {
    let cut = ids.partition_point(|&id| id <= last_id);
    &ids[cut..]
}

/// Keep at most `limit` ids; `0` means no limit.
pub fn apply_limit(ids: &[i32], limit: usize) -> &[i32] {
    if limit == 0 || limit >= ids.len() {
        ids
    } else {
        &ids[..limit]
    }
}

/// Message ids in `chat` that are candidates for forwarding, ascending.
///
/// An empty `query` walks the full history and skips empty messages; a
/// non-empty one uses server-side search.
pub async fn enumerate<S: ChatService>(
    service: &S,
    chat: &ResolvedChat,
    query: &str,
    filter: Option<&KindFilter>,
) -> Result<Vec<i32>> {
    let total = retry_rate_limited("count messages", || service.message_count(chat)).await?;
    if total > LARGE_CHAT_THRESHOLD {
        println!(
            "Warning: the origin chat contains {} messages.\n\
             It is recommended to forward up to {} messages per day.\n",
            total, RECOMMENDED_DAILY_CAP
        );
    }

    if let Some(filter) = filter {
        let unknown = filter.unknown_tags();
        if !unknown.is_empty() {
            warn!(?unknown, "Filter contains tags that match no message kind");
        }
    }

    println!("Getting messages...");
    let (messages, drop_empty) = if query.is_empty() {
        (
            retry_rate_limited("read history", || service.history(chat)).await?,
            true,
        )
    } else {
        (
            retry_rate_limited("search messages", || service.search(chat, query)).await?,
            false,
        )
    };

    let ids = select_ids(&messages, filter, drop_empty);
    info!(
        chat = chat.id,
        scanned = messages.len(),
        selected = ids.len(),
        "Enumerated messages"
    );
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for kind in MediaKind::ALL {
            assert_eq!(MediaKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(MediaKind::from_tag(" PHOTO "), Some(MediaKind::Photo));
        assert_eq!(MediaKind::from_tag("text"), None);
    }

    #[test]
    fn empty_messages() {
        assert!(MessageInfo::service(1).is_empty());
        assert!(MessageInfo::media(1, MediaKind::Dice).is_empty());
        assert!(MessageInfo::media(1, MediaKind::Location).is_empty());
        assert!(!MessageInfo::media(1, MediaKind::Venue).is_empty());
        assert!(!MessageInfo::text(1).is_empty());
        assert!(!MessageInfo::media(1, MediaKind::Photo).is_empty());
    }

    #[test]
    fn filter_parse_is_case_insensitive_and_trims() {
        let filter = KindFilter::parse(" Photo,TEXT ,, poll").unwrap();
        assert!(filter.contains("photo"));
        assert!(filter.contains("text"));
        assert!(filter.contains("poll"));
        assert!(KindFilter::parse(" , ").is_none());
        assert!(KindFilter::parse("").is_none());
    }

    #[test]
    fn filter_is_a_union() {
        let filter = KindFilter::parse("photo,text").unwrap();
        assert!(filter.matches(&MessageInfo::media(1, MediaKind::Photo)));
        assert!(filter.matches(&MessageInfo::text(2)));
        assert!(!filter.matches(&MessageInfo::media(3, MediaKind::Video)));
        assert!(!filter.matches(&MessageInfo::media(4, MediaKind::Poll)));
    }

    #[test]
    fn poll_tag_matches_polls() {
        let filter = KindFilter::parse("poll").unwrap();
        assert!(filter.matches(&MessageInfo::media(1, MediaKind::Poll)));
        assert!(!filter.matches(&MessageInfo::text(2)));
    }

    #[test]
    fn text_tag_matches_link_previews() {
        let filter = KindFilter::parse("text").unwrap();
        let preview = MessageInfo {
            id: 1,
            media: Some(MediaKind::WebPage),
            has_text: true,
            service: false,
        };
        assert!(filter.matches(&preview));
    }

    #[test]
    fn unknown_tags_are_reported() {
        let filter = KindFilter::parse("photo,text,gifs").unwrap();
        assert_eq!(filter.unknown_tags(), vec!["gifs"]);
    }

    #[test]
    fn select_sorts_ascending() {
        let messages = [
            MessageInfo::text(5),
            MessageInfo::text(2),
            MessageInfo::text(9),
        ];
        assert_eq!(select_ids(&messages, None, true), vec![2, 5, 9]);
    }

    #[test]
    fn select_drops_empty_only_when_asked() {
        let messages = [
            MessageInfo::text(3),
            MessageInfo::service(1),
            MessageInfo::media(2, MediaKind::Dice),
        ];
        assert_eq!(select_ids(&messages, None, true), vec![3]);
        assert_eq!(select_ids(&messages, None, false), vec![1, 2, 3]);
    }

    #[test]
    fn select_applies_filter_once_per_message() {
        let filter = KindFilter::parse("poll,text").unwrap();
        let messages = [
            MessageInfo::media(4, MediaKind::Poll),
            MessageInfo::text(1),
            MessageInfo::media(2, MediaKind::Photo),
        ];
        assert_eq!(select_ids(&messages, Some(&filter), true), vec![1, 4]);
    }

    #[test]
    fn resume_after_greatest_not_exceeding_checkpoint() {
        let ids = [2, 5, 9];
        assert_eq!(resume_after(&ids, 5), &[9]);
        assert_eq!(resume_after(&ids, 7), &[9]);
        assert_eq!(resume_after(&ids, 2), &[5, 9]);
        assert_eq!(resume_after(&ids, 9), &[] as &[i32]);
        assert_eq!(resume_after(&ids, 100), &[] as &[i32]);
    }

    #[test]
    fn resume_leaves_list_when_checkpoint_precedes_everything() {
        let ids = [2, 5, 9];
        assert_eq!(resume_after(&ids, 1), &[2, 5, 9]);
        assert_eq!(resume_after(&[], 1), &[] as &[i32]);
    }

    #[test]
    fn limit_zero_is_unbounded() {
        let ids = [2, 5, 9];
        assert_eq!(apply_limit(&ids, 0), &[2, 5, 9]);
        assert_eq!(apply_limit(&ids, 2), &[2, 5]);
        assert_eq!(apply_limit(&ids, 10), &[2, 5, 9]);
    }
}
