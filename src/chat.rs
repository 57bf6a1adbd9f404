//! Chat references and their resolution
//!
//! A reference is whatever the user typed for `--orig`/`--dest`: a numeric
//! id, an `@username`, or a share link. It is normalised once with
//! [`extract_reference`], classified into a [`ChatTarget`] and then looked up
//! through a [`ChatService`].

use std::future::Future;
use std::sync::LazyLock;

use regex::Regex;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::backend::ChatService;
use crate::config::{BotIdentity, Mode, MAX_RESOLVE_ATTEMPTS};
use crate::error::{Error, Result};

/// Offset Telegram adds to channel ids in their "marked" (`-100...`) form.
pub const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.)?(?:t|telegram)\.(?:me|dog)/(?:(?:joinchat/|\+)(?P<invite>[\w-]+)|c/(?P<private>\d+)(?:/\d+)?|(?:s/)?(?P<username>\w+)(?:/\d+)?)/?(?:\?.*)?$",
    )
    .expect("link regex is valid")
});

static TG_RESOLVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^tg://resolve\?domain=(?P<username>\w+)").expect("tg:// regex is valid")
});

static CHANNEL_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-100\d+$").expect("channel id regex is valid"));
static USER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("user id regex is valid"));
static GROUP_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-\d+$").expect("group id regex is valid"));

/// Pull the username, invite token or private channel id out of a share link.
///
/// Anything that is not a recognised link is returned trimmed but otherwise
/// unchanged. Invite tokens come back as `+<token>`, private `t.me/c/<id>`
/// links as the marked id `-100<id>`. The output is never itself a link, so
/// applying the function twice gives the same result.
pub fn extract_reference(reference: &str) -> String {
    let reference = reference.trim();

    if let Some(caps) = LINK_RE.captures(reference) {
        if let Some(invite) = caps.name("invite") {
            return format!("+{}", invite.as_str());
        }
        if let Some(private) = caps.name("private") {
            return format!("-100{}", private.as_str());
        }
        if let Some(username) = caps.name("username") {
            return username.as_str().to_string();
        }
    }

    if let Some(caps) = TG_RESOLVE_RE.captures(reference) {
        if let Some(username) = caps.name("username") {
            return username.as_str().to_string();
        }
    }

    reference.to_string()
}

/// True for `-100<digits>`, `<digits>` and `-<digits>`.
pub fn is_id_form(reference: &str) -> bool {
    CHANNEL_ID_RE.is_match(reference)
        || USER_ID_RE.is_match(reference)
        || GROUP_ID_RE.is_match(reference)
}

/// A classified reference, ready for lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    /// Broadcast channel or supergroup, by its unmarked id.
    Channel(i64),
    /// User, bot or private chat.
    User(i64),
    /// Basic group, by its positive id.
    Group(i64),
    /// Public username (without `@`) or `+<invite token>`.
    Username(String),
}

impl ChatTarget {
    /// Classify a normalised reference.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(Error::InvalidArgument("empty chat reference".to_string()));
        }

        let parse_id = |digits: &str| {
            digits.parse::<i64>().map_err(|_| {
                Error::InvalidArgument(format!("chat id out of range: {}", reference))
            })
        };

        if CHANNEL_ID_RE.is_match(reference) {
            return Ok(ChatTarget::Channel(parse_id(&reference[4..])?));
        }
        if USER_ID_RE.is_match(reference) {
            return Ok(ChatTarget::User(parse_id(reference)?));
        }
        if GROUP_ID_RE.is_match(reference) {
            return Ok(ChatTarget::Group(parse_id(&reference[1..])?));
        }

        let username = reference.strip_prefix('@').unwrap_or(reference);
        if username.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "not a valid chat reference: {}",
                reference
            )));
        }
        Ok(ChatTarget::Username(username.to_string()))
    }

    /// The id in the signed form used for checkpoint file names.
    pub fn marked_id(&self) -> Option<i64> {
        match self {
            ChatTarget::Channel(id) => Some(mark_channel_id(*id)),
            ChatTarget::User(id) => Some(*id),
            ChatTarget::Group(id) => Some(-*id),
            ChatTarget::Username(_) => None,
        }
    }
}

pub fn mark_channel_id(id: i64) -> i64 {
    -(CHANNEL_ID_OFFSET + id)
}

/// A chat that exists and is reachable by the current account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChat {
    /// Marked id: positive for users, `-id` for basic groups, `-100id` for
    /// channels.
    pub id: i64,
    pub title: String,
    pub username: Option<String>,
}

impl ResolvedChat {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            username: None,
        }
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }
}

/// Source and destination of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPair {
    pub source: ResolvedChat,
    pub destination: ResolvedChat,
    /// Whether the destination was created during this resolution. Restart
    /// mode reuses such a destination instead of creating another one.
    pub created_destination: bool,
}

/// Run `op`, sleeping and retrying when the server asks us to back off.
///
/// Gives up after [`MAX_RESOLVE_ATTEMPTS`] rate-limited attempts and returns
/// the last rate-limit error.
pub async fn retry_rate_limited<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(Error::RateLimited { seconds }) if attempt < MAX_RESOLVE_ATTEMPTS => {
                warn!(what, attempt, seconds, "Rate limited, waiting before retry");
                sleep(Duration::from_secs(u64::from(seconds))).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Resolve one raw reference. Failures carry the raw reference.
pub async fn resolve_reference<S: ChatService>(service: &S, raw: &str) -> Result<ResolvedChat> {
    let target = ChatTarget::parse(&extract_reference(raw))?;
    retry_rate_limited(raw, || service.resolve(&target))
        .await
        .map_err(|e| e.for_reference(raw))
}

/// Resolve both endpoints of a run.
///
/// Without a destination reference a new channel titled
/// `"<source title>-clone"` is created. In bot mode the bot is then given
/// posting rights in both chats; failing to do so is only logged.
pub async fn resolve_pair<S: ChatService>(
    service: &S,
    source_ref: &str,
    destination_ref: Option<&str>,
    mode: Mode,
    bot: Option<&BotIdentity>,
) -> Result<ChatPair> {
    let source = resolve_reference(service, source_ref).await?;
    info!(id = source.id, title = %source.title, "Resolved origin chat");

    let (destination, created_destination) = match destination_ref {
        Some(raw) => (resolve_reference(service, raw).await?, false),
        None => {
            let title = format!("{}-clone", source.title);
            let created =
                retry_rate_limited("create destination", || service.create_channel(&title))
                    .await?;
            info!(id = created.id, title = %created.title, "Created destination chat");
            (created, true)
        }
    };
    info!(id = destination.id, title = %destination.title, "Resolved destination chat");

    if mode == Mode::Bot {
        match bot {
            Some(bot) => {
                for chat in [&source, &destination] {
                    if let Err(e) = service.promote_poster(chat, bot).await {
                        warn!(chat = chat.id, bot = bot.id, "Failed to promote bot: {}", e);
                    }
                }
            }
            None => info!("No bot id configured, skipping bot promotion"),
        }
    }

    Ok(ChatPair {
        source,
        destination,
        created_destination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_username_from_links() {
        assert_eq!(extract_reference("https://t.me/durov"), "durov");
        assert_eq!(extract_reference("http://telegram.me/some_chan/"), "some_chan");
        assert_eq!(extract_reference("t.me/some_chan/123"), "some_chan");
        assert_eq!(extract_reference("https://t.me/some_chan/123?single"), "some_chan");
        assert_eq!(extract_reference("tg://resolve?domain=durov"), "durov");
    }

    #[test]
    fn extracts_username_from_web_preview_links() {
        assert_eq!(extract_reference("https://t.me/s/durov"), "durov");
        assert_eq!(extract_reference("t.me/s/some_chan/123"), "some_chan");
        assert_eq!(extract_reference("https://t.me/s"), "s");
    }

    #[test]
    fn extracts_invite_tokens() {
        assert_eq!(extract_reference("https://t.me/+AbC-d_12"), "+AbC-d_12");
        assert_eq!(extract_reference("https://t.me/joinchat/AbCd12"), "+AbCd12");
    }

    #[test]
    fn extracts_private_channel_links() {
        assert_eq!(
            extract_reference("https://t.me/c/1234567890/55"),
            "-1001234567890"
        );
    }

    #[test]
    fn non_links_pass_through() {
        assert_eq!(extract_reference("@durov"), "@durov");
        assert_eq!(extract_reference("-1001234567890"), "-1001234567890");
        assert_eq!(extract_reference("  12345 "), "12345");
    }

    #[test]
    fn extract_reference_is_idempotent() {
        for input in [
            "https://t.me/durov",
            "https://t.me/+token",
            "https://t.me/joinchat/token",
            "https://t.me/c/123/4",
            "https://t.me/s/durov",
            "tg://resolve?domain=abc",
            "@someone",
            "-100123",
            "plain",
        ] {
            let once = extract_reference(input);
            assert_eq!(extract_reference(&once), once, "{input}");
        }
    }

    #[test]
    fn id_forms_are_recognised() {
        for reference in ["-1001234567890", "777000", "-4567", "0"] {
            assert!(is_id_form(reference), "{reference}");
        }
        for reference in ["@name", "name", "+token", "12a", "-", "--1", "1-2"] {
            assert!(!is_id_form(reference), "{reference}");
        }
    }

    #[test]
    fn parse_classifies_ids() {
        assert_eq!(
            ChatTarget::parse("-1001234567890").unwrap(),
            ChatTarget::Channel(1234567890)
        );
        assert_eq!(ChatTarget::parse("777000").unwrap(), ChatTarget::User(777000));
        assert_eq!(ChatTarget::parse("-4567").unwrap(), ChatTarget::Group(4567));
    }

    #[test]
    fn parse_strips_at_from_usernames() {
        assert_eq!(
            ChatTarget::parse("@durov").unwrap(),
            ChatTarget::Username("durov".into())
        );
        assert_eq!(
            ChatTarget::parse("+invite").unwrap(),
            ChatTarget::Username("+invite".into())
        );
    }

    #[test]
    fn parse_agrees_with_is_id_form() {
        for reference in ["-1001", "15", "-15", "abc", "@abc", "+x"] {
            let target = ChatTarget::parse(reference).unwrap();
            assert_eq!(target.marked_id().is_some(), is_id_form(reference), "{reference}");
        }
    }

    #[test]
    fn parse_rejects_empty_and_overflow() {
        assert!(matches!(ChatTarget::parse(""), Err(Error::InvalidArgument(_))));
        assert!(matches!(ChatTarget::parse("@"), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            ChatTarget::parse("99999999999999999999999"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn marked_ids_round_trip_through_parse() {
        for reference in ["-1001234567890", "777000", "-4567"] {
            let target = ChatTarget::parse(reference).unwrap();
            assert_eq!(target.marked_id().unwrap().to_string(), reference);
        }
        assert_eq!(ChatTarget::Username("x".into()).marked_id(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_sleeps_for_server_duration() {
        let start = tokio::time::Instant::now();
        let mut calls = 0;
        let result = retry_rate_limited("test", || {
            calls += 1;
            let outcome = if calls == 1 {
                Err(Error::RateLimited { seconds: 3 })
            } else {
                Ok(calls)
            };
            async move { outcome }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<()> = retry_rate_limited("test", || {
            calls += 1;
            async { Err(Error::RateLimited { seconds: 1 }) }
        })
        .await;

        assert_eq!(result.unwrap_err().rate_limit(), Some(1));
        assert_eq!(calls, MAX_RESOLVE_ATTEMPTS);
    }

    #[tokio::test]
    async fn retry_does_not_retry_other_errors() {
        let mut calls = 0;
        let result: Result<()> = retry_rate_limited("test", || {
            calls += 1;
            async { Err(Error::TelegramError("boom".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::TelegramError(_))));
        assert_eq!(calls, 1);
    }
}
