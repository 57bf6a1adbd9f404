//! Settings and constants
//!
//! Per-mode delays and the stored bot identity live in an ini-style
//! `config.ini` under a single `[default]` section. The file is created with
//! defaults on first run and read on every later run.

use std::path::Path;
use std::time::Duration;

use ini::Ini;
use tracing::info;

use crate::error::{Error, Result};

pub const CONFIG_FILE: &str = "config.ini";
pub const CHECKPOINT_DIR: &str = "posteds";
pub const SECTION: &str = "default";

pub const DEFAULT_USER_DELAY_SECONDS: f64 = 10.0;
pub const DEFAULT_BOT_DELAY_SECONDS: f64 = 5.0;

/// Wait between restart-mode iterations.
pub const RESTART_INTERVAL: Duration = Duration::from_secs(4 * 3600);

/// Above this many messages the enumerator prints a daily-cap advisory.
pub const LARGE_CHAT_THRESHOLD: usize = 25_000;
pub const RECOMMENDED_DAILY_CAP: usize = 1000;

/// Pause after a forward fails for a reason other than rate limiting.
pub const TRANSIENT_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Upper bound on lookups retried after a rate-limit wait.
pub const MAX_RESOLVE_ATTEMPTS: u32 = 5;

/// Which credential forwards the messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Mode {
    #[default]
    User,
    Bot,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::User => "user",
            Mode::Bot => "bot",
        }
    }
}

/// Bot account that gets posting rights in bot mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: i64,
    pub username: Option<String>,
}

/// Contents of `config.ini`.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bot_id: Option<i64>,
    pub bot_username: Option<String>,
    pub user_delay_seconds: f64,
    pub bot_delay_seconds: f64,
    pub api_id: Option<i32>,
    pub api_hash: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bot_id: None,
            bot_username: None,
            user_delay_seconds: DEFAULT_USER_DELAY_SECONDS,
            bot_delay_seconds: DEFAULT_BOT_DELAY_SECONDS,
            api_id: None,
            api_hash: None,
        }
    }
}

impl Settings {
    /// Read the config file, writing one with defaults if it does not exist.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let settings = Self::default();
            settings.save(path)?;
            info!(path = %path.display(), "Created default config");
            return Ok(settings);
        }
        Self::load(path)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let ini = Ini::load_from_file(path.as_ref())?;
        let section = ini
            .section(Some(SECTION))
            .ok_or_else(|| Error::Config(format!("missing [{}] section", SECTION)))?;

        let defaults = Self::default();
        Ok(Self {
            bot_id: parse_optional(section.get("bot_id"), "bot_id")?,
            bot_username: non_empty(section.get("bot_username")),
            user_delay_seconds: parse_delay(section.get("user_delay_seconds"), "user_delay_seconds")?
                .unwrap_or(defaults.user_delay_seconds),
            bot_delay_seconds: parse_delay(section.get("bot_delay_seconds"), "bot_delay_seconds")?
                .unwrap_or(defaults.bot_delay_seconds),
            api_id: parse_optional(section.get("api_id"), "api_id")?,
            api_hash: non_empty(section.get("api_hash")),
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut ini = Ini::new();
        ini.with_section(Some(SECTION))
            .set("bot_id", optional_to_string(self.bot_id))
            .set("user_delay_seconds", self.user_delay_seconds.to_string())
            .set("bot_delay_seconds", self.bot_delay_seconds.to_string());
        if let Some(username) = &self.bot_username {
            ini.with_section(Some(SECTION))
                .set("bot_username", username.as_str());
        }
        if let Some(api_id) = self.api_id {
            ini.with_section(Some(SECTION))
                .set("api_id", api_id.to_string());
        }
        if let Some(api_hash) = &self.api_hash {
            ini.with_section(Some(SECTION))
                .set("api_hash", api_hash.as_str());
        }
        ini.write_to_file(path.as_ref())?;
        Ok(())
    }

    /// Inter-message delay for the given mode.
    pub fn delay_for(&self, mode: Mode) -> Duration {
        let secs = match mode {
            Mode::User => self.user_delay_seconds,
            Mode::Bot => self.bot_delay_seconds,
        };
        Duration::from_secs_f64(secs)
    }

    pub fn bot(&self) -> Option<BotIdentity> {
        self.bot_id.map(|id| BotIdentity {
            id,
            username: self.bot_username.clone(),
        })
    }
}

/// Bot user id is the numeric prefix of the token (`123456:ABC...`).
pub fn bot_id_from_token(token: &str) -> Option<i64> {
    token.split_once(':').and_then(|(id, _)| id.parse().ok())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("none"))
        .map(str::to_string)
}

fn parse_optional<T: std::str::FromStr>(value: Option<&str>, key: &str) -> Result<Option<T>> {
    match non_empty(value) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", key, v))),
    }
}

fn parse_delay(value: Option<&str>, key: &str) -> Result<Option<f64>> {
    let delay: Option<f64> = parse_optional(value, key)?;
    match delay {
        Some(d) if !d.is_finite() || d < 0.0 => Err(Error::Config(format!(
            "{} must be a non-negative number of seconds",
            key
        ))),
        other => Ok(other),
    }
}

fn optional_to_string<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_default_file_on_first_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let settings = Settings::load_or_create(&path).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(path.exists());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[default]"));
        assert!(content.contains("bot_id=none"));
    }

    #[test]
    fn reads_colon_separated_legacy_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "[default]\nbot_id:123456\nuser_delay_seconds:12\nbot_delay_seconds:2.5\n",
        )
        .unwrap();

        let settings = Settings::load_or_create(&path).unwrap();
        assert_eq!(settings.bot_id, Some(123456));
        assert_eq!(settings.delay_for(Mode::User), Duration::from_secs(12));
        assert_eq!(settings.delay_for(Mode::Bot), Duration::from_millis(2500));
    }

    #[test]
    fn bot_id_none_means_no_bot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[default]\nbot_id=none\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert!(settings.bot().is_none());
        assert_eq!(settings.user_delay_seconds, DEFAULT_USER_DELAY_SECONDS);
    }

    #[test]
    fn save_then_load_keeps_credentials() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let settings = Settings {
            bot_id: Some(42),
            bot_username: Some("forward_bot".into()),
            api_id: Some(1234),
            api_hash: Some("abcdef".into()),
            ..Settings::default()
        };
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(
            loaded.bot(),
            Some(BotIdentity {
                id: 42,
                username: Some("forward_bot".into())
            })
        );
    }

    #[test]
    fn rejects_non_numeric_delay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[default]\nuser_delay_seconds=soon\n").unwrap();

        let err = Settings::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("user_delay_seconds")));
    }

    #[test]
    fn rejects_negative_delay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[default]\nbot_delay_seconds=-1\n").unwrap();

        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn missing_section_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[other]\nbot_id=1\n").unwrap();

        assert!(matches!(Settings::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn bot_id_is_token_prefix() {
        assert_eq!(bot_id_from_token("123456:AAE-secret"), Some(123456));
        assert_eq!(bot_id_from_token("no-colon"), None);
        assert_eq!(bot_id_from_token("abc:def"), None);
    }

    #[test]
    fn mode_names() {
        assert_eq!(Mode::default(), Mode::User);
        assert_eq!(Mode::User.as_str(), "user");
        assert_eq!(Mode::Bot.as_str(), "bot");
    }
}
