//! Session management for the Telegram clients
//!
//! Provides:
//! - File-based session locking so two runs never share a session
//! - Connecting a client from a persistent SQLite session
//! - Interactive user login and bot-token login

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use grammers_client::client::updates::UpdatesLike;
use grammers_client::types::User;
use grammers_client::{Client, SignInError};
use grammers_mtsender::{SenderPool, SenderPoolHandle};
use grammers_session::storages::SqliteSession;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{Error, Result};

/// Which persistent session a client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    User,
    Bot,
}

impl SessionKind {
    pub fn name(&self) -> &'static str {
        match self {
            SessionKind::User => "user",
            SessionKind::Bot => "bot",
        }
    }

    pub fn session_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.session", self.name()))
    }

    pub fn lock_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.session.lock", self.name()))
    }
}

/// Session lock guard that ensures exclusive access to one session file.
pub struct SessionLock {
    path: PathBuf,
    lock_file: Option<File>,
}

impl SessionLock {
    /// Acquire an exclusive lock, failing fast if another process holds it.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::LockError(format!("Failed to open lock file: {}", e)))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                path,
                lock_file: Some(lock_file),
            }),
            Err(_) => {
                eprintln!(
                    "\n⚠️  The session behind '{}' is already used by another process.\n\
                     Wait for it to finish and try again.\n",
                    path.display()
                );
                Err(Error::SessionLocked(path.display().to_string()))
            }
        }
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(ref file) = self.lock_file {
            let _ = file.unlock();
        }
        if self.lock_file.take().is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Holder for SenderPool components and Client
pub struct TelegramClient {
    pub client: Client,
    _handle: SenderPoolHandle,
    _updates: mpsc::UnboundedReceiver<UpdatesLike>,
    _runner_handle: tokio::task::JoinHandle<()>,
}

impl TelegramClient {
    /// Open (or create) the session file and connect.
    pub async fn connect(session_file: &Path, api_id: i32) -> Result<Self> {
        let session = SqliteSession::open(session_file).map_err(|e| {
            Error::SessionNotFound(format!("{}: {}", session_file.display(), e))
        })?;
        let pool = SenderPool::new(Arc::new(session), api_id);

        // Create client from pool (need reference to whole pool)
        let client = Client::new(&pool);

        let SenderPool {
            runner,
            updates,
            handle,
        } = pool;

        let runner_handle = tokio::spawn(async move {
            runner.run().await;
        });

        Ok(Self {
            client,
            _handle: handle,
            _updates: updates,
            _runner_handle: runner_handle,
        })
    }
}

impl std::ops::Deref for TelegramClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// A connected client together with the lock on its session.
pub struct LockedClient {
    pub client: TelegramClient,
    _lock: SessionLock,
}

impl std::ops::Deref for LockedClient {
    type Target = TelegramClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// Lock and connect the session of the given kind.
pub async fn open(kind: SessionKind, dir: &Path, api_id: i32) -> Result<LockedClient> {
    std::fs::create_dir_all(dir)?;
    let lock = SessionLock::acquire(kind.lock_path(dir))?;
    let client = TelegramClient::connect(&kind.session_path(dir), api_id).await?;
    info!(session = kind.name(), "Connected to Telegram");
    Ok(LockedClient {
        client,
        _lock: lock,
    })
}

fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Make sure the user session is signed in, logging in interactively if not.
pub async fn ensure_user_login(client: &Client, api_hash: Option<&str>) -> Result<()> {
    if client.is_authorized().await? {
        return Ok(());
    }

    let api_hash = api_hash.ok_or_else(|| {
        Error::AuthorizationRequired(
            "user session is not signed in; pass --api-id and --api-hash to log in".to_string(),
        )
    })?;

    println!("🔐 The user session is not signed in yet.");
    let phone = prompt("Phone number (international format): ")?;
    let token = client
        .request_login_code(&phone, api_hash)
        .await
        .map_err(|e| Error::TelegramError(format!("Failed to request code: {}", e)))?;

    let code = prompt("Code received in Telegram: ")?;
    let user = match client.sign_in(&token, &code).await {
        Ok(user) => user,
        Err(SignInError::PasswordRequired(password_token)) => {
            let hint = password_token.hint().unwrap_or("none").to_string();
            let password = prompt(&format!("Two-step verification password (hint: {}): ", hint))?;
            client
                .check_password(password_token, password.as_bytes())
                .await
                .map_err(|e| Error::TelegramError(format!("Failed to sign in: {}", e)))?
        }
        Err(e) => return Err(Error::TelegramError(format!("Failed to sign in: {}", e))),
    };

    println!("✓ Signed in as {}", describe_user(&user));
    Ok(())
}

/// Sign the bot session in with a token unless it already is.
///
/// Returns the bot's username when a fresh sign-in happened.
pub async fn ensure_bot_login(
    client: &Client,
    token: Option<&str>,
    api_hash: Option<&str>,
) -> Result<Option<String>> {
    if client.is_authorized().await? {
        return Ok(None);
    }

    let (token, api_hash) = match (token, api_hash) {
        (Some(token), Some(api_hash)) => (token, api_hash),
        _ => {
            return Err(Error::AuthorizationRequired(
                "bot session is not signed in; pass --bot-token and --api-hash".to_string(),
            ))
        }
    };

    let user = client
        .bot_sign_in(token, api_hash)
        .await
        .map_err(|e| Error::TelegramError(format!("Failed to sign in bot: {}", e)))?;
    println!("✓ Bot signed in as {}", describe_user(&user));
    Ok(user.username().map(str::to_string))
}

fn describe_user(user: &User) -> String {
    match user.username() {
        Some(username) => format!("{} (@{})", user.full_name(), username),
        None => user.full_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn session_paths_are_named_by_kind() {
        let dir = Path::new("sessions");
        assert_eq!(
            SessionKind::User.session_path(dir),
            PathBuf::from("sessions/user.session")
        );
        assert_eq!(
            SessionKind::Bot.lock_path(dir),
            PathBuf::from("sessions/bot.session.lock")
        );
    }

    #[test]
    fn release_removes_lock_file() {
        let temp = tempdir().expect("tempdir");
        let path = SessionKind::User.lock_path(temp.path());

        let mut lock = SessionLock::acquire(&path).expect("lock");
        assert!(path.exists());
        lock.release();
        assert!(!path.exists());
    }

    #[test]
    fn lock_dropped_releases_automatically() {
        let temp = tempdir().expect("tempdir");
        let path = SessionKind::Bot.lock_path(temp.path());

        {
            let _lock = SessionLock::acquire(&path).expect("lock");
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn double_release_is_safe() {
        let temp = tempdir().expect("tempdir");
        let mut lock = SessionLock::acquire(SessionKind::User.lock_path(temp.path())).expect("lock");
        lock.release();
        lock.release();
    }

    #[test]
    fn user_and_bot_locks_are_independent() {
        let temp = tempdir().expect("tempdir");
        let user = SessionLock::acquire(SessionKind::User.lock_path(temp.path()));
        let bot = SessionLock::acquire(SessionKind::Bot.lock_path(temp.path()));
        assert!(user.is_ok());
        assert!(bot.is_ok());
    }

    #[test]
    fn acquire_fails_when_directory_missing() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("missing").join("user.session.lock");
        assert!(matches!(SessionLock::acquire(path), Err(Error::LockError(_))));
    }
}
