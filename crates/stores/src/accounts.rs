//! Account flat-file store
//!
//! Loads credential records from a `twitters.txt`-style file and keeps an
//! in-memory list the dispatcher selects from. Records are immutable after
//! load; `reload` replaces the whole list (the operator's only way to bring a
//! locked account back into rotation).
//!
//! Line format: `username:password:email:email_password:2fa:ct0:auth_token`.
//! The 2FA field may itself contain colons (`otpauth://` URIs), so everything
//! between the fourth field and the trailing token pair is re-joined before
//! normalization.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// One upstream account, immutable after load.
///
/// `username` is the identity every other subsystem keys on. Optional fields
/// are `None` when the source field was empty.
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub password: String,
    pub email: String,
    pub email_password: Option<String>,
    pub totp_secret: Option<String>,
    pub ct0: Option<String>,
    pub auth_token: Option<String>,
}

/// Debug output redacts credential material so accounts are safe to log.
impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("email", &self.email)
            .field("email_password", &self.email_password.as_ref().map(|_| "[REDACTED]"))
            .field("totp_secret", &self.totp_secret.as_ref().map(|_| "[REDACTED]"))
            .field("ct0", &self.ct0.as_ref().map(|_| "[REDACTED]"))
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Account {
    /// Parse one record line. Returns `None` for lines with fewer than 7
    /// colon-separated fields; callers decide whether to warn.
    pub fn parse_line(line: &str) -> Option<Account> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 7 {
            return None;
        }
        let n = fields.len();
        // Fields 4..n-2 re-joined: this is how otpauth:// URIs survive the split.
        let raw_twofa = fields[4..n - 2].join(":");
        Some(Account {
            username: fields[0].to_string(),
            password: fields[1].to_string(),
            email: fields[2].to_string(),
            email_password: non_empty(fields[3]),
            totp_secret: normalize_twofa(&raw_twofa),
            ct0: non_empty(fields[n - 2]),
            auth_token: non_empty(fields[n - 1]),
        })
    }

    /// Render the 7-field line shape. Round-trips through `parse_line` when
    /// the 2FA secret carries no colon.
    pub fn to_line(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.username,
            self.password,
            self.email,
            self.email_password.as_deref().unwrap_or(""),
            self.totp_secret.as_deref().unwrap_or(""),
            self.ct0.as_deref().unwrap_or(""),
            self.auth_token.as_deref().unwrap_or(""),
        )
    }
}

fn non_empty(field: &str) -> Option<String> {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Normalize a raw 2FA field: trim, and for `otpauth://` URIs keep only the
/// segment after the last `/`. Empty input means no 2FA.
fn normalize_twofa(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let secret = match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    };
    non_empty(secret)
}

/// Account file store. The list is replaced wholesale on reload.
pub struct AccountStore {
    path: PathBuf,
    accounts: RwLock<Vec<Account>>,
}

impl AccountStore {
    /// Load accounts from the given flat file.
    ///
    /// Blank lines and `#` comments are ignored. Lines with fewer than 7
    /// fields are skipped with a warning rather than failing the whole load.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let accounts = read_accounts(&path).await?;
        info!(path = %path.display(), accounts = accounts.len(), "loaded accounts");
        Ok(Self {
            path,
            accounts: RwLock::new(accounts),
        })
    }

    /// Re-read the backing file, replacing the in-memory list.
    ///
    /// Returns the new account count.
    pub async fn reload(&self) -> Result<usize> {
        let fresh = read_accounts(&self.path).await?;
        let count = fresh.len();
        *self.accounts.write().await = fresh;
        info!(path = %self.path.display(), accounts = count, "reloaded accounts");
        Ok(count)
    }

    /// Defensive copy of the current account list.
    pub async fn list(&self) -> Vec<Account> {
        self.accounts.read().await.clone()
    }

    /// Number of loaded accounts.
    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    /// Whether the store holds no accounts.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn read_accounts(path: &Path) -> Result<Vec<Account>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Io(format!("reading {}: {e}", path.display())))?;
    Ok(parse_contents(&contents))
}

fn parse_contents(contents: &str) -> Vec<Account> {
    let mut accounts = Vec::new();
    for (lineno, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Account::parse_line(line) {
            Some(account) => accounts.push(account),
            None => {
                warn!(line = lineno + 1, "skipping account line with fewer than 7 fields");
            }
        }
    }
    accounts
}
