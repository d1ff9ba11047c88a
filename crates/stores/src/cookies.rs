//! Cookie cache persistence
//!
//! Maps accounts to their last known-good session cookies in a JSON array
//! file. All writes use atomic temp-file + rename to prevent corruption on
//! crash, and a tokio Mutex serializes concurrent saves so the last writer
//! wins on whole-file rewrites.
//!
//! The cache is written through on every fresh authentication success, so a
//! restart can usually skip straight to step one of the auth ladder.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::accounts::Account;
use crate::error::{Error, Result};

/// One cache record. Credential fields ride along so the file is usable as a
/// standalone account export; `cookies` holds opaque cookie strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieEntry {
    pub username: String,
    pub password: String,
    pub email: String,
    pub twofa: String,
    pub cookies: Vec<String>,
}

/// Thread-safe cookie cache file manager.
///
/// The Mutex serializes all access. The in-memory `Vec` preserves the file's
/// array order; upserts replace in place so repeated saves with identical
/// state leave the file byte-identical.
pub struct CookieCache {
    path: PathBuf,
    state: Mutex<Vec<CookieEntry>>,
}

impl CookieCache {
    /// Load the cache from the given file path.
    ///
    /// A missing file is a cold start: the cache begins empty and the file is
    /// created as `[]` so later loads skip this path.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading cookie cache: {e}")))?;
            let entries: Vec<CookieEntry> = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing cookie cache: {e}")))?;
            info!(path = %path.display(), entries = entries.len(), "loaded cookie cache");
            entries
        } else {
            info!(path = %path.display(), "cookie cache not found, starting empty");
            let entries = Vec::new();
            write_atomic(&path, &entries).await?;
            entries
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// The cached cookie set for `username`, if any.
    pub async fn cookies_for(&self, username: &str) -> Option<Vec<String>> {
        let state = self.state.lock().await;
        state
            .iter()
            .find(|entry| entry.username == username)
            .map(|entry| entry.cookies.clone())
    }

    /// Upsert the cookie set for an account and rewrite the file.
    pub async fn save(&self, account: &Account, cookies: Vec<String>) -> Result<()> {
        let entry = CookieEntry {
            username: account.username.clone(),
            password: account.password.clone(),
            email: account.email.clone(),
            twofa: account.totp_secret.clone().unwrap_or_default(),
            cookies,
        };

        let mut state = self.state.lock().await;
        match state.iter_mut().find(|e| e.username == entry.username) {
            Some(existing) => *existing = entry,
            None => state.push(entry),
        }
        debug!(account = %account.username, "cached cookies");
        write_atomic(&self.path, &state).await
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Write the cache to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over the
/// target. Permissions are set to 0600 since the file contains live session
/// cookies.
async fn write_atomic(path: &Path, entries: &[CookieEntry]) -> Result<()> {
    let json = serde_json::to_string_pretty(entries)
        .map_err(|e| Error::Parse(format!("serializing cookie cache: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("cookie cache path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".cookies.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp cookie file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting cookie file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp cookie file: {e}")))?;

    debug!(path = %path.display(), "persisted cookie cache");
    Ok(())
}
