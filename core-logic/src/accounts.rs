//! Account, proxy and session-blob loading.

use crate::config::ProxyConfig;
use crate::utils::atomic_write;
use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Login secrets for one account. Wiped from memory on drop.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub password: String,
    pub session_id: Option<String>,
}

impl Credentials {
    pub fn new(password: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            password: password.into(),
            session_id,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &"***REDACTED***")
            .field(
                "session_id",
                &self.session_id.as_ref().map(|_| "***REDACTED***"),
            )
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    pub credentials: Credentials,
    pub proxy: Option<ProxyConfig>,
}

pub struct AccountLoader;

impl AccountLoader {
    /// Loads accounts from a text file.
    /// Format expected: `username:password` or `username:password:sessionid`
    pub fn load_accounts(path: impl AsRef<Path>) -> Result<Vec<Account>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read accounts from {}", path.display()))?;
        let accounts = Self::parse_accounts(&content);
        info!("Loaded {} accounts from {}", accounts.len(), path.display());
        Ok(accounts)
    }

    pub fn parse_accounts(content: &str) -> Vec<Account> {
        let mut accounts = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.splitn(3, ':');
            let username = parts.next().map(str::trim).unwrap_or_default();
            let Some(password) = parts.next().map(str::trim) else {
                warn!("Skipping invalid account line for '{}'", username);
                continue;
            };
            if username.is_empty() {
                warn!("Skipping account line with empty username");
                continue;
            }
            let session_id = parts
                .next()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);

            accounts.push(Account {
                username: username.to_string(),
                credentials: Credentials::new(password, session_id),
                proxy: None,
            });
        }
        accounts
    }

    /// Loads proxies, one per line. A missing file means no proxies.
    /// Accepts full URLs, `ip:port` and `ip:port:username:password`.
    pub fn load_proxies(path: impl AsRef<Path>) -> Result<Vec<ProxyConfig>> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("{} not found. Running without proxies.", path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let proxies: Vec<ProxyConfig> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let parsed = Self::parse_proxy(line);
                if parsed.is_none() {
                    warn!("Skipping invalid proxy line: {}", line);
                }
                parsed
            })
            .collect();

        info!("Loaded {} proxies from {}", proxies.len(), path.display());
        Ok(proxies)
    }

    pub fn parse_proxy(line: &str) -> Option<ProxyConfig> {
        if line.contains("://") {
            return Some(ProxyConfig {
                url: line.to_string(),
                username: None,
                password: None,
            });
        }

        let parts: Vec<&str> = line.split(':').collect();
        match parts.as_slice() {
            [host, port] => Some(ProxyConfig {
                url: format!("http://{}:{}", host, port),
                username: None,
                password: None,
            }),
            [host, port, user, pass, ..] => Some(ProxyConfig {
                url: format!("http://{}:{}", host, port),
                username: Some(user.to_string()),
                password: Some(pass.to_string()),
            }),
            _ => None,
        }
    }

    /// Give account `i` proxy `i`; accounts past the end of the list go direct.
    pub fn assign_proxies(accounts: &mut [Account], proxies: &[ProxyConfig]) {
        for (account, proxy) in accounts.iter_mut().zip(proxies) {
            account.proxy = Some(proxy.clone());
        }
        if proxies.len() < accounts.len() {
            debug!(
                "{} accounts run without a proxy",
                accounts.len() - proxies.len()
            );
        }
    }
}

/// Saved session blobs, one JSON file per handle.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, handle: &str) -> PathBuf {
        self.dir.join(format!("{}.json", handle))
    }

    pub fn load(&self, handle: &str) -> Result<Option<serde_json::Value>> {
        let path = self.path_for(handle);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session {}", path.display()))?;
        Ok(Some(value))
    }

    pub fn save(&self, handle: &str, session: &serde_json::Value) -> Result<()> {
        let path = self.path_for(handle);
        let json = serde_json::to_vec_pretty(session).context("Failed to serialize session")?;
        atomic_write(&path, &json)
            .with_context(|| format!("Failed to write session {}", path.display()))?;
        debug!("Saved session for {} to {}", handle, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_accounts_formats() {
        let accounts = AccountLoader::parse_accounts(
            "# Format: username:password\nalice:pw1\n\nbob:pw2:sess:with:colons\nbroken\n",
        );
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].username, "alice");
        assert_eq!(accounts[0].credentials.password, "pw1");
        assert!(accounts[0].credentials.session_id.is_none());
        assert_eq!(
            accounts[1].credentials.session_id.as_deref(),
            Some("sess:with:colons")
        );
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials::new("hunter2", Some("abc".into()));
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("abc"));
    }

    #[test]
    fn test_proxy_formats_and_assignment() {
        let with_auth = AccountLoader::parse_proxy("1.2.3.4:8080:u:p").unwrap();
        assert_eq!(with_auth.url, "http://1.2.3.4:8080");
        assert_eq!(with_auth.username.as_deref(), Some("u"));
        assert!(AccountLoader::parse_proxy("garbage").is_none());
        assert_eq!(
            AccountLoader::parse_proxy("socks5://h:1").unwrap().url,
            "socks5://h:1"
        );

        let mut accounts = AccountLoader::parse_accounts("a:1\nb:2\n");
        AccountLoader::assign_proxies(&mut accounts, &[with_auth.clone()]);
        assert_eq!(accounts[0].proxy.as_ref(), Some(&with_auth));
        assert!(accounts[1].proxy.is_none());
    }

    #[test]
    fn test_missing_proxy_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(AccountLoader::load_proxies(dir.path().join("proxies.txt"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_session_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));
        assert!(store.load("alice").unwrap().is_none());
        let blob = serde_json::json!({"cookies": {"sessionid": "x"}});
        store.save("alice", &blob).unwrap();
        assert_eq!(store.load("alice").unwrap(), Some(blob));
    }
}
