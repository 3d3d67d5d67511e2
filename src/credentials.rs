//! API keys, stored in `secrets.toml` next to the config file.
//!
//! The store owns a `watch` channel; the model client and the search provider
//! hold a [`CredentialHandle`] and read the current value at call time, so a
//! key saved from settings takes effect on the next request (last write wins).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKey {
    Gemini,
    Search,
}

impl CredentialKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKey::Gemini => "GEMINI_API_KEY",
            CredentialKey::Search => "SEARCH_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "GEMINI_API_KEY", default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    #[serde(rename = "SEARCH_API_KEY", default, skip_serializing_if = "Option::is_none")]
    pub search_api_key: Option<String>,
}

impl Credentials {
    pub fn get(&self, key: CredentialKey) -> Option<&str> {
        let value = match key {
            CredentialKey::Gemini => self.gemini_api_key.as_deref(),
            CredentialKey::Search => self.search_api_key.as_deref(),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    fn set(&mut self, key: CredentialKey, value: String) {
        match key {
            CredentialKey::Gemini => self.gemini_api_key = Some(value),
            CredentialKey::Search => self.search_api_key = Some(value),
        }
    }

    fn apply_env_overrides(&mut self) {
        for key in [CredentialKey::Gemini, CredentialKey::Search] {
            if let Ok(value) = std::env::var(key.as_str()) {
                let value = value.trim();
                if !value.is_empty() {
                    self.set(key, value.to_string());
                }
            }
        }
    }
}

/// Read side of the store.
#[derive(Debug, Clone)]
pub struct CredentialHandle {
    rx: watch::Receiver<Credentials>,
}

impl CredentialHandle {
    pub fn get(&self, key: CredentialKey) -> Option<String> {
        self.rx.borrow().get(key).map(str::to_owned)
    }
}

pub struct CredentialStore {
    path: Option<PathBuf>,
    tx: watch::Sender<Credentials>,
}

impl CredentialStore {
    /// Loads `path` (if present) and applies environment overrides.
    pub fn load(path: PathBuf) -> Result<Self> {
        let mut credentials = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match toml::from_str::<Credentials>(&contents) {
                Ok(c) => c,
                Err(e) => {
                    warn!("Ignoring malformed {}: {}", path.display(), e);
                    Credentials::default()
                }
            }
        } else {
            Credentials::default()
        };
        credentials.apply_env_overrides();

        let (tx, _rx) = watch::channel(credentials);
        Ok(Self { path: Some(path), tx })
    }

    /// A store that never touches disk.
    pub fn in_memory(credentials: Credentials) -> Self {
        let (tx, _rx) = watch::channel(credentials);
        Self { path: None, tx }
    }

    pub fn handle(&self) -> CredentialHandle {
        CredentialHandle { rx: self.tx.subscribe() }
    }

    pub fn has(&self, key: CredentialKey) -> bool {
        self.tx.borrow().get(key).is_some()
    }

    /// Trims and stores `value`, broadcasting it before writing the file.
    pub fn save(&self, key: CredentialKey, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            bail!("Please enter an API key");
        }

        self.tx.send_modify(|c| c.set(key, value.to_string()));
        info!("Saved {}", key.as_str());

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let serialized = toml::to_string_pretty(&*self.tx.borrow())?;
            fs::write(path, serialized)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_sees_saved_key() {
        let store = CredentialStore::in_memory(Credentials::default());
        let handle = store.handle();
        assert_eq!(handle.get(CredentialKey::Gemini), None);

        store.save(CredentialKey::Gemini, "  abc123  ").unwrap();
        assert_eq!(handle.get(CredentialKey::Gemini), Some("abc123".to_string()));
        assert!(store.has(CredentialKey::Gemini));
        assert!(!store.has(CredentialKey::Search));
    }

    #[test]
    fn test_empty_key_rejected() {
        let store = CredentialStore::in_memory(Credentials::default());
        let err = store.save(CredentialKey::Gemini, "   ").unwrap_err();
        assert_eq!(err.to_string(), "Please enter an API key");
        assert!(!store.has(CredentialKey::Gemini));
    }

    #[test]
    fn test_last_write_wins() {
        let store = CredentialStore::in_memory(Credentials::default());
        let handle = store.handle();
        store.save(CredentialKey::Search, "first").unwrap();
        store.save(CredentialKey::Search, "second").unwrap();
        assert_eq!(handle.get(CredentialKey::Search), Some("second".to_string()));
    }

    #[test]
    fn test_blank_stored_value_counts_as_missing() {
        let store = CredentialStore::in_memory(Credentials {
            gemini_api_key: Some("".to_string()),
            search_api_key: None,
        });
        assert_eq!(store.handle().get(CredentialKey::Gemini), None);
    }

    #[test]
    fn test_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");

        let store = CredentialStore::load(path.clone()).unwrap();
        store.save(CredentialKey::Search, "search-key").unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("SEARCH_API_KEY"));

        let reloaded = CredentialStore::load(path).unwrap();
        assert_eq!(reloaded.handle().get(CredentialKey::Search).as_deref(), Some("search-key"));
    }
}
