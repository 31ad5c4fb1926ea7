use crate::error::StoreError;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Opaque persisted settings holding the two token strings.
///
/// Writes become durable on `save`; nothing beyond "visible to the next
/// load" is assumed.
pub trait CredentialStore: Send {
    fn access_token(&self) -> Option<String>;
    fn refresh_token(&self) -> Option<String>;
    fn set_access_token(&mut self, token: Option<String>);
    fn set_refresh_token(&mut self, token: Option<String>);
    fn save(&mut self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct StoredTokens {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// JSON file next to the binary (or wherever the config points).
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    tokens: StoredTokens,
}

impl FileCredentialStore {
    /// Opens the store, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let tokens = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => StoredTokens::default(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No credential file at {}", path.display());
                StoredTokens::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, tokens })
    }

    /// Like `open`, but an unreadable or damaged file is logged and the
    /// store starts empty. The file is replaced on the next save.
    pub fn open_or_reset(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::open(&path) {
            Ok(store) => store,
            Err(e) => {
                warn!(
                    "Ignoring unreadable credential file {}: {}",
                    path.display(),
                    e
                );
                Self {
                    path,
                    tokens: StoredTokens::default(),
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn access_token(&self) -> Option<String> {
        self.tokens.access_token.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        self.tokens.refresh_token.clone()
    }

    fn set_access_token(&mut self, token: Option<String>) {
        self.tokens.access_token = token;
    }

    fn set_refresh_token(&mut self, token: Option<String>) {
        self.tokens.refresh_token = token;
    }

    fn save(&mut self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        // write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.tokens)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Saved credentials to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store. Clones share the same contents, which lets a caller keep
/// a handle after giving one to the token manager.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    tokens: Arc<Mutex<StoredTokens>>,
    saves: Arc<Mutex<usize>>,
}

impl MemoryCredentialStore {
    pub fn with_tokens(access: &str, refresh: &str) -> Self {
        let store = Self::default();
        if let Ok(mut tokens) = store.tokens.lock() {
            tokens.access_token = Some(access.to_string());
            tokens.refresh_token = Some(refresh.to_string());
        }
        store
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn access_token(&self) -> Option<String> {
        self.tokens.lock().ok().and_then(|t| t.access_token.clone())
    }

    fn refresh_token(&self) -> Option<String> {
        self.tokens.lock().ok().and_then(|t| t.refresh_token.clone())
    }

    fn set_access_token(&mut self, token: Option<String>) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.access_token = token;
        }
    }

    fn set_refresh_token(&mut self, token: Option<String>) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.refresh_token = token;
        }
    }

    fn save(&mut self) -> Result<(), StoreError> {
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}
