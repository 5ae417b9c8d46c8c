//! Durable token storage.
//!
//! A single key holds the token JSON blob; its absence means "no session".
//! Stores never cache: every `load` reflects the latest `save` or `clear`,
//! including writes made by another coordinator over the same location.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::error::SessionError;
use crate::tokens::StoredTokens;

/// Name of the storage key holding the token blob.
pub const TOKEN_STORAGE_KEY: &str = "auth_tokens";

/// Backing store for [`StoredTokens`].
pub trait TokenStorage: Send + Sync {
    /// Returns the stored tokens, or `None` when no session exists.
    fn load(&self) -> Result<Option<StoredTokens>, SessionError>;
    fn save(&self, tokens: &StoredTokens) -> Result<(), SessionError>;
    /// Deletes the stored tokens. Clearing an empty store is not an error.
    fn clear(&self) -> Result<(), SessionError>;
}

/// Tokens persisted as `<dir>/auth_tokens.json`.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{TOKEN_STORAGE_KEY}.json")),
        }
    }

    /// Store under the platform config directory, if one can be determined.
    pub fn in_default_dir() -> Option<Self> {
        default_storage_dir().map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStorage for FileTokenStore {
    fn load(&self) -> Result<Option<StoredTokens>, SessionError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let tokens = serde_json::from_str(&data)?;
        Ok(Some(tokens))
    }

    fn save(&self, tokens: &StoredTokens) -> Result<(), SessionError> {
        let json = serde_json::to_string_pretty(tokens)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        debug!(path = ?self.path, "persisted tokens");
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = ?self.path, "removed stored tokens");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store, for tests and embedders that persist elsewhere.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<StoredTokens>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: StoredTokens) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

impl TokenStorage for MemoryTokenStore {
    fn load(&self) -> Result<Option<StoredTokens>, SessionError> {
        Ok(self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, tokens: &StoredTokens) -> Result<(), SessionError> {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

/// Returns `<config dir>/livelink`.
pub fn default_storage_dir() -> Option<PathBuf> {
    config_dir().map(|d| d.join("livelink"))
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
