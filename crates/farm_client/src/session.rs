//! Bearer credential held for the lifetime of the process.
//!
//! The `Session` is restored from a `SessionStore` at startup, replaced by
//! the `TokenRefreshCoordinator` on every renewal and cleared on logout.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use common::Error;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Persistence seam for the bearer credential.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, Error>;
    fn save(&self, token: &str) -> Result<(), Error>;
    fn clear(&self) -> Result<(), Error>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSession {
    access_token: String,
    saved_at: DateTime<Utc>,
}

/// JSON file next to the working directory.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<String>, Error> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        match serde_json::from_str::<PersistedSession>(&raw) {
            Ok(persisted) if !persisted.access_token.is_empty() => {
                debug!("Loaded session saved at {}", persisted.saved_at);
                Ok(Some(persisted.access_token))
            }
            Ok(_) => Ok(None),
            Err(e) => {
                warn!("Ignoring unreadable session file {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    fn save(&self, token: &str) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_string_pretty(&PersistedSession {
            access_token: token.to_string(),
            saved_at: Utc::now(),
        })?;
        fs::write(&self.path, data)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), Error> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    token: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: Mutex::new(token.map(str::to_string)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<String>, Error> {
        Ok(self
            .token
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone())
    }

    fn save(&self, token: &str) -> Result<(), Error> {
        *self.token.lock().unwrap_or_else(|p| p.into_inner()) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), Error> {
        *self.token.lock().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }
}

/// Current bearer credential plus its persisted copy.
pub struct Session {
    store: Arc<dyn SessionStore>,
    token: RwLock<Option<String>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Session {
    /// Restore from persisted storage.
    pub fn restore(store: Arc<dyn SessionStore>) -> Result<Self, Error> {
        let token = store.load()?;
        if token.is_some() {
            info!("Restored persisted session");
        }
        Ok(Self {
            store,
            token: RwLock::new(token),
        })
    }

    pub async fn get(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// Replace the credential. A failed write to the store is logged, not
    /// returned: the in-memory credential is still valid for this process.
    pub async fn set(&self, token: &str) {
        *self.token.write().await = Some(token.to_string());
        if let Err(e) = self.store.save(token) {
            warn!("Failed to persist session: {}", e);
        }
    }

    /// Logout: clear memory and the persisted copy.
    pub async fn invalidate(&self) {
        *self.token.write().await = None;
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear persisted session: {}", e);
        }
        info!("Session invalidated");
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }
}
