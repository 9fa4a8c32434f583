/*
    statify-rs | Rust CLI to explore your Spotify listening statistics.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Key/value storage with the semantics of browser local/session storage.
//!
//! `FileStorage` is the persistent ("local") store and keeps every key in one JSON
//! document. `MemoryStorage` lives as long as the process and backs the session-scoped
//! values such as the OAuth `state`. `TokenStore` layers the typed token pair and
//! profile records on top of either.

use crate::models::{AuthTokens, User};
use log::{debug, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

pub const AUTH_TOKENS_KEY: &str = "spotify_auth_tokens";
pub const USER_DATA_KEY: &str = "spotify_user_data";
pub const AUTH_STATE_KEY: &str = "spotify_auth_state";

pub const STORAGE_FILE_NAME: &str = "storage.json";

#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Corrupted stored data: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(lock(&self.items).get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        lock(&self.items).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.items).remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        lock(&self.items).clear();
        Ok(())
    }
}

/// JSON-file storage written with 0600 permissions.
pub struct FileStorage {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    /// Storage file inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(STORAGE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content =
            std::fs::read_to_string(&self.path).map_err(|e| StorageError::io(&self.path, e))?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// An unreadable document is replaced rather than blocking every future write.
    fn read_or_reset(&self) -> Result<HashMap<String, String>, StorageError> {
        match self.read_all() {
            Err(StorageError::Corrupt(e)) => {
                warn!("Discarding unreadable storage at {}: {}", self.path.display(), e);
                Ok(HashMap::new())
            }
            other => other,
        }
    }

    /// Writes the document to a sibling `.tmp` file and renames it into place, so readers
    /// never see a partial document. On Unix the file is created with mode 0600.
    fn write_all(&self, items: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        let content = serde_json::to_string_pretty(items)?;
        let temp_path = self.path.with_extension("tmp");

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(&temp_path)
                .map_err(|e| StorageError::io(&temp_path, e))?;
            file.write_all(content.as_bytes())
                .map_err(|e| StorageError::io(&temp_path, e))?;
            file.sync_all().map_err(|e| StorageError::io(&temp_path, e))?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(&temp_path, &content).map_err(|e| StorageError::io(&temp_path, e))?;
        }

        if let Err(e) = std::fs::rename(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(StorageError::io(&self.path, e));
        }

        debug!("Storage written to {}", self.path.display());
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = lock(&self.guard);
        Ok(self.read_all()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = lock(&self.guard);
        let mut items = self.read_or_reset()?;
        items.insert(key.to_string(), value.to_string());
        self.write_all(&items)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let _guard = lock(&self.guard);
        let mut items = self.read_or_reset()?;
        items.remove(key);
        self.write_all(&items)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = lock(&self.guard);
        self.write_all(&HashMap::new())
    }
}

/// Typed access to the persisted token pair and user profile.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn Storage>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Returns `Err(StorageError::Corrupt)` when the stored pair does not parse.
    pub fn load(&self) -> Result<Option<AuthTokens>, StorageError> {
        match self.storage.get_item(AUTH_TOKENS_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, tokens: &AuthTokens) -> Result<(), StorageError> {
        let raw = serde_json::to_string(tokens)?;
        self.storage.set_item(AUTH_TOKENS_KEY, &raw)
    }

    pub fn load_user(&self) -> Result<Option<User>, StorageError> {
        match self.storage.get_item(USER_DATA_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn save_user(&self, user: &User) -> Result<(), StorageError> {
        let raw = serde_json::to_string(user)?;
        self.storage.set_item(USER_DATA_KEY, &raw)
    }

    /// True when a parseable, unexpired pair is stored.
    pub fn has_valid_tokens(&self) -> bool {
        matches!(self.load(), Ok(Some(tokens)) if !tokens.is_expired())
    }

    /// Removes the token pair and the profile.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove_item(AUTH_TOKENS_KEY)?;
        self.storage.remove_item(USER_DATA_KEY)
    }
}
