// Persisted key-value storage and the auth-state store on top of it

use anyhow::{Context, Result};
use dashmap::DashMap;
use rusqlite::OptionalExtension;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::types::AuthState;

/// Key holding the directly cached bearer token
pub const AUTH_TOKEN_KEY: &str = "authToken";

/// Key holding the serialized root state (`{"auth": "<json>", ...}`)
pub const PERSIST_ROOT_KEY: &str = "persist:root";

/// Key holding the saved cookie string between CLI runs
pub const COOKIE_KEY: &str = "document:cookie";

/// String key-value store with browser-storage semantics
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
}

/// In-process storage, lost on exit
#[derive(Default)]
pub struct MemoryStorage {
    items: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.get(key).map(|entry| entry.value().clone()))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.items.remove(key);
        Ok(())
    }
}

/// SQLite-backed storage (single `storage_kv` table)
pub struct SqliteStorage {
    conn: Mutex<rusqlite::Connection>,
    path: Option<PathBuf>,
}

impl SqliteStorage {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create storage directory: {}", parent.display())
                })?;
            }
        }

        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .context("Failed to open in-memory SQLite database")?;
        Self::init(conn, None)
    }

    fn init(conn: rusqlite::Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS storage_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create storage_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("SQLite connection lock poisoned"))
    }
}

impl Storage for SqliteStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM storage_kv WHERE key = ?",
            [key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to read storage key: {}", key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO storage_kv (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )
        .with_context(|| format!("Failed to write storage key: {}", key))?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM storage_kv WHERE key = ?", [key])
            .with_context(|| format!("Failed to remove storage key: {}", key))?;
        Ok(())
    }
}

/// Read/write access to the persisted auth state and the direct token key
#[derive(Clone)]
pub struct AuthStateStore {
    storage: Arc<dyn Storage>,
}

impl AuthStateStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Current auth state; empty when nothing is persisted
    pub fn read(&self) -> Result<AuthState> {
        match self.storage.get_item(PERSIST_ROOT_KEY)? {
            Some(root) => AuthState::from_persisted_root(&root),
            None => Ok(AuthState::default()),
        }
    }

    /// Persist the auth state, keeping any other slices of the root object
    pub fn write(&self, state: &AuthState) -> Result<()> {
        let existing = self.storage.get_item(PERSIST_ROOT_KEY)?;
        let root = state.merge_into_persisted_root(existing.as_deref())?;
        self.storage.set_item(PERSIST_ROOT_KEY, &root)
    }

    /// Non-empty value of the `authToken` key
    pub fn direct_token(&self) -> Result<Option<String>> {
        Ok(self
            .storage
            .get_item(AUTH_TOKEN_KEY)?
            .filter(|t| !t.is_empty()))
    }

    pub fn set_direct_token(&self, token: &str) -> Result<()> {
        self.storage.set_item(AUTH_TOKEN_KEY, token)
    }

    pub fn clear_direct_token(&self) -> Result<()> {
        self.storage.remove_item(AUTH_TOKEN_KEY)
    }

    /// Drop the user, the envelope token and the direct key
    pub fn clear(&self) -> Result<()> {
        self.write(&AuthState::default())?;
        self.clear_direct_token()
    }
}
