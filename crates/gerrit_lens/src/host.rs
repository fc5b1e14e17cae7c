//! Capabilities the core needs from its host application.
//!
//! The core never renders anything itself. It persists small values, reads
//! credentials, publishes named context flags and shows messages, all through
//! the traits below. In-memory implementations are provided for tests and for
//! embedding; [`JsonFileStore`] backs the command-line front end.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from persistent host storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage scope for persisted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScope {
    /// Local to the current repository checkout.
    Workspace,
    /// Shared across every workspace of the user.
    Global,
}

impl StorageScope {
    fn as_str(self) -> &'static str {
        match self {
            StorageScope::Workspace => "workspace",
            StorageScope::Global => "global",
        }
    }
}

/// Persisted key-value storage with two scopes.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, scope: StorageScope, key: &str) -> Option<Value>;
    fn set(&self, scope: StorageScope, key: &str, value: Value) -> Result<(), StoreError>;
    fn remove(&self, scope: StorageScope, key: &str) -> Result<(), StoreError>;
}

/// Credential storage.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn store(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Secret-store key for the password of a given Gerrit URL.
#[must_use]
pub fn password_secret_key(url: &str) -> String {
    format!("gerrit.password.{}", url.trim_end_matches('/'))
}

/// Value of a named context flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextValue {
    Bool(bool),
    Str(String),
}

/// Publishes named flags that drive conditional visibility in the host.
pub trait ContextPublisher: Send + Sync {
    fn set_context(&self, name: &str, value: ContextValue);
}

/// Severity of a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// Shows toast-style messages. `actions` are button labels; the host decides
/// what pressing one does.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: MessageLevel, message: &str, actions: &[&str]);
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: MessageLevel, message: &str, actions: &[&str]) {
        match level {
            MessageLevel::Info => tracing::info!(?actions, "{}", message),
            MessageLevel::Warning => tracing::warn!(?actions, "{}", message),
            MessageLevel::Error => tracing::error!(?actions, "{}", message),
        }
    }
}

/// A message captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMessage {
    pub level: MessageLevel,
    pub message: String,
    pub actions: Vec<String>,
}

/// Notifier that keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<RecordedMessage>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<RecordedMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: MessageLevel, message: &str, actions: &[&str]) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedMessage {
                level,
                message: message.to_string(),
                actions: actions.iter().map(|a| a.to_string()).collect(),
            });
    }
}

/// In-memory [`KeyValueStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<(StorageScope, String), Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, scope: StorageScope, key: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(scope, key.to_string()))
            .cloned()
    }

    fn set(&self, scope: StorageScope, key: &str, value: Value) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((scope, key.to_string()), value);
        Ok(())
    }

    fn remove(&self, scope: StorageScope, key: &str) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(scope, key.to_string()));
        Ok(())
    }
}

/// In-memory [`SecretStore`].
#[derive(Debug, Default)]
pub struct MemorySecrets {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemorySecrets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecrets {
    fn get(&self, key: &str) -> Option<String> {
        self.secrets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn store(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.secrets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.secrets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

/// In-memory [`ContextPublisher`].
#[derive(Debug, Default)]
pub struct MemoryContext {
    values: Mutex<HashMap<String, ContextValue>>,
}

impl MemoryContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<ContextValue> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }
}

impl ContextPublisher for MemoryContext {
    fn set_context(&self, name: &str, value: ContextValue) {
        tracing::debug!(name, ?value, "context updated");
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value);
    }
}

/// [`KeyValueStore`] persisted as one JSON document:
/// `{"workspace": {...}, "global": {...}}`.
///
/// Every write rewrites the whole file; the store is meant for a handful of
/// small values.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(Map::new()),
            Ok(raw) => match serde_json::from_str(&raw)? {
                Value::Object(map) => Ok(map),
                _ => Ok(Map::new()),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, doc: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(doc)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    fn update<F>(&self, scope: StorageScope, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut doc = self.load()?;
        let section = doc
            .entry(scope.as_str())
            .or_insert_with(|| Value::Object(Map::new()));
        if !section.is_object() {
            *section = Value::Object(Map::new());
        }
        if let Value::Object(map) = section {
            f(map);
        }
        self.save(&doc)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, scope: StorageScope, key: &str) -> Option<Value> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        match self.load() {
            Ok(doc) => doc.get(scope.as_str())?.get(key).cloned(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read store");
                None
            }
        }
    }

    fn set(&self, scope: StorageScope, key: &str, value: Value) -> Result<(), StoreError> {
        self.update(scope, |map| {
            map.insert(key.to_string(), value);
        })
    }

    fn remove(&self, scope: StorageScope, key: &str) -> Result<(), StoreError> {
        self.update(scope, |map| {
            map.remove(key);
        })
    }
}
