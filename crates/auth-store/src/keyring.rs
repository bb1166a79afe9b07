//! Keyring backends
//!
//! A keyring is a flat map from key to `{label, data}`. The file backend keeps
//! the whole map in one JSON file; every write replaces the file atomically
//! (temp file + rename) with 0600 permissions since it holds tokens and
//! client secrets.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;

use pulsar_oauth2::{BoxFuture, Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyringItem {
    pub key: String,
    pub label: String,
    pub data: String,
}

/// Storage for opaque credential records.
pub trait Keyring: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<KeyringItem>>>;

    fn set(&self, item: KeyringItem) -> BoxFuture<'_, Result<()>>;

    /// Remove `key`, returning whether it existed.
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// Stored form of a [`KeyringItem`] without its key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Entry {
    pub(crate) label: String,
    pub(crate) data: String,
}

/// Keyring persisted as a single JSON file.
///
/// Concurrent writers in the same process are serialized by the mutex; writers
/// in different processes race and the last rename wins.
pub struct FileKeyring {
    path: PathBuf,
    state: Mutex<BTreeMap<String, Entry>>,
}

impl FileKeyring {
    /// Open the keyring at `path`. A missing file is an empty keyring; the
    /// file is only created on the first write.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let entries: BTreeMap<String, Entry> = serde_json::from_str(&contents)
                    .map_err(|e| Error::StoreRead(format!("parsing {}: {e}", path.display())))?;
                debug!(path = %path.display(), entries = entries.len(), "loaded keyring");
                entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "keyring file not found, starting empty");
                BTreeMap::new()
            }
            Err(e) => {
                return Err(Error::StoreRead(format!("reading {}: {e}", path.display())));
            }
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Keyring for FileKeyring {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<KeyringItem>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.get(key).map(|entry| KeyringItem {
                key: key.to_string(),
                label: entry.label.clone(),
                data: entry.data.clone(),
            }))
        })
    }

    fn set(&self, item: KeyringItem) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.insert(
                item.key.clone(),
                Entry {
                    label: item.label,
                    data: item.data,
                },
            );
            write_atomic(&self.path, &state).await?;
            info!(key = %item.key, path = %self.path.display(), "stored keyring item");
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.remove(key).is_none() {
                return Ok(false);
            }
            write_atomic(&self.path, &state).await?;
            info!(key, path = %self.path.display(), "removed keyring item");
            Ok(true)
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.keys().cloned().collect())
        })
    }
}

async fn write_atomic(path: &Path, data: &BTreeMap<String, Entry>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Io(format!("serializing keyring: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("keyring path has no parent directory".into()))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io(format!("creating keyring directory: {e}")))?;

    let tmp_path = dir.join(format!(".keyring.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp keyring file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting keyring file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp keyring file: {e}")))?;

    debug!(path = %path.display(), "persisted keyring");
    Ok(())
}

/// In-memory keyring, for tests and one-shot sessions.
#[derive(Default)]
pub struct MemoryKeyring {
    items: StdMutex<BTreeMap<String, KeyringItem>>,
}

impl MemoryKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, KeyringItem>> {
        // A poisoned map is still a valid map.
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Keyring for MemoryKeyring {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<KeyringItem>>> {
        let item = self.items().get(key).cloned();
        Box::pin(async move { Ok(item) })
    }

    fn set(&self, item: KeyringItem) -> BoxFuture<'_, Result<()>> {
        self.items().insert(item.key.clone(), item);
        Box::pin(async { Ok(()) })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        let removed = self.items().remove(key).is_some();
        Box::pin(async move { Ok(removed) })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        let keys = self.items().keys().cloned().collect();
        Box::pin(async move { Ok(keys) })
    }
}
