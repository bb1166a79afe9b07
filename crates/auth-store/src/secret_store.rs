//! Keyring over a platform secret store
//!
//! Secret stores (macOS Keychain, Windows Credential Manager, the freedesktop
//! Secret Service) only offer get/set/delete of one secret by name, so the
//! list of stored keys is kept in an extra index secret. Every item secret is
//! the JSON `{label, data}`; the index secret is a JSON array of keys.
//!
//! The platform backend needs the `keyring` feature.

use std::sync::Arc;

use pulsar_oauth2::{BoxFuture, Error, Result};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::keyring::{Entry, Keyring, KeyringItem};

/// Service name the secrets are filed under.
pub const DEFAULT_SERVICE_NAME: &str = "pulsar";

/// Secret name of the key index. Item keys are hex digests and never collide.
const INDEX_NAME: &str = "keyring-index";

/// Blocking access to named secrets of one service.
pub trait SecretStore: Send + Sync + 'static {
    fn get(&self, name: &str) -> Result<Option<String>>;

    fn set(&self, name: &str, secret: &str) -> Result<()>;

    /// Delete `name`, returning whether it existed.
    fn delete(&self, name: &str) -> Result<bool>;
}

/// [`Keyring`] backed by a [`SecretStore`].
///
/// Store calls run on the blocking pool. Writers in this process are
/// serialized so the index stays consistent with the items.
pub struct SecretStoreKeyring<S> {
    store: Arc<S>,
    write_lock: Mutex<()>,
}

impl<S: SecretStore> SecretStoreKeyring<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            write_lock: Mutex::new(()),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| Error::Io(format!("secret store task failed: {e}")))?
    }
}

fn read_index(store: &impl SecretStore) -> Result<Vec<String>> {
    match store.get(INDEX_NAME)? {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| Error::StoreRead(format!("parsing keyring index: {e}"))),
        None => Ok(Vec::new()),
    }
}

fn write_index(store: &impl SecretStore, keys: &[String]) -> Result<()> {
    let json = serde_json::to_string(keys)
        .map_err(|e| Error::Io(format!("serializing keyring index: {e}")))?;
    store.set(INDEX_NAME, &json)
}

impl<S: SecretStore> Keyring for SecretStoreKeyring<S> {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<KeyringItem>>> {
        let key = key.to_string();
        Box::pin(self.blocking(move |store| {
            let Some(secret) = store.get(&key)? else {
                return Ok(None);
            };
            let entry: Entry = serde_json::from_str(&secret)
                .map_err(|e| Error::StoreRead(format!("parsing keyring item {key}: {e}")))?;
            Ok(Some(KeyringItem {
                key,
                label: entry.label,
                data: entry.data,
            }))
        }))
    }

    fn set(&self, item: KeyringItem) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let key = item.key.clone();
            self.blocking(move |store| {
                let entry = Entry {
                    label: item.label,
                    data: item.data,
                };
                let json = serde_json::to_string(&entry)
                    .map_err(|e| Error::Io(format!("serializing keyring item: {e}")))?;
                store.set(&item.key, &json)?;

                let mut keys = read_index(store)?;
                if !keys.contains(&item.key) {
                    keys.push(item.key);
                    write_index(store, &keys)?;
                }
                Ok(())
            })
            .await?;
            info!(key, "stored keyring item in secret store");
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let owned = key.to_string();
            let removed = self
                .blocking(move |store| {
                    let removed = store.delete(&owned)?;
                    let mut keys = read_index(store)?;
                    let before = keys.len();
                    keys.retain(|k| *k != owned);
                    if keys.len() != before {
                        write_index(store, &keys)?;
                    }
                    Ok(removed)
                })
                .await?;
            debug!(key, removed, "removed keyring item from secret store");
            Ok(removed)
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(self.blocking(|store| read_index(store)))
    }
}

/// The platform secret store, through the `keyring` crate.
#[cfg(feature = "keyring")]
#[derive(Debug, Clone)]
pub struct SystemSecretStore {
    service: String,
}

#[cfg(feature = "keyring")]
impl SystemSecretStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, name)
            .map_err(|e| Error::Io(format!("opening system keyring entry {name}: {e}")))
    }
}

#[cfg(feature = "keyring")]
impl SecretStore for SystemSecretStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        match self.entry(name)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::Io(format!("reading {name} from the system keyring: {e}"))),
        }
    }

    fn set(&self, name: &str, secret: &str) -> Result<()> {
        self.entry(name)?
            .set_password(secret)
            .map_err(|e| Error::Io(format!("writing {name} to the system keyring: {e}")))
    }

    fn delete(&self, name: &str) -> Result<bool> {
        match self.entry(name)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(Error::Io(format!("deleting {name} from the system keyring: {e}"))),
        }
    }
}
