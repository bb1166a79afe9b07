//! Write-through token cache backed by the keyring store

use std::sync::Arc;

use pulsar_oauth2::cache::is_usable;
use pulsar_oauth2::{BoxFuture, Clock, Result, Token, TokenCache};
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::{Item, KeyringStore};

/// Token cache for one audience.
///
/// Holds the stored [`Item`] in memory; every change is persisted back to the
/// keyring before returning.
pub struct KeyringTokenCache {
    store: Arc<KeyringStore>,
    clock: Arc<dyn Clock>,
    item: Mutex<Item>,
}

impl KeyringTokenCache {
    pub fn new(store: Arc<KeyringStore>, item: Item, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            item: Mutex::new(item),
        }
    }

    pub async fn load(store: Arc<KeyringStore>, audience: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let item = store.get_item(audience).await?;
        Ok(Self::new(store, item, clock))
    }
}

impl TokenCache for KeyringTokenCache {
    fn get_token(&self) -> BoxFuture<'_, Result<Option<Token>>> {
        Box::pin(async move {
            let item = self.item.lock().await;
            match &item.grant.token {
                Some(token) if is_usable(token, self.clock.now()) => {
                    debug!(audience = %item.audience, "token cache hit");
                    Ok(Some(token.clone()))
                }
                _ => {
                    debug!(audience = %item.audience, "token cache miss");
                    Ok(None)
                }
            }
        })
    }

    fn update_token(&self, token: Token) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut item = self.item.lock().await;
            item.grant.token = Some(token);
            self.store.set_item(&item).await
        })
    }

    fn invalidate_token(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut item = self.item.lock().await;
            match item.grant.token.as_mut() {
                Some(token) if token.has_access_token() => token.access_token.clear(),
                _ => return Ok(()),
            }
            debug!(audience = %item.audience, "invalidated access token");
            self.store.set_item(&item).await
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::keyring::{Keyring, KeyringItem, MemoryKeyring};
    use crate::store::tests::device_token;
    use chrono::{DateTime, Duration, Utc};
    use pulsar_oauth2::AuthorizationGrant;
    use pulsar_oauth2::clock::FakeClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory keyring that counts writes.
    #[derive(Default)]
    pub(crate) struct CountingKeyring {
        inner: MemoryKeyring,
        pub(crate) writes: AtomicUsize,
    }

    impl Keyring for CountingKeyring {
        fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<KeyringItem>>> {
            self.inner.get(key)
        }

        fn set(&self, item: KeyringItem) -> BoxFuture<'_, Result<()>> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set(item)
        }

        fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.remove(key)
        }

        fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
            self.inner.keys()
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(1000)
    }

    async fn cache_with(
        token: Token,
        now: DateTime<Utc>,
    ) -> (Arc<CountingKeyring>, Arc<KeyringStore>, KeyringTokenCache) {
        let keyring = Arc::new(CountingKeyring::default());
        let store = Arc::new(KeyringStore::new(keyring.clone()));
        store
            .save_grant("aud", AuthorizationGrant::device_code(token))
            .await
            .unwrap();
        let cache = KeyringTokenCache::load(store.clone(), "aud", Arc::new(FakeClock::new(now)))
            .await
            .unwrap();
        keyring.writes.store(0, Ordering::SeqCst);
        (keyring, store, cache)
    }

    fn expiring_at(expiry: DateTime<Utc>) -> Token {
        let mut token = device_token("alice", "RT1");
        token.expiry = Some(expiry);
        token
    }

    #[tokio::test]
    async fn returns_token_outside_expiry_window() {
        let token = expiring_at(t0() + Duration::seconds(3600));
        let (_, _, cache) = cache_with(token.clone(), t0()).await;
        assert_eq!(cache.get_token().await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn misses_inside_expiry_window() {
        let (_, _, cache) = cache_with(expiring_at(t0() + Duration::seconds(60)), t0() + Duration::seconds(1)).await;
        assert_eq!(cache.get_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn token_without_expiry_is_always_returned() {
        let token = device_token("alice", "RT1");
        let (_, _, cache) = cache_with(token.clone(), t0()).await;
        assert_eq!(cache.get_token().await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn update_persists_item() {
        let (keyring, store, cache) = cache_with(expiring_at(t0()), t0()).await;

        let mut fresh = device_token("alice", "RT2");
        fresh.expiry = Some(t0() + Duration::seconds(3600));
        cache.update_token(fresh.clone()).await.unwrap();

        assert_eq!(keyring.writes.load(Ordering::SeqCst), 1);
        assert_eq!(store.load_grant("aud").await.unwrap().token, Some(fresh.clone()));
        assert_eq!(cache.get_token().await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn invalidate_clears_access_token_only() {
        let (keyring, store, cache) = cache_with(expiring_at(t0() + Duration::seconds(3600)), t0()).await;

        cache.invalidate_token().await.unwrap();
        assert_eq!(keyring.writes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get_token().await.unwrap(), None);

        let stored = store.load_grant("aud").await.unwrap().token.unwrap();
        assert!(stored.access_token.is_empty());
        assert_eq!(stored.refresh_token, "RT1");
    }

    #[tokio::test]
    async fn invalidate_without_access_token_does_not_write() {
        let (keyring, _, cache) = cache_with(expiring_at(t0() + Duration::seconds(3600)), t0()).await;

        cache.invalidate_token().await.unwrap();
        cache.invalidate_token().await.unwrap();
        assert_eq!(keyring.writes.load(Ordering::SeqCst), 1, "second invalidate is a no-op");
    }
}
