//! Guarded get-or-refresh token provider
//!
//! One provider per audience and process. Its lock is held across the cache
//! read, the grant refresh and the cache update, so concurrent callers see at
//! most one refresh in flight.

use std::sync::Arc;

use pulsar_oauth2::{BoxFuture, Grant, Result, Token, TokenCache, TokenSource};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct GrantTokenProvider {
    grant: Mutex<Grant>,
    cache: Arc<dyn TokenCache>,
}

impl GrantTokenProvider {
    pub fn new(grant: Grant, cache: Arc<dyn TokenCache>) -> Self {
        Self {
            grant: Mutex::new(grant),
            cache,
        }
    }

    /// Cached token if still usable, otherwise a freshly refreshed one.
    pub async fn token(&self) -> Result<Token> {
        let mut grant = self.grant.lock().await;

        if let Some(token) = self.cache.get_token().await? {
            return Ok(token);
        }

        debug!(audience = %grant.audience(), grant_type = %grant.grant_type(), "refreshing token");
        let token = match grant.refresh().await {
            Ok(token) => {
                metrics::counter!("oauth2_token_refresh_total", "outcome" => "success").increment(1);
                token
            }
            Err(e) => {
                metrics::counter!("oauth2_token_refresh_total", "outcome" => "failure").increment(1);
                warn!(audience = %grant.audience(), error = %e, "token refresh failed");
                return Err(e.context("authentication failure"));
            }
        };

        self.cache
            .update_token(token.clone())
            .await
            .map_err(|e| e.context("unable to update the token cache"))?;
        info!(audience = %grant.audience(), "token refreshed");
        Ok(token)
    }

    pub async fn invalidate(&self) -> Result<()> {
        metrics::counter!("oauth2_token_invalidations_total").increment(1);
        self.cache.invalidate_token().await
    }
}

impl TokenSource for GrantTokenProvider {
    fn token(&self) -> BoxFuture<'_, Result<Token>> {
        Box::pin(GrantTokenProvider::token(self))
    }

    fn invalidate(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(GrantTokenProvider::invalidate(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::KeyringTokenCache;
    use crate::cache::tests::CountingKeyring;
    use crate::store::KeyringStore;
    use crate::store::tests::{device_token, jwt_for};
    use chrono::{DateTime, Duration, Utc};
    use pulsar_oauth2::exchange::{
        ClientCredentialsExchangeRequest, DeviceCodeExchangeRequest, RefreshTokenExchangeRequest,
    };
    use pulsar_oauth2::clock::FakeClock;
    use pulsar_oauth2::{AuthorizationGrant, Clock, Error, ErrorKind, Issuer, TokenExchanger, TokenResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Refresh-only exchanger counting calls; optionally slow to widen races.
    struct RefreshExchanger {
        calls: AtomicUsize,
        delay: std::time::Duration,
        fail: bool,
    }

    impl RefreshExchanger {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: std::time::Duration::ZERO,
                fail: false,
            }
        }
    }

    impl TokenExchanger for RefreshExchanger {
        fn exchange_client_credentials(
            &self,
            _request: ClientCredentialsExchangeRequest,
        ) -> BoxFuture<'_, Result<TokenResult>> {
            Box::pin(async { Err(Error::TokenExchange("unexpected".into())) })
        }

        fn exchange_device_code(
            &self,
            _request: DeviceCodeExchangeRequest,
        ) -> BoxFuture<'_, Result<TokenResult>> {
            Box::pin(async { Err(Error::TokenExchange("unexpected".into())) })
        }

        fn exchange_refresh_token(
            &self,
            _request: RefreshTokenExchangeRequest,
        ) -> BoxFuture<'_, Result<TokenResult>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if self.fail {
                    return Err(Error::TokenExchange("invalid_grant".into()));
                }
                Ok(TokenResult {
                    access_token: jwt_for(&format!("refreshed-{n}")),
                    expires_in: 120,
                    ..Default::default()
                })
            })
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(1000)
    }

    async fn provider(
        token: Token,
        exchanger: Arc<RefreshExchanger>,
        now: DateTime<Utc>,
    ) -> (Arc<CountingKeyring>, Arc<KeyringStore>, GrantTokenProvider) {
        let keyring = Arc::new(CountingKeyring::default());
        let store = Arc::new(KeyringStore::new(keyring.clone()));
        store
            .save_grant("aud", AuthorizationGrant::device_code(token))
            .await
            .unwrap();

        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(now));
        let item = store.get_item("aud").await.unwrap();
        let grant = Grant::from_record(
            &Issuer::new("http://issuer", "cid", "aud"),
            "aud",
            item.grant.clone(),
            exchanger,
            clock.clone(),
        )
        .unwrap();
        let cache = KeyringTokenCache::new(store.clone(), item, clock);
        keyring.writes.store(0, Ordering::SeqCst);
        (keyring, store, GrantTokenProvider::new(grant, Arc::new(cache)))
    }

    fn expiring(expiry: DateTime<Utc>, refresh: &str) -> Token {
        let mut token = device_token("alice", refresh);
        token.expiry = Some(expiry);
        token
    }

    #[tokio::test]
    async fn cached_token_skips_refresh() {
        let exchanger = Arc::new(RefreshExchanger::new());
        let token = expiring(t0() + Duration::seconds(3600), "RT1");
        let (keyring, _, provider) = provider(token.clone(), exchanger.clone(), t0()).await;

        assert_eq!(provider.token().await.unwrap(), token);
        assert_eq!(exchanger.calls.load(Ordering::SeqCst), 0);
        assert_eq!(keyring.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_and_persisted() {
        let exchanger = Arc::new(RefreshExchanger::new());
        let token = expiring(t0() + Duration::seconds(60), "RT1");
        let (keyring, store, provider) =
            provider(token, exchanger.clone(), t0() + Duration::seconds(1)).await;

        let refreshed = provider.token().await.unwrap();
        assert_eq!(refreshed.access_token, jwt_for("refreshed-1"));
        assert_eq!(refreshed.refresh_token, "RT1");
        assert_eq!(refreshed.expiry, Some(t0() + Duration::seconds(121)));

        assert_eq!(exchanger.calls.load(Ordering::SeqCst), 1);
        assert_eq!(keyring.writes.load(Ordering::SeqCst), 1);
        assert_eq!(store.load_grant("aud").await.unwrap().token, Some(refreshed));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let exchanger = Arc::new(RefreshExchanger {
            delay: std::time::Duration::from_millis(20),
            ..RefreshExchanger::new()
        });
        let token = expiring(t0(), "RT1");
        let (_, _, provider) = provider(token, exchanger.clone(), t0()).await;
        let provider = Arc::new(provider);

        let mut handles = vec![];
        for _ in 0..8 {
            let provider = provider.clone();
            handles.push(tokio::spawn(async move { provider.token().await.unwrap() }));
        }
        let mut tokens = vec![];
        for h in handles {
            tokens.push(h.await.unwrap());
        }

        assert_eq!(exchanger.calls.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t.access_token == jwt_for("refreshed-1")));
    }

    #[tokio::test]
    async fn missing_refresh_token_requires_login() {
        let exchanger = Arc::new(RefreshExchanger::new());
        let (keyring, _, provider) = provider(expiring(t0(), ""), exchanger.clone(), t0()).await;

        let err = provider.token().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GrantExpired);
        assert!(err.requires_login());
        assert_eq!(
            err.to_string(),
            "authentication failure: the authorization grant has expired (no refresh token); please re-login"
        );
        assert_eq!(exchanger.calls.load(Ordering::SeqCst), 0);
        assert_eq!(keyring.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_failure_leaves_store_untouched() {
        let exchanger = Arc::new(RefreshExchanger {
            fail: true,
            ..RefreshExchanger::new()
        });
        let (keyring, _, provider) = provider(expiring(t0(), "RT1"), exchanger, t0()).await;

        let err = provider.token().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExchangeFailure);
        assert_eq!(keyring.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalidate_forces_next_refresh() {
        let exchanger = Arc::new(RefreshExchanger::new());
        let token = expiring(t0() + Duration::seconds(3600), "RT1");
        let (_, _, provider) = provider(token, exchanger.clone(), t0()).await;

        provider.invalidate().await.unwrap();
        let refreshed = provider.token().await.unwrap();
        assert_eq!(refreshed.access_token, jwt_for("refreshed-1"));
        assert_eq!(exchanger.calls.load(Ordering::SeqCst), 1);
    }
}
