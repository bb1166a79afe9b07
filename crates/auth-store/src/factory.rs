//! Entry point tying the store, grants and token provider together
//!
//! The CLI talks to [`AuthFactory`] only: it records grants produced by the
//! login flows and hands out the [`Authentication`] for outgoing requests.

use std::sync::Arc;

use pulsar_oauth2::{
    AuthorizationGrant, Clock, Error, ErrorKind, Grant, Issuer, KeyFile, Result, SystemClock, Token,
    TokenExchanger, TokenRetriever, WellKnownEndpoints,
};
use tracing::{debug, info};
use transport::Authentication;

use crate::cache::KeyringTokenCache;
use crate::provider::GrantTokenProvider;
use crate::store::KeyringStore;

pub struct AuthFactory {
    issuer: Issuer,
    store: Arc<KeyringStore>,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    exchanger: Option<Arc<dyn TokenExchanger>>,
}

impl AuthFactory {
    pub fn new(issuer: Issuer, store: Arc<KeyringStore>, client: reqwest::Client) -> Self {
        Self {
            issuer,
            store,
            client,
            clock: Arc::new(SystemClock),
            exchanger: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `exchanger` instead of discovering the issuer's token endpoint.
    pub fn with_exchanger(mut self, exchanger: Arc<dyn TokenExchanger>) -> Self {
        self.exchanger = Some(exchanger);
        self
    }

    pub fn issuer(&self) -> &Issuer {
        &self.issuer
    }

    pub async fn use_client_credentials_grant(
        &self,
        audience: &str,
        key_file: KeyFile,
        token: Token,
    ) -> Result<()> {
        self.store
            .save_grant(audience, AuthorizationGrant::client_credentials(key_file, Some(token)))
            .await
    }

    pub async fn use_device_authorization_grant(&self, audience: &str, token: Token) -> Result<()> {
        self.store
            .save_grant(audience, AuthorizationGrant::device_code(token))
            .await
    }

    /// Persist the grant produced by a login flow.
    pub async fn save_grant(&self, grant: &Grant) -> Result<()> {
        self.store.save_grant(grant.audience(), grant.to_record()).await
    }

    pub async fn who_am_i(&self, audience: &str) -> Result<String> {
        self.store.who_am_i(audience).await
    }

    pub async fn logout(&self) -> Result<()> {
        self.store.logout().await
    }

    /// Token provider for the grant stored under `audience`.
    pub async fn token_provider(&self, audience: &str) -> Result<Arc<GrantTokenProvider>> {
        let item = self.store.get_item(audience).await?;
        let exchanger = self.exchanger().await?;
        let grant = Grant::from_record(
            &self.issuer,
            audience,
            item.grant.clone(),
            exchanger,
            self.clock.clone(),
        )?;
        debug!(audience, grant_type = %grant.grant_type(), "loaded stored grant");

        let cache = KeyringTokenCache::new(self.store.clone(), item, self.clock.clone());
        Ok(Arc::new(GrantTokenProvider::new(grant, Arc::new(cache))))
    }

    /// Authentication for requests to `audience`; anonymous when nothing is
    /// stored.
    pub async fn authentication(&self, audience: &str) -> Result<Authentication> {
        match self.token_provider(audience).await {
            Ok(provider) => Ok(Authentication::OAuth2(provider)),
            Err(e) if e.kind() == ErrorKind::CredentialUnavailable => {
                info!(audience, "no stored credentials, sending anonymous requests");
                Ok(Authentication::Anonymous)
            }
            Err(e) => Err(e),
        }
    }

    async fn exchanger(&self) -> Result<Arc<dyn TokenExchanger>> {
        if let Some(exchanger) = &self.exchanger {
            return Ok(exchanger.clone());
        }
        if self.issuer.issuer_endpoint.is_empty() {
            return Err(Error::Config("required: issuer-endpoint".into()));
        }
        let endpoints =
            WellKnownEndpoints::discover(&self.client, &self.issuer.issuer_endpoint).await?;
        Ok(Arc::new(TokenRetriever::from_endpoints(self.client.clone(), &endpoints)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::MemoryKeyring;
    use crate::store::tests::{device_token, key_file};
    use pulsar_oauth2::exchange::{
        ClientCredentialsExchangeRequest, DeviceCodeExchangeRequest, RefreshTokenExchangeRequest,
    };
    use pulsar_oauth2::{BoxFuture, TokenResult, TokenSource};

    struct NoExchange;

    impl TokenExchanger for NoExchange {
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
            Box::pin(async { Err(Error::TokenExchange("unexpected".into())) })
        }
    }

    fn factory() -> AuthFactory {
        let store = Arc::new(KeyringStore::new(Arc::new(MemoryKeyring::new())));
        AuthFactory::new(
            Issuer::new("http://issuer", "cid", "aud"),
            store,
            reqwest::Client::new(),
        )
        .with_exchanger(Arc::new(NoExchange))
    }

    #[tokio::test]
    async fn nothing_stored_is_anonymous() {
        let factory = factory();
        let auth = factory.authentication("aud").await.unwrap();
        assert!(matches!(auth, Authentication::Anonymous));

        let err = factory.who_am_i("aud").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialUnavailable);
    }

    #[tokio::test]
    async fn stored_client_credentials_yield_oauth2_authentication() {
        let factory = factory();
        let token = Token {
            access_token: "AT1".into(),
            token_type: "bearer".into(),
            ..Default::default()
        };
        factory
            .use_client_credentials_grant("aud", key_file(), token.clone())
            .await
            .unwrap();

        assert_eq!(factory.who_am_i("aud").await.unwrap(), "svc@example.iam");
        let auth = factory.authentication("aud").await.unwrap();
        let Authentication::OAuth2(source) = auth else {
            panic!("expected OAuth2 authentication");
        };
        assert_eq!(source.token().await.unwrap(), token);
    }

    #[tokio::test]
    async fn stored_device_grant_yields_oauth2_authentication() {
        let factory = factory();
        factory
            .use_device_authorization_grant("aud", device_token("alice", "RT1"))
            .await
            .unwrap();

        assert_eq!(factory.who_am_i("aud").await.unwrap(), "alice");
        let provider = factory.token_provider("aud").await.unwrap();
        assert_eq!(provider.token().await.unwrap().refresh_token, "RT1");
    }

    #[tokio::test]
    async fn logout_forgets_all_audiences() {
        let factory = factory();
        factory
            .use_device_authorization_grant("aud", device_token("alice", "RT1"))
            .await
            .unwrap();
        factory
            .use_device_authorization_grant("other", device_token("alice", "RT1"))
            .await
            .unwrap();

        factory.logout().await.unwrap();
        assert!(matches!(
            factory.authentication("aud").await.unwrap(),
            Authentication::Anonymous
        ));
        assert!(matches!(
            factory.authentication("other").await.unwrap(),
            Authentication::Anonymous
        ));
    }

    #[tokio::test]
    async fn unusable_record_is_an_error_not_anonymous() {
        let keyring = Arc::new(MemoryKeyring::new());
        let store = Arc::new(KeyringStore::new(keyring.clone()));
        crate::keyring::Keyring::set(
            keyring.as_ref(),
            crate::keyring::KeyringItem {
                key: crate::store::hash_key("aud"),
                label: "x".into(),
                data: "[]".into(),
            },
        )
        .await
        .unwrap();
        let factory = AuthFactory::new(
            Issuer::new("http://issuer", "cid", "aud"),
            store,
            reqwest::Client::new(),
        )
        .with_exchanger(Arc::new(NoExchange));

        let err = factory.authentication("aud").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialUnusable);
    }

    #[tokio::test]
    async fn stored_grant_without_issuer_endpoint_is_a_configuration_error() {
        let store = Arc::new(KeyringStore::new(Arc::new(MemoryKeyring::new())));
        let factory = AuthFactory::new(Issuer::new("", "cid", "aud"), store, reqwest::Client::new());
        factory
            .use_device_authorization_grant("aud", device_token("alice", "RT1"))
            .await
            .unwrap();

        let err = factory.authentication("aud").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), "configuration error: required: issuer-endpoint");
    }
}
