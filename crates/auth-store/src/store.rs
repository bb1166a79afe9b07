//! Grant persistence on top of a [`Keyring`]
//!
//! Each audience maps to one keyring entry keyed by the hex SHA-1 of the
//! audience. The entry label is the signed-in identity (token username claim
//! or service account email) and the data is the JSON-encoded
//! [`AuthorizationGrant`]. The audience itself is never stored; callers
//! supply it on lookup.

use std::sync::Arc;

use pulsar_oauth2::{AuthorizationGrant, Error, GrantType, Result, extract_user_name};
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::keyring::{Keyring, KeyringItem};

/// Stored record for one audience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub audience: String,
    pub user_name: String,
    pub grant: AuthorizationGrant,
}

/// Keyring key for an audience.
pub fn hash_key(audience: &str) -> String {
    Sha1::digest(audience.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub struct KeyringStore {
    keyring: Arc<dyn Keyring>,
}

impl KeyringStore {
    pub fn new(keyring: Arc<dyn Keyring>) -> Self {
        Self { keyring }
    }

    /// Persist `grant` as the credential for `audience`, replacing any
    /// previous one.
    pub async fn save_grant(&self, audience: &str, grant: AuthorizationGrant) -> Result<()> {
        let user_name = user_name(&grant)?;
        let item = Item {
            audience: audience.to_string(),
            user_name,
            grant,
        };
        self.set_item(&item).await?;
        info!(audience, user_name = %item.user_name, grant_type = %item.grant.grant_type, "saved grant");
        Ok(())
    }

    pub async fn load_grant(&self, audience: &str) -> Result<AuthorizationGrant> {
        Ok(self.get_item(audience).await?.grant)
    }

    /// Identity stored for `audience`.
    pub async fn who_am_i(&self, audience: &str) -> Result<String> {
        Ok(self.get_item(audience).await?.user_name)
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.keyring
            .keys()
            .await
            .map_err(|e| Error::StoreRead(e.to_string()))
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let removed = self
            .keyring
            .remove(key)
            .await
            .map_err(|e| Error::StoreWrite(e.to_string()))?;
        debug!(key, removed, "remove keyring item");
        Ok(())
    }

    /// Remove every stored credential.
    ///
    /// A failed removal does not stop the others; the last failure is
    /// returned once every key has been tried.
    pub async fn logout(&self) -> Result<()> {
        let mut last_error = None;
        for key in self.keys().await? {
            if let Err(e) = self.remove(&key).await {
                warn!(key, error = %e, "failed to remove keyring item");
                last_error = Some(e);
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => {
                info!("removed all stored credentials");
                Ok(())
            }
        }
    }

    pub async fn get_item(&self, audience: &str) -> Result<Item> {
        let entry = self
            .keyring
            .get(&hash_key(audience))
            .await
            .map_err(|e| Error::StoreRead(e.to_string()))?
            .ok_or(Error::NoAuthenticationData)?;

        let grant: AuthorizationGrant = serde_json::from_str(&entry.data).map_err(|e| {
            debug!(audience, error = %e, "undecodable keyring item");
            Error::UnsupportedAuthData
        })?;
        grant.validate()?;
        Ok(Item {
            audience: audience.to_string(),
            user_name: entry.label,
            grant,
        })
    }

    pub async fn set_item(&self, item: &Item) -> Result<()> {
        let data =
            serde_json::to_string(&item.grant).map_err(|e| Error::StoreWrite(e.to_string()))?;
        self.keyring
            .set(KeyringItem {
                key: hash_key(&item.audience),
                label: item.user_name.clone(),
                data,
            })
            .await
            .map_err(|e| Error::StoreWrite(e.to_string()))
    }
}

fn user_name(grant: &AuthorizationGrant) -> Result<String> {
    match grant.grant_type {
        GrantType::ClientCredentials => grant
            .client_credentials
            .as_ref()
            .map(|key_file| key_file.client_email.clone())
            .ok_or(Error::UnsupportedAuthData),
        GrantType::DeviceCode => {
            let token = grant.token.as_ref().ok_or(Error::UnsupportedAuthData)?;
            extract_user_name(token)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::keyring::MemoryKeyring;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use pulsar_oauth2::keyfile::KEY_FILE_TYPE_SERVICE_ACCOUNT;
    use pulsar_oauth2::{ErrorKind, KeyFile, Token};

    pub(crate) fn jwt_for(user: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let claims = serde_json::json!({ "https://streamnative.io/username": user });
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.")
    }

    pub(crate) fn key_file() -> KeyFile {
        KeyFile {
            key_type: KEY_FILE_TYPE_SERVICE_ACCOUNT.into(),
            client_id: "cid".into(),
            client_secret: "secret".into(),
            client_email: "svc@example.iam".into(),
        }
    }

    pub(crate) fn device_token(user: &str, refresh: &str) -> Token {
        Token {
            access_token: jwt_for(user),
            token_type: "bearer".into(),
            refresh_token: refresh.into(),
            expiry: None,
        }
    }

    fn store() -> (Arc<MemoryKeyring>, KeyringStore) {
        let keyring = Arc::new(MemoryKeyring::new());
        (keyring.clone(), KeyringStore::new(keyring))
    }

    #[test]
    fn hash_key_is_hex_sha1() {
        assert_eq!(hash_key("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(hash_key("").len(), 40);
    }

    #[tokio::test]
    async fn client_credentials_grant_labelled_by_email() {
        let (keyring, store) = store();
        store
            .save_grant("aud", AuthorizationGrant::client_credentials(key_file(), None))
            .await
            .unwrap();

        let entry = keyring.get(&hash_key("aud")).await.unwrap().unwrap();
        assert_eq!(entry.label, "svc@example.iam");
        assert_eq!(store.who_am_i("aud").await.unwrap(), "svc@example.iam");

        let grant = store.load_grant("aud").await.unwrap();
        assert_eq!(grant.client_credentials, Some(key_file()));
    }

    #[tokio::test]
    async fn device_code_grant_labelled_by_username_claim() {
        let (_, store) = store();
        let token = device_token("alice@example.com", "rt");
        store
            .save_grant("aud", AuthorizationGrant::device_code(token.clone()))
            .await
            .unwrap();

        assert_eq!(store.who_am_i("aud").await.unwrap(), "alice@example.com");
        assert_eq!(store.load_grant("aud").await.unwrap().token, Some(token));
    }

    #[tokio::test]
    async fn device_code_grant_without_username_claim_is_rejected() {
        let (_, store) = store();
        let token = Token {
            access_token: "not-a-jwt".into(),
            ..Default::default()
        };
        let err = store
            .save_grant("aud", AuthorizationGrant::device_code(token))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialUnusable);
    }

    #[tokio::test]
    async fn missing_audience_is_unavailable() {
        let (_, store) = store();
        let err = store.load_grant("aud").await.unwrap_err();
        assert!(matches!(err, Error::NoAuthenticationData));
        assert!(err.requires_login());
    }

    #[tokio::test]
    async fn undecodable_record_is_unusable() {
        let (keyring, store) = store();
        keyring
            .set(KeyringItem {
                key: hash_key("aud"),
                label: "x".into(),
                data: "{broken".into(),
            })
            .await
            .unwrap();

        let err = store.load_grant("aud").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedAuthData));
        assert_eq!(err.to_string(), "authentication data is not usable");
    }

    #[tokio::test]
    async fn client_credentials_record_without_key_file_is_unusable() {
        let (keyring, store) = store();
        let data = serde_json::json!({ "type": "client_credentials" });
        keyring
            .set(KeyringItem {
                key: hash_key("aud"),
                label: "x".into(),
                data: data.to_string(),
            })
            .await
            .unwrap();

        let err = store.load_grant("aud").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedAuthData));
    }

    #[tokio::test]
    async fn keyring_data_is_the_grant_record() {
        let (keyring, store) = store();
        store
            .save_grant("aud", AuthorizationGrant::client_credentials(key_file(), None))
            .await
            .unwrap();

        let entry = keyring.get(&hash_key("aud")).await.unwrap().unwrap();
        let data: serde_json::Value = serde_json::from_str(&entry.data).unwrap();
        assert_eq!(data["type"], "client_credentials");
        assert_eq!(data["client_credentials"]["client_id"], "cid");
        assert!(data.get("audience").is_none());
        assert!(data.get("user_name").is_none());
    }

    #[tokio::test]
    async fn loads_grant_record_written_by_other_clients() {
        let (keyring, store) = store();
        let data = serde_json::json!({
            "type": "device_code",
            "token": {
                "access_token": jwt_for("bob@example.com"),
                "token_type": "bearer",
                "refresh_token": "rt",
                "expiry": "2030-01-01T00:00:00Z"
            }
        });
        keyring
            .set(KeyringItem {
                key: hash_key("urn:sn:pulsar:test"),
                label: "bob@example.com".into(),
                data: data.to_string(),
            })
            .await
            .unwrap();

        let item = store.get_item("urn:sn:pulsar:test").await.unwrap();
        assert_eq!(item.audience, "urn:sn:pulsar:test");
        assert_eq!(item.user_name, "bob@example.com");
        assert_eq!(item.grant.grant_type, GrantType::DeviceCode);
        assert_eq!(item.grant.token.unwrap().refresh_token, "rt");
    }

    #[tokio::test]
    async fn logout_removes_every_key() {
        let (_, store) = store();
        store
            .save_grant("aud-1", AuthorizationGrant::client_credentials(key_file(), None))
            .await
            .unwrap();
        store
            .save_grant("aud-2", AuthorizationGrant::client_credentials(key_file(), None))
            .await
            .unwrap();
        assert_eq!(store.keys().await.unwrap().len(), 2);

        store.logout().await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
        assert!(matches!(
            store.load_grant("aud-1").await,
            Err(Error::NoAuthenticationData)
        ));
    }

    struct ReadOnlyKeyring;

    impl Keyring for ReadOnlyKeyring {
        fn get<'a>(&'a self, _key: &'a str) -> pulsar_oauth2::BoxFuture<'a, Result<Option<KeyringItem>>> {
            Box::pin(async { Ok(None) })
        }

        fn set(&self, _item: KeyringItem) -> pulsar_oauth2::BoxFuture<'_, Result<()>> {
            Box::pin(async { Err(Error::Io("read-only file system".into())) })
        }

        fn remove<'a>(&'a self, _key: &'a str) -> pulsar_oauth2::BoxFuture<'a, Result<bool>> {
            Box::pin(async { Err(Error::Io("read-only file system".into())) })
        }

        fn keys(&self) -> pulsar_oauth2::BoxFuture<'_, Result<Vec<String>>> {
            Box::pin(async { Ok(vec![hash_key("aud")]) })
        }
    }

    #[tokio::test]
    async fn keyring_write_failures_are_store_write_errors() {
        let store = KeyringStore::new(Arc::new(ReadOnlyKeyring));

        let err = store
            .save_grant("aud", AuthorizationGrant::client_credentials(key_file(), None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreWriteFailure);
        assert_eq!(
            err.to_string(),
            "unable to update the keyring: I/O error: read-only file system"
        );

        let err = store.logout().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreWriteFailure);
    }

    /// Refuses to remove one key; everything else behaves like memory.
    struct StickyKeyring {
        inner: MemoryKeyring,
        sticky: String,
    }

    impl Keyring for StickyKeyring {
        fn get<'a>(&'a self, key: &'a str) -> pulsar_oauth2::BoxFuture<'a, Result<Option<KeyringItem>>> {
            self.inner.get(key)
        }

        fn set(&self, item: KeyringItem) -> pulsar_oauth2::BoxFuture<'_, Result<()>> {
            self.inner.set(item)
        }

        fn remove<'a>(&'a self, key: &'a str) -> pulsar_oauth2::BoxFuture<'a, Result<bool>> {
            if key == self.sticky {
                Box::pin(async { Err(Error::Io("item is locked".into())) })
            } else {
                self.inner.remove(key)
            }
        }

        fn keys(&self) -> pulsar_oauth2::BoxFuture<'_, Result<Vec<String>>> {
            self.inner.keys()
        }
    }

    #[tokio::test]
    async fn logout_keeps_going_after_a_failed_removal() {
        let keyring = Arc::new(StickyKeyring {
            inner: MemoryKeyring::new(),
            sticky: hash_key("aud-1"),
        });
        let store = KeyringStore::new(keyring.clone());
        for audience in ["aud-1", "aud-2", "aud-3"] {
            store
                .save_grant(audience, AuthorizationGrant::client_credentials(key_file(), None))
                .await
                .unwrap();
        }

        let err = store.logout().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreWriteFailure);
        assert_eq!(store.keys().await.unwrap(), vec![hash_key("aud-1")]);
    }
}
