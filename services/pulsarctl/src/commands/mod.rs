pub mod get;
pub mod oauth2;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use auth_store::{AuthFactory, FileKeyring, Keyring, KeyringStore};
use tracing::debug;

use crate::config::{Config, KeyringBackend};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build HTTP client")
}

/// Factory over the configured keyring.
pub async fn auth_factory(config: &Config, client: reqwest::Client) -> Result<AuthFactory> {
    let keyring = open_keyring(config).await?;
    let store = Arc::new(KeyringStore::new(keyring));
    Ok(AuthFactory::new(config.issuer(), store, client))
}

async fn open_keyring(config: &Config) -> Result<Arc<dyn Keyring>> {
    match config.keyring.backend {
        KeyringBackend::File => {
            let path = config.keyring_path()?;
            debug!(path = %path.display(), "opening file keyring");
            let keyring = FileKeyring::open(path.clone())
                .await
                .with_context(|| format!("failed to open keyring {}", path.display()))?;
            Ok(Arc::new(keyring))
        }
        KeyringBackend::System => system_keyring(),
    }
}

#[cfg(feature = "keyring")]
fn system_keyring() -> Result<Arc<dyn Keyring>> {
    use auth_store::secret_store::DEFAULT_SERVICE_NAME;
    use auth_store::{SecretStoreKeyring, SystemSecretStore};

    debug!(service = DEFAULT_SERVICE_NAME, "opening system keyring");
    Ok(Arc::new(SecretStoreKeyring::new(SystemSecretStore::new(
        DEFAULT_SERVICE_NAME,
    ))))
}

#[cfg(not(feature = "keyring"))]
fn system_keyring() -> Result<Arc<dyn Keyring>> {
    anyhow::bail!("pulsarctl was built without system keyring support (enable the `keyring` feature)")
}
