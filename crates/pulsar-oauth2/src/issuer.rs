//! Authorization server identity and OIDC endpoint discovery

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

/// The authorization server and the protected resource tokens are issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuer {
    pub issuer_endpoint: String,
    pub client_id: String,
    pub audience: String,
}

impl Issuer {
    pub fn new(
        issuer_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            issuer_endpoint: issuer_endpoint.into(),
            client_id: client_id.into(),
            audience: audience.into(),
        }
    }
}

/// Endpoints advertised by the issuer's OpenID configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WellKnownEndpoints {
    #[serde(default)]
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub device_authorization_endpoint: String,
}

impl WellKnownEndpoints {
    /// Fetch `<issuer>/.well-known/openid-configuration`.
    pub async fn discover(client: &reqwest::Client, issuer_endpoint: &str) -> Result<Self> {
        let url = well_known_url(issuer_endpoint)?;
        debug!(%url, "discovering OIDC endpoints");

        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Http(format!("could not get well-known endpoints from {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!(
                "could not get well-known endpoints from {url}: {status}"
            )));
        }

        response
            .json::<WellKnownEndpoints>()
            .await
            .map_err(|e| Error::Http(format!("invalid OpenID configuration at {url}: {e}")))
    }
}

fn well_known_url(issuer_endpoint: &str) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(issuer_endpoint)
        .map_err(|e| Error::Config(format!("invalid issuer endpoint {issuer_endpoint:?}: {e}")))?;
    let path = format!("{}/{WELL_KNOWN_PATH}", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url)
}
