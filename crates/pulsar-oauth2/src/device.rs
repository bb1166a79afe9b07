//! Device authorization requests (RFC 8628 §3.1–3.2)

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::BoxFuture;
use crate::error::{Error, Result};
use crate::issuer::{Issuer, WellKnownEndpoints};

/// Poll interval the server implies when it does not send one (RFC 8628 §3.2).
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Scope always requested for device logins.
const SCOPE_OPENID: &str = "openid";

/// A pending device authorization, shown to the user once per login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCodeResult {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: String,
    /// Seconds until the device code expires
    pub expires_in: u64,
    /// Seconds to wait between token polls
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl DeviceCodeResult {
    /// The URL to send the user to, preferring the one with the code embedded.
    pub fn verification_url(&self) -> &str {
        if self.verification_uri_complete.is_empty() {
            &self.verification_uri
        } else {
            &self.verification_uri_complete
        }
    }
}

/// Requests device codes from an authorization server.
pub trait DeviceCodeProvider: Send + Sync {
    fn get_code<'a>(
        &'a self,
        additional_scopes: &'a [String],
    ) -> BoxFuture<'a, Result<DeviceCodeResult>>;
}

/// HTTP device code provider for a discovered device authorization endpoint.
#[derive(Debug, Clone)]
pub struct LocalDeviceCodeProvider {
    issuer: Issuer,
    device_authorization_endpoint: String,
    client: reqwest::Client,
}

impl LocalDeviceCodeProvider {
    pub fn new(
        issuer: Issuer,
        endpoints: &WellKnownEndpoints,
        client: reqwest::Client,
    ) -> Result<Self> {
        if endpoints.device_authorization_endpoint.is_empty() {
            return Err(Error::Config(format!(
                "issuer {} does not support the device authorization grant",
                issuer.issuer_endpoint
            )));
        }
        Ok(Self {
            issuer,
            device_authorization_endpoint: endpoints.device_authorization_endpoint.clone(),
            client,
        })
    }

    async fn request_code(&self, additional_scopes: &[String]) -> Result<DeviceCodeResult> {
        let scope = scope_param(additional_scopes);
        debug!(endpoint = %self.device_authorization_endpoint, %scope, "requesting device code");

        let response = self
            .client
            .post(&self.device_authorization_endpoint)
            .form(&[
                ("client_id", self.issuer.client_id.as_str()),
                ("scope", scope.as_str()),
                ("audience", self.issuer.audience.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("device code request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::TokenExchange(format!(
                "device authorization endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<DeviceCodeResult>()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid device code response: {e}")))
    }
}

impl DeviceCodeProvider for LocalDeviceCodeProvider {
    fn get_code<'a>(
        &'a self,
        additional_scopes: &'a [String],
    ) -> BoxFuture<'a, Result<DeviceCodeResult>> {
        Box::pin(self.request_code(additional_scopes))
    }
}

/// `openid` followed by the requested scopes, space separated, without blanks
/// or duplicates.
fn scope_param(additional_scopes: &[String]) -> String {
    let mut scopes = vec![SCOPE_OPENID];
    for scope in additional_scopes {
        let scope = scope.trim();
        if !scope.is_empty() && !scopes.contains(&scope) {
            scopes.push(scope);
        }
    }
    scopes.join(" ")
}
