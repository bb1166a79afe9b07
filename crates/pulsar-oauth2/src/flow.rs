//! Login flows
//!
//! A flow runs once per login and produces a [`Grant`] plus its first token.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::BoxFuture;
use crate::clock::{Clock, SystemClock};
use crate::device::{DeviceCodeProvider, DeviceCodeResult, LocalDeviceCodeProvider};
use crate::error::Result;
use crate::exchange::{DeviceCodeExchangeRequest, TokenExchanger, TokenRetriever};
use crate::grant::{ClientCredentialsGrant, DeviceCodeGrant, Grant};
use crate::issuer::{Issuer, WellKnownEndpoints};
use crate::keyfile::{ClientCredentialsProvider, KeyFileProvider};
use crate::token::Token;

const SCOPE_OFFLINE_ACCESS: &str = "offline_access";

/// Called with the pending device authorization before polling starts.
/// Returning an error aborts the login.
pub type DeviceCodeCallback = Box<dyn Fn(&DeviceCodeResult) -> Result<()> + Send + Sync>;

pub trait Flow: Send + Sync {
    fn authorize<'a>(&'a self, audience: &'a str) -> BoxFuture<'a, Result<(Grant, Token)>>;
}

/// Service account login.
pub struct ClientCredentialsFlow {
    issuer: Issuer,
    provider: Arc<dyn ClientCredentialsProvider>,
    exchanger: Arc<dyn TokenExchanger>,
    clock: Arc<dyn Clock>,
}

impl ClientCredentialsFlow {
    pub fn new(
        issuer: Issuer,
        provider: Arc<dyn ClientCredentialsProvider>,
        exchanger: Arc<dyn TokenExchanger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issuer,
            provider,
            exchanger,
            clock,
        }
    }

    /// Flow reading the key file at `key_file` and exchanging at the issuer's
    /// discovered token endpoint.
    pub async fn with_defaults(
        issuer: Issuer,
        key_file: impl Into<String>,
        client: reqwest::Client,
    ) -> Result<Self> {
        let endpoints = WellKnownEndpoints::discover(&client, &issuer.issuer_endpoint).await?;
        let exchanger = TokenRetriever::from_endpoints(client, &endpoints);
        Ok(Self::new(
            issuer,
            Arc::new(KeyFileProvider::new(key_file)),
            Arc::new(exchanger),
            Arc::new(SystemClock),
        ))
    }

    pub async fn authorize(&self, audience: &str) -> Result<(Grant, Token)> {
        let key_file = self
            .provider
            .client_credentials()
            .map_err(|e| e.context("could not get client credentials"))?;

        debug!(
            issuer = %self.issuer.issuer_endpoint,
            client_id = %key_file.client_id,
            audience,
            "authorizing with client credentials"
        );

        let mut grant = ClientCredentialsGrant::new(
            audience,
            key_file,
            None,
            self.exchanger.clone(),
            self.clock.clone(),
        );
        let token = grant
            .refresh()
            .await
            .map_err(|e| e.context("authentication failed using client credentials"))?;

        Ok((Grant::ClientCredentials(grant), token))
    }
}

impl Flow for ClientCredentialsFlow {
    fn authorize<'a>(&'a self, audience: &'a str) -> BoxFuture<'a, Result<(Grant, Token)>> {
        Box::pin(ClientCredentialsFlow::authorize(self, audience))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCodeFlowOptions {
    pub additional_scopes: Vec<String>,
    /// Request `offline_access` so the grant can be refreshed.
    pub allow_refresh: bool,
}

impl DeviceCodeFlowOptions {
    fn scopes(&self) -> Vec<String> {
        let mut scopes = self.additional_scopes.clone();
        if self.allow_refresh && !scopes.iter().any(|s| s == SCOPE_OFFLINE_ACCESS) {
            scopes.push(SCOPE_OFFLINE_ACCESS.to_string());
        }
        scopes
    }
}

/// Interactive login through the device authorization grant (RFC 8628).
pub struct DeviceCodeFlow {
    issuer: Issuer,
    options: DeviceCodeFlowOptions,
    code_provider: Arc<dyn DeviceCodeProvider>,
    exchanger: Arc<dyn TokenExchanger>,
    callback: Option<DeviceCodeCallback>,
    clock: Arc<dyn Clock>,
}

impl DeviceCodeFlow {
    pub fn new(
        issuer: Issuer,
        options: DeviceCodeFlowOptions,
        code_provider: Arc<dyn DeviceCodeProvider>,
        exchanger: Arc<dyn TokenExchanger>,
        callback: Option<DeviceCodeCallback>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issuer,
            options,
            code_provider,
            exchanger,
            callback,
            clock,
        }
    }

    pub async fn with_defaults(
        issuer: Issuer,
        options: DeviceCodeFlowOptions,
        callback: Option<DeviceCodeCallback>,
        client: reqwest::Client,
    ) -> Result<Self> {
        let endpoints = WellKnownEndpoints::discover(&client, &issuer.issuer_endpoint).await?;
        let code_provider = LocalDeviceCodeProvider::new(issuer.clone(), &endpoints, client.clone())?;
        let exchanger = TokenRetriever::from_endpoints(client, &endpoints);
        Ok(Self::new(
            issuer,
            options,
            Arc::new(code_provider),
            Arc::new(exchanger),
            callback,
            Arc::new(SystemClock),
        ))
    }

    pub async fn authorize(&self, audience: &str) -> Result<(Grant, Token)> {
        let scopes = self.options.scopes();
        let code = self
            .code_provider
            .get_code(&scopes)
            .await
            .map_err(|e| e.context("could not get device code"))?;

        if let Some(callback) = &self.callback {
            callback(&code)?;
        }

        info!(
            issuer = %self.issuer.issuer_endpoint,
            audience,
            interval = code.interval,
            "waiting for device authorization"
        );

        let request = DeviceCodeExchangeRequest {
            client_id: self.issuer.client_id.clone(),
            device_code: code.device_code.clone(),
            poll_interval: Duration::from_secs(code.interval),
            expires_in: Duration::from_secs(code.expires_in),
        };
        let result = self
            .exchanger
            .exchange_device_code(request)
            .await
            .map_err(|e| e.context("could not exchange code"))?;

        let token = Token::from_result(result, self.clock.as_ref());
        let grant = DeviceCodeGrant::new(
            self.issuer.client_id.clone(),
            audience,
            token.clone(),
            self.exchanger.clone(),
            self.clock.clone(),
        );
        Ok((Grant::DeviceCode(grant), token))
    }
}

impl Flow for DeviceCodeFlow {
    fn authorize<'a>(&'a self, audience: &'a str) -> BoxFuture<'a, Result<(Grant, Token)>> {
        Box::pin(DeviceCodeFlow::authorize(self, audience))
    }
}
