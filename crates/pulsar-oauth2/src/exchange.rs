//! Token endpoint exchanges
//!
//! Three grant types are exchanged at the token endpoint, all as form posts:
//! 1. Client credentials (service accounts)
//! 2. Device code (interactive login, polled until the user finishes)
//! 3. Refresh token (renewing a device-code login)
//!
//! [`TokenExchanger`] is the seam the flows and grants depend on;
//! [`TokenRetriever`] is the HTTP implementation.

use std::time::Duration;

use common::Secret;
use serde::Deserialize;
use tracing::debug;

use crate::BoxFuture;
use crate::error::{Error, Result};
use crate::issuer::WellKnownEndpoints;
use crate::token::TokenResult;

const GRANT_TYPE_CLIENT_CREDENTIALS: &str = "client_credentials";
const GRANT_TYPE_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const GRANT_TYPE_REFRESH_TOKEN: &str = "refresh_token";

/// Extra delay added to the poll interval when the server answers `slow_down`.
const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// Floor for the device code poll interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentialsExchangeRequest {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub audience: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCodeExchangeRequest {
    pub client_id: String,
    pub device_code: String,
    pub poll_interval: Duration,
    /// Lifetime of the device code; zero means polling is bounded only by
    /// the server answering `expired_token`
    pub expires_in: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenExchangeRequest {
    pub client_id: String,
    pub refresh_token: String,
}

/// Performs grant exchanges against an authorization server.
///
/// `exchange_device_code` is expected to block until the user completes the
/// browser step, denies it, or the device code expires.
pub trait TokenExchanger: Send + Sync {
    fn exchange_client_credentials(
        &self,
        request: ClientCredentialsExchangeRequest,
    ) -> BoxFuture<'_, Result<TokenResult>>;

    fn exchange_device_code(
        &self,
        request: DeviceCodeExchangeRequest,
    ) -> BoxFuture<'_, Result<TokenResult>>;

    fn exchange_refresh_token(
        &self,
        request: RefreshTokenExchangeRequest,
    ) -> BoxFuture<'_, Result<TokenResult>>;
}

/// Error body returned by the token endpoint (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

impl OAuthErrorResponse {
    fn into_error(self, status: reqwest::StatusCode) -> Error {
        if self.error_description.is_empty() {
            Error::TokenExchange(format!("token endpoint returned {status}: {}", self.error))
        } else {
            Error::TokenExchange(format!(
                "token endpoint returned {status}: {} ({})",
                self.error, self.error_description
            ))
        }
    }
}

/// HTTP token exchanger for a discovered token endpoint.
#[derive(Debug, Clone)]
pub struct TokenRetriever {
    client: reqwest::Client,
    token_endpoint: String,
}

impl TokenRetriever {
    pub fn new(client: reqwest::Client, token_endpoint: impl Into<String>) -> Self {
        Self {
            client,
            token_endpoint: token_endpoint.into(),
        }
    }

    pub fn from_endpoints(client: reqwest::Client, endpoints: &WellKnownEndpoints) -> Self {
        Self::new(client, endpoints.token_endpoint.clone())
    }

    /// POST a form to the token endpoint.
    ///
    /// The outer `Result` is a transport failure; the inner one separates a
    /// token from an OAuth error response so that the device code poller can
    /// react to `authorization_pending` and `slow_down`.
    async fn request_token(
        &self,
        form: &[(&str, &str)],
    ) -> Result<std::result::Result<TokenResult, (reqwest::StatusCode, OAuthErrorResponse)>> {
        let response = self
            .client
            .post(&self.token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<TokenResult>()
                .await
                .map(Ok)
                .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")));
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        match serde_json::from_str::<OAuthErrorResponse>(&body) {
            Ok(oauth_error) => Ok(Err((status, oauth_error))),
            Err(_) => Err(Error::TokenExchange(format!(
                "token endpoint returned {status}: {body}"
            ))),
        }
    }

    async fn exchange_once(&self, form: &[(&str, &str)]) -> Result<TokenResult> {
        self.request_token(form)
            .await?
            .map_err(|(status, oauth_error)| oauth_error.into_error(status))
    }

    async fn poll_device_code(&self, request: DeviceCodeExchangeRequest) -> Result<TokenResult> {
        let form = [
            ("grant_type", GRANT_TYPE_DEVICE_CODE),
            ("device_code", request.device_code.as_str()),
            ("client_id", request.client_id.as_str()),
        ];
        let mut interval = request.poll_interval.max(MIN_POLL_INTERVAL);
        let deadline = (!request.expires_in.is_zero())
            .then(|| tokio::time::Instant::now() + request.expires_in);

        loop {
            match self.request_token(&form).await? {
                Ok(result) => return Ok(result),
                Err((status, oauth_error)) => match next_poll_interval(interval, &oauth_error.error) {
                    Some(next) => {
                        debug!(error = %oauth_error.error, interval_ms = next.as_millis() as u64, "device authorization pending");
                        interval = next;
                    }
                    None => return Err(oauth_error.into_error(status)),
                },
            }
            if deadline.is_some_and(|deadline| tokio::time::Instant::now() + interval >= deadline) {
                return Err(Error::TokenExchange(format!(
                    "device code expired after {}s without authorization",
                    request.expires_in.as_secs()
                )));
            }
            tokio::time::sleep(interval).await;
        }
    }
}

/// Interval before the next device code poll, or `None` if polling must stop.
fn next_poll_interval(current: Duration, error: &str) -> Option<Duration> {
    match error {
        "authorization_pending" => Some(current),
        "slow_down" => Some(current + SLOW_DOWN_INCREMENT),
        _ => None,
    }
}

impl TokenExchanger for TokenRetriever {
    fn exchange_client_credentials(
        &self,
        request: ClientCredentialsExchangeRequest,
    ) -> BoxFuture<'_, Result<TokenResult>> {
        Box::pin(async move {
            self.exchange_once(&[
                ("grant_type", GRANT_TYPE_CLIENT_CREDENTIALS),
                ("client_id", request.client_id.as_str()),
                ("client_secret", request.client_secret.expose().as_str()),
                ("audience", request.audience.as_str()),
            ])
            .await
        })
    }

    fn exchange_device_code(
        &self,
        request: DeviceCodeExchangeRequest,
    ) -> BoxFuture<'_, Result<TokenResult>> {
        Box::pin(self.poll_device_code(request))
    }

    fn exchange_refresh_token(
        &self,
        request: RefreshTokenExchangeRequest,
    ) -> BoxFuture<'_, Result<TokenResult>> {
        Box::pin(async move {
            self.exchange_once(&[
                ("grant_type", GRANT_TYPE_REFRESH_TOKEN),
                ("refresh_token", request.refresh_token.as_str()),
                ("client_id", request.client_id.as_str()),
            ])
            .await
        })
    }
}
