//! Authorization grants
//!
//! [`AuthorizationGrant`] is the persisted record; [`Grant`] is the live,
//! refreshable credential rebuilt from it. The record's `type` tag selects the
//! variant in exactly one place, [`Grant::from_record`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::exchange::{
    ClientCredentialsExchangeRequest, RefreshTokenExchangeRequest, TokenExchanger,
};
use crate::issuer::Issuer;
use crate::keyfile::KeyFile;
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    ClientCredentials,
    DeviceCode,
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantType::ClientCredentials => f.write_str("client_credentials"),
            GrantType::DeviceCode => f.write_str("device_code"),
        }
    }
}

/// Persisted form of a grant, one per audience in the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    #[serde(rename = "type")]
    pub grant_type: GrantType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_credentials: Option<KeyFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,
}

impl AuthorizationGrant {
    pub fn client_credentials(key_file: KeyFile, token: Option<Token>) -> Self {
        Self {
            grant_type: GrantType::ClientCredentials,
            client_credentials: Some(key_file),
            token,
        }
    }

    pub fn device_code(token: Token) -> Self {
        Self {
            grant_type: GrantType::DeviceCode,
            client_credentials: None,
            token: Some(token),
        }
    }

    /// Reject records whose shape does not match their type.
    pub fn validate(&self) -> Result<()> {
        match self.grant_type {
            GrantType::ClientCredentials if self.client_credentials.is_none() => {
                Err(Error::UnsupportedAuthData)
            }
            GrantType::DeviceCode if self.token.is_none() => Err(Error::UnsupportedAuthData),
            _ => Ok(()),
        }
    }
}

/// A refreshable credential bound to one audience.
pub enum Grant {
    ClientCredentials(ClientCredentialsGrant),
    DeviceCode(DeviceCodeGrant),
}

impl Grant {
    /// Rebuild a live grant from its persisted record.
    pub fn from_record(
        issuer: &Issuer,
        audience: &str,
        record: AuthorizationGrant,
        exchanger: Arc<dyn TokenExchanger>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        record.validate()?;
        match record.grant_type {
            GrantType::ClientCredentials => {
                let key_file = record.client_credentials.ok_or(Error::UnsupportedAuthData)?;
                Ok(Grant::ClientCredentials(ClientCredentialsGrant::new(
                    audience, key_file, record.token, exchanger, clock,
                )))
            }
            GrantType::DeviceCode => {
                let token = record.token.ok_or(Error::UnsupportedAuthData)?;
                Ok(Grant::DeviceCode(DeviceCodeGrant::new(
                    issuer.client_id.clone(),
                    audience,
                    token,
                    exchanger,
                    clock,
                )))
            }
        }
    }

    /// Obtain a fresh access token.
    pub async fn refresh(&mut self) -> Result<Token> {
        match self {
            Grant::ClientCredentials(grant) => grant.refresh().await,
            Grant::DeviceCode(grant) => grant.refresh().await,
        }
    }

    pub fn grant_type(&self) -> GrantType {
        match self {
            Grant::ClientCredentials(_) => GrantType::ClientCredentials,
            Grant::DeviceCode(_) => GrantType::DeviceCode,
        }
    }

    pub fn audience(&self) -> &str {
        match self {
            Grant::ClientCredentials(grant) => &grant.audience,
            Grant::DeviceCode(grant) => &grant.audience,
        }
    }

    /// Current persisted form of the grant.
    pub fn to_record(&self) -> AuthorizationGrant {
        match self {
            Grant::ClientCredentials(grant) => {
                AuthorizationGrant::client_credentials(grant.key_file.clone(), grant.token.clone())
            }
            Grant::DeviceCode(grant) => AuthorizationGrant::device_code(grant.token.clone()),
        }
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grant")
            .field("type", &self.grant_type())
            .field("audience", &self.audience())
            .finish_non_exhaustive()
    }
}

/// Grant backed by service account credentials; refreshing re-runs the
/// client credentials exchange.
pub struct ClientCredentialsGrant {
    audience: String,
    key_file: KeyFile,
    token: Option<Token>,
    exchanger: Arc<dyn TokenExchanger>,
    clock: Arc<dyn Clock>,
}

impl ClientCredentialsGrant {
    pub fn new(
        audience: impl Into<String>,
        key_file: KeyFile,
        token: Option<Token>,
        exchanger: Arc<dyn TokenExchanger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            audience: audience.into(),
            key_file,
            token,
            exchanger,
            clock,
        }
    }

    pub fn key_file(&self) -> &KeyFile {
        &self.key_file
    }

    pub async fn refresh(&mut self) -> Result<Token> {
        debug!(audience = %self.audience, "exchanging client credentials");
        let request = ClientCredentialsExchangeRequest {
            client_id: self.key_file.client_id.clone(),
            client_secret: self.key_file.client_secret.clone(),
            audience: self.audience.clone(),
        };
        let result = self
            .exchanger
            .exchange_client_credentials(request)
            .await
            .map_err(|e| e.context("could not exchange client credentials"))?;

        let token = Token::from_result(result, self.clock.as_ref());
        self.token = Some(token.clone());
        Ok(token)
    }
}

/// Grant obtained through the device code flow; refreshing needs the refresh
/// token issued at login.
pub struct DeviceCodeGrant {
    client_id: String,
    audience: String,
    token: Token,
    exchanger: Arc<dyn TokenExchanger>,
    clock: Arc<dyn Clock>,
}

impl DeviceCodeGrant {
    pub fn new(
        client_id: impl Into<String>,
        audience: impl Into<String>,
        token: Token,
        exchanger: Arc<dyn TokenExchanger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            audience: audience.into(),
            token,
            exchanger,
            clock,
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Exchanger errors are returned unwrapped. A response without a refresh
    /// token keeps the current one (RFC 6749 §1.5: issuing a new one is optional).
    pub async fn refresh(&mut self) -> Result<Token> {
        if !self.token.has_refresh_token() {
            return Err(Error::GrantExpired);
        }

        debug!(audience = %self.audience, "exchanging refresh token");
        let request = RefreshTokenExchangeRequest {
            client_id: self.client_id.clone(),
            refresh_token: self.token.refresh_token.clone(),
        };
        let mut result = self.exchanger.exchange_refresh_token(request).await?;

        if result.refresh_token.is_empty() {
            result.refresh_token = self.token.refresh_token.clone();
        }

        self.token = Token::from_result(result, self.clock.as_ref());
        Ok(self.token.clone())
    }
}
