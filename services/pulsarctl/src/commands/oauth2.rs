//! `pulsarctl oauth2 ...`

use anyhow::{Context, Result};
use pulsar_oauth2::{ClientCredentialsFlow, DeviceCodeFlow, DeviceCodeFlowOptions};
use tracing::info;

use crate::commands::{auth_factory, http_client};
use crate::config::Config;
use crate::prompt;

/// Interactive login through the device authorization grant.
pub async fn login(config: &Config, scopes: Vec<String>, allow_refresh: bool) -> Result<()> {
    let issuer = config.login_issuer()?;
    let client = http_client()?;

    let mut additional_scopes = config.oauth2.scope.clone();
    for scope in scopes {
        if !additional_scopes.contains(&scope) {
            additional_scopes.push(scope);
        }
    }
    let options = DeviceCodeFlowOptions {
        additional_scopes,
        allow_refresh,
    };

    let flow = DeviceCodeFlow::with_defaults(
        issuer.clone(),
        options,
        Some(prompt::device_code_callback()),
        client.clone(),
    )
    .await
    .with_context(|| format!("failed to contact issuer {}", issuer.issuer_endpoint))?;
    let (grant, _) = flow.authorize(&issuer.audience).await?;

    let factory = auth_factory(config, client).await?;
    factory.save_grant(&grant).await?;
    let user = factory.who_am_i(&issuer.audience).await?;
    info!(audience = %issuer.audience, user = %user, "device login complete");
    println!("Logged in as {user}.");
    Ok(())
}

/// Service account login with the configured key file.
pub async fn activate(config: &Config) -> Result<()> {
    let (issuer, key_file) = config.activate_issuer()?;
    let client = http_client()?;

    let flow = ClientCredentialsFlow::with_defaults(issuer.clone(), key_file, client.clone())
        .await
        .with_context(|| format!("failed to contact issuer {}", issuer.issuer_endpoint))?;
    let (grant, _) = flow.authorize(&issuer.audience).await?;

    let factory = auth_factory(config, client).await?;
    factory.save_grant(&grant).await?;
    let user = factory.who_am_i(&issuer.audience).await?;
    info!(audience = %issuer.audience, user = %user, "service account activated");
    println!("Logged in as {user}.");
    Ok(())
}

pub async fn whoami(config: &Config) -> Result<()> {
    let audience = config.audience()?;
    let factory = auth_factory(config, http_client()?).await?;
    let user = factory.who_am_i(audience).await?;
    println!("{user}");
    Ok(())
}

pub async fn logout(config: &Config) -> Result<()> {
    let factory = auth_factory(config, http_client()?).await?;
    factory.logout().await?;
    println!("Logged out.");
    Ok(())
}

/// Print a valid access token, refreshing it first if needed.
pub async fn token(config: &Config) -> Result<()> {
    let audience = config.audience()?;
    let factory = auth_factory(config, http_client()?).await?;
    let provider = factory.token_provider(audience).await?;
    let token = provider.token().await?;
    println!("{}", token.access_token);
    Ok(())
}
