//! `pulsarctl get <path>`: authenticated GET against the admin REST API

use anyhow::{Context, Result, anyhow, bail};
use reqwest::header::{ACCEPT, HeaderValue};
use tower::ServiceExt;
use tracing::debug;
use transport::Authentication;

use crate::commands::{auth_factory, http_client};
use crate::config::Config;

pub async fn run(config: &Config, path: &str) -> Result<()> {
    let url = admin_url(&config.admin.web_service_url, path)?;
    let client = http_client()?;

    let authentication = if config.oauth2.audience.is_empty() {
        Authentication::Anonymous
    } else {
        auth_factory(config, client.clone())
            .await?
            .authentication(&config.oauth2.audience)
            .await?
    };
    debug!(url = %url, ?authentication, "sending admin request");

    let mut request = reqwest::Request::new(reqwest::Method::GET, url.clone());
    request
        .headers_mut()
        .insert(ACCEPT, HeaderValue::from_static("application/json"));

    let response = authentication
        .service(client)
        .oneshot(request)
        .await
        .map_err(|e| anyhow!(e))
        .with_context(|| format!("request to {url} failed"))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("failed to read response from {url}"))?;
    if !status.is_success() {
        bail!("{url} returned {status}: {body}");
    }

    println!("{}", pretty(&body));
    Ok(())
}

/// Join the admin base URL and a request path.
fn admin_url(base: &str, path: &str) -> Result<reqwest::Url> {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    reqwest::Url::parse(&joined).with_context(|| format!("invalid admin URL: {joined}"))
}

/// Pretty-print JSON bodies; anything else is returned as is.
fn pretty(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| body.to_string()),
        Err(_) => body.to_string(),
    }
}
