//! Configuration types and loading
//!
//! Precedence: CLI flags > env vars > config file > defaults. A missing config
//! file is the same as an empty one.

use std::path::{Path, PathBuf};

use clap::Args;
use pulsar_oauth2::Issuer;
use serde::Deserialize;

const DEFAULT_WEB_SERVICE_URL: &str = "http://localhost:8080";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub oauth2: OAuth2Config,
    #[serde(default)]
    pub keyring: KeyringConfig,
}

/// Admin REST API settings
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_web_service_url")]
    pub web_service_url: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            web_service_url: default_web_service_url(),
        }
    }
}

/// Authorization server settings
#[derive(Debug, Default, Deserialize)]
pub struct OAuth2Config {
    #[serde(default)]
    pub issuer_endpoint: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub audience: String,
    /// Service account key file (path, `file://` URL or `data:` URL)
    #[serde(default)]
    pub key_file: String,
    /// Extra scopes requested on device login
    #[serde(default)]
    pub scope: Vec<String>,
}

/// Credential keyring settings
#[derive(Debug, Default, Deserialize)]
pub struct KeyringConfig {
    #[serde(default)]
    pub backend: KeyringBackend,
    /// File backend location
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Where credentials are kept.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyringBackend {
    /// A 0600 JSON file under the user's config directory
    #[default]
    File,
    /// The platform secret store (needs the `keyring` feature)
    System,
}

/// Command line overrides, shared by every subcommand.
#[derive(Debug, Default, Clone, Args)]
pub struct Overrides {
    /// OAuth 2.0 issuer endpoint
    #[arg(long, global = true)]
    pub issuer_endpoint: Option<String>,
    /// OAuth 2.0 client identifier
    #[arg(long, global = true)]
    pub client_id: Option<String>,
    /// Audience of the Pulsar cluster
    #[arg(long, global = true)]
    pub audience: Option<String>,
    /// Service account key file
    #[arg(long, global = true)]
    pub key_file: Option<String>,
    /// Pulsar admin service URL
    #[arg(long, global = true)]
    pub web_service_url: Option<String>,
}

fn default_web_service_url() -> String {
    DEFAULT_WEB_SERVICE_URL.to_string()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config: Config = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e.into()),
        };

        for (var, field) in [
            ("PULSAR_ISSUER_ENDPOINT", &mut config.oauth2.issuer_endpoint),
            ("PULSAR_CLIENT_ID", &mut config.oauth2.client_id),
            ("PULSAR_AUDIENCE", &mut config.oauth2.audience),
            ("PULSAR_KEY_FILE", &mut config.oauth2.key_file),
        ] {
            if let Ok(value) = std::env::var(var) {
                *field = value;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply command line flags on top of file and environment values.
    pub fn apply(&mut self, overrides: &Overrides) -> common::Result<()> {
        for (value, field) in [
            (&overrides.issuer_endpoint, &mut self.oauth2.issuer_endpoint),
            (&overrides.client_id, &mut self.oauth2.client_id),
            (&overrides.audience, &mut self.oauth2.audience),
            (&overrides.key_file, &mut self.oauth2.key_file),
            (&overrides.web_service_url, &mut self.admin.web_service_url),
        ] {
            if let Some(value) = value {
                *field = value.clone();
            }
        }
        self.validate()
    }

    fn validate(&self) -> common::Result<()> {
        let url = &self.admin.web_service_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "web_service_url must start with http:// or https://, got: {url}"
            )));
        }
        Ok(())
    }

    /// Issuer for an interactive (device code) login.
    pub fn login_issuer(&self) -> common::Result<Issuer> {
        require(&self.oauth2.issuer_endpoint, "issuer-endpoint")?;
        require(&self.oauth2.client_id, "client-id")?;
        require(&self.oauth2.audience, "audience")?;
        Ok(self.issuer())
    }

    /// Issuer and key file for a service account login. The client id comes
    /// from the key file.
    pub fn activate_issuer(&self) -> common::Result<(Issuer, String)> {
        require(&self.oauth2.issuer_endpoint, "issuer-endpoint")?;
        require(&self.oauth2.audience, "audience")?;
        require(&self.oauth2.key_file, "key-file")?;
        Ok((self.issuer(), self.oauth2.key_file.clone()))
    }

    pub fn audience(&self) -> common::Result<&str> {
        require(&self.oauth2.audience, "audience")?;
        Ok(&self.oauth2.audience)
    }

    /// Issuer as configured, possibly with empty fields.
    pub fn issuer(&self) -> Issuer {
        Issuer::new(
            self.oauth2.issuer_endpoint.clone(),
            self.oauth2.client_id.clone(),
            self.oauth2.audience.clone(),
        )
    }

    /// Keyring file, defaulting to `~/.config/pulsar/credentials/keyring.json`.
    pub fn keyring_path(&self) -> common::Result<PathBuf> {
        if let Some(path) = &self.keyring.path {
            return Ok(path.clone());
        }
        Ok(home_dir()?.join(".config/pulsar/credentials/keyring.json"))
    }

    /// Resolve config file path from CLI arg, PULSARCTL_CONFIG env var, or the
    /// per-user default.
    pub fn resolve_path(cli_path: Option<&str>) -> common::Result<PathBuf> {
        if let Some(p) = cli_path {
            return Ok(PathBuf::from(p));
        }
        if let Ok(p) = std::env::var("PULSARCTL_CONFIG") {
            return Ok(PathBuf::from(p));
        }
        Ok(home_dir()?.join(".config/pulsar/pulsarctl.toml"))
    }
}

fn require(value: &str, flag: &str) -> common::Result<()> {
    if value.is_empty() {
        return Err(common::Error::Config(format!("required: {flag}")));
    }
    Ok(())
}

fn home_dir() -> common::Result<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| common::Error::Config("HOME is not set".into()))
}
