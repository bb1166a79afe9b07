//! Service account key files for the client credentials grant

use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// The only key file `type` this client understands.
pub const KEY_FILE_TYPE_SERVICE_ACCOUNT: &str = "sn_service_account";

const FILE_SCHEME: &str = "file://";
const DATA_SCHEME: &str = "data:";

/// Service account credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFile {
    #[serde(rename = "type")]
    pub key_type: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    #[serde(default)]
    pub client_email: String,
}

impl KeyFile {
    /// Parse and validate key file JSON. `origin` names the source in errors.
    pub fn parse(json: &[u8], origin: &str) -> Result<Self> {
        let key_file: KeyFile = serde_json::from_slice(json)
            .map_err(|e| Error::Config(format!("parsing key file {origin}: {e}")))?;
        if key_file.key_type != KEY_FILE_TYPE_SERVICE_ACCOUNT {
            return Err(Error::UnsupportedFormat(origin.to_string()));
        }
        Ok(key_file)
    }
}

/// Supplies client credentials to the client credentials flow.
pub trait ClientCredentialsProvider: Send + Sync {
    fn client_credentials(&self) -> Result<KeyFile>;
}

/// Reads credentials from a key file location.
///
/// The location is either a plain path, a `file://` URL, or an inline
/// `data:application/json[;base64],<payload>` URL.
#[derive(Debug, Clone)]
pub struct KeyFileProvider {
    location: String,
}

impl KeyFileProvider {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

impl ClientCredentialsProvider for KeyFileProvider {
    fn client_credentials(&self) -> Result<KeyFile> {
        if let Some(data) = self.location.strip_prefix(DATA_SCHEME) {
            let json = decode_data_url(data)?;
            return KeyFile::parse(&json, "inline key file");
        }

        let path = PathBuf::from(
            self.location
                .strip_prefix(FILE_SCHEME)
                .unwrap_or(&self.location),
        );
        debug!(path = %path.display(), "reading key file");
        let json = std::fs::read(&path)
            .map_err(|e| Error::Io(format!("reading key file {}: {e}", path.display())))?;
        KeyFile::parse(&json, &path.display().to_string())
    }
}

fn decode_data_url(data: &str) -> Result<Vec<u8>> {
    let (media_type, payload) = data
        .split_once(',')
        .ok_or_else(|| Error::Config("malformed data URL for key file".into()))?;

    let (mime, base64) = match media_type.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (media_type, false),
    };
    if mime != "application/json" {
        return Err(Error::UnsupportedFormat(format!("data URL of type {mime:?}")));
    }

    if base64 {
        STANDARD
            .decode(payload)
            .map_err(|e| Error::Config(format!("decoding inline key file: {e}")))
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_JSON: &str = r#"{
        "type": "sn_service_account",
        "client_id": "cid",
        "client_secret": "secret",
        "client_email": "svc@example.iam"
    }"#;

    #[test]
    fn loads_key_file_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        std::fs::write(&path, KEY_JSON).unwrap();

        let key_file = KeyFileProvider::new(path.display().to_string())
            .client_credentials()
            .unwrap();
        assert_eq!(key_file.client_id, "cid");
        assert_eq!(key_file.client_secret.expose(), "secret");
        assert_eq!(key_file.client_email, "svc@example.iam");
    }

    #[test]
    fn loads_key_file_from_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        std::fs::write(&path, KEY_JSON).unwrap();

        let key_file = KeyFileProvider::new(format!("file://{}", path.display()))
            .client_credentials()
            .unwrap();
        assert_eq!(key_file.client_id, "cid");
    }

    #[test]
    fn loads_inline_data_urls() {
        let encoded = STANDARD.encode(KEY_JSON);
        let key_file = KeyFileProvider::new(format!("data:application/json;base64,{encoded}"))
            .client_credentials()
            .unwrap();
        assert_eq!(key_file.client_id, "cid");

        let compact: serde_json::Value = serde_json::from_str(KEY_JSON).unwrap();
        let key_file = KeyFileProvider::new(format!("data:application/json,{compact}"))
            .client_credentials()
            .unwrap();
        assert_eq!(key_file.client_email, "svc@example.iam");
    }

    #[test]
    fn rejects_unknown_key_type() {
        let json = KEY_JSON.replace("sn_service_account", "google_service_account");
        let err = KeyFile::parse(json.as_bytes(), "/etc/key.json").unwrap_err();
        assert_eq!(err.to_string(), "/etc/key.json: unsupported format");
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let err = KeyFileProvider::new("/nonexistent/key.json")
            .client_credentials()
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn debug_redacts_client_secret() {
        let key_file = KeyFile::parse(KEY_JSON.as_bytes(), "test").unwrap();
        let debug = format!("{key_file:?}");
        assert!(!debug.contains("\"secret\""));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn serializes_with_type_field() {
        let key_file = KeyFile::parse(KEY_JSON.as_bytes(), "test").unwrap();
        let json = serde_json::to_value(&key_file).unwrap();
        assert_eq!(json["type"], "sn_service_account");
        assert_eq!(json["client_secret"], "secret");
    }
}
