//! OAuth client credentials as downloaded from the Google Cloud Console.

use std::path::{Path, PathBuf};

use gdata_core::{Error, Result};
use serde::Deserialize;
use tracing::debug;

/// An OAuth 2.0 client id and secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// The console's JSON, either nested under `installed`/`web` or flat.
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: String,
}

impl OAuthCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// `<config dir>/gdata/client_secret.json`, when a config dir exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("gdata").join("client_secret.json"))
    }

    /// Loads credentials from [`default_path`](Self::default_path).
    ///
    /// # Errors
    ///
    /// Returns invalid-argument if there is no config directory or the file
    /// cannot be read or parsed.
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path()
            .ok_or_else(|| Error::invalid_argument("No configuration directory available"))?;
        Self::from_file(path)
    }

    /// Loads credentials from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns invalid-argument if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading OAuth client credentials");
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_argument(format!(
                "Failed to read credentials file {}: {e}",
                path.display()
            ))
            .with_source(e)
        })?;
        Self::from_json(&content)
    }

    /// Parses `{"installed": {...}}`, `{"web": {...}}`, or a flat
    /// `{"client_id": ..., "client_secret": ...}` object.
    ///
    /// # Errors
    ///
    /// Returns invalid-argument for malformed JSON or missing fields.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CredentialsFile = serde_json::from_str(json).map_err(|e| {
            Error::invalid_argument(format!("Failed to parse credentials JSON: {e}")).with_source(e)
        })?;
        if let Some(section) = file.installed.or(file.web) {
            return Ok(Self::new(section.client_id, section.client_secret));
        }
        match (file.client_id, file.client_secret) {
            (Some(id), Some(secret)) => Ok(Self::new(id, secret)),
            _ => Err(Error::invalid_argument(
                "Credentials need an 'installed' or 'web' section, or a top-level client_id and client_secret",
            )),
        }
    }

    /// Checks the fields look like a registered Google client.
    ///
    /// # Errors
    ///
    /// Returns invalid-argument naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(Error::invalid_argument("client_id is required"));
        }
        if !self.client_id.ends_with(".apps.googleusercontent.com") {
            return Err(Error::invalid_argument(
                "client_id should end with .apps.googleusercontent.com",
            ));
        }
        if self.client_secret.is_empty() {
            return Err(Error::invalid_argument("client_secret is required"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdata_core::ErrorKind;
    use std::io::Write;

    #[test]
    fn validation() {
        assert!(OAuthCredentials::new("id.apps.googleusercontent.com", "secret")
            .validate()
            .is_ok());
        for (id, secret) in [
            ("", "secret"),
            ("bad-id", "secret"),
            ("id.apps.googleusercontent.com", ""),
        ] {
            let err = OAuthCredentials::new(id, secret).validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn nested_sections() {
        let installed = r#"{"installed": {"client_id": "a.apps.googleusercontent.com", "client_secret": "s", "project_id": "p"}}"#;
        let web = r#"{"web": {"client_id": "w.apps.googleusercontent.com", "client_secret": "ws"}}"#;
        assert_eq!(
            OAuthCredentials::from_json(installed).unwrap(),
            OAuthCredentials::new("a.apps.googleusercontent.com", "s")
        );
        assert_eq!(OAuthCredentials::from_json(web).unwrap().client_secret, "ws");
    }

    #[test]
    fn flat_object_ignores_extra_fields() {
        let json = r#"{"client_id": "f.apps.googleusercontent.com", "client_secret": "fs", "refresh_token": "r"}"#;
        let credentials = OAuthCredentials::from_json(json).unwrap();
        assert_eq!(credentials.client_id, "f.apps.googleusercontent.com");
    }

    #[test]
    fn missing_fields_and_malformed_json() {
        let err = OAuthCredentials::from_json(r#"{"other": {}}"#).unwrap_err();
        assert!(err.message().contains("client_id"));
        let err = OAuthCredentials::from_json("not json").unwrap_err();
        assert!(err.message().contains("parse"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"installed": {{"client_id": "t.apps.googleusercontent.com", "client_secret": "ts"}}}}"#
        )
        .unwrap();
        let credentials = OAuthCredentials::from_file(file.path()).unwrap();
        assert_eq!(credentials.client_secret, "ts");

        let dir = tempfile::tempdir().unwrap();
        let err = OAuthCredentials::from_file(dir.path().join("missing.json")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
