//! Configuration manager for civiceye.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Public base URL of current instance.
    pub url: String,
    /// Listening port.
    pub port: u16,
    /// Maximum accepted body size, in bytes.
    pub max_body_bytes: usize,
    #[serde(skip_deserializing)]
    pub version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to SQLite configuration.
    #[serde(skip_serializing)]
    pub database: Database,
    /// Related to session cookies.
    #[serde(skip_serializing)]
    pub session: Session,
    /// Related to the OpenID Connect provider.
    #[serde(skip_serializing)]
    pub openid: OpenId,
    /// Client-facing pages used after redirects.
    pub pages: Pages,
    #[serde(skip_serializing)]
    pub cors: Cors,
    #[serde(skip_serializing)]
    pub rate_limit: RateLimit,
    #[serde(skip_serializing)]
    pub telemetry: Option<Telemetry>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: "civiceye".into(),
            url: "http://localhost:5000/".into(),
            port: 5000,
            max_body_bytes: 10 * 1024 * 1024, // 10 MiB.
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            database: Database::default(),
            session: Session::default(),
            openid: OpenId::default(),
            pages: Pages::default(),
            cors: Cors::default(),
            rate_limit: RateLimit::default(),
            telemetry: None,
        }
    }
}

/// SQLite configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    /// Path of the database file.
    pub path: String,
    /// Maximum pool connections.
    pub pool_size: u32,
    /// Maximum time to wait for a free connection.
    pub acquire_timeout_secs: u64,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            path: "civiceye.db".into(),
            pool_size: 10,
            acquire_timeout_secs: 5,
        }
    }
}

/// Session cookie configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    /// Secret used to sign session cookies.
    pub secret: String,
    /// Lifetime of a session.
    pub ttl_secs: u64,
    /// Only send cookies over HTTPS.
    /// Defaults to whether `url` uses `https`.
    pub secure: Option<bool>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            secret: String::default(),
            ttl_secs: 60 * 60 * 24 * 7, // 7 days.
            secure: None,
        }
    }
}

/// OpenID Connect provider configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenId {
    /// Discovery document location.
    pub discovery_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Timeout for each call to the provider.
    pub timeout_secs: u64,
}

impl Default for OpenId {
    fn default() -> Self {
        Self {
            discovery_url:
                "https://accounts.google.com/.well-known/openid-configuration"
                    .into(),
            client_id: String::default(),
            client_secret: String::default(),
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
            timeout_secs: 10,
        }
    }
}

/// Client-facing pages.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pages {
    /// Page receiving login outcome.
    pub login: String,
    /// Page shown after logout.
    pub home: String,
}

impl Default for Pages {
    fn default() -> Self {
        Self {
            login: "/frontend/login.html".into(),
            home: "/".into(),
        }
    }
}

/// CORS configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Cors {
    /// Allowed origins. Any origin, without credentials, when empty.
    pub origins: Vec<String>,
}

/// Rate limit configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    /// Requests allowed per window and per client.
    pub maximum_requests: usize,
    /// Window duration.
    pub window_secs: u64,
    /// Identify clients by the `X-Forwarded-For` hop added by a reverse
    /// proxy instead of the peer address.
    pub trust_forwarded_for: bool,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            maximum_requests: 100,
            window_secs: 15 * 60,
            trust_forwarded_for: false,
        }
    }
}

/// Telemetry export configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    /// OTLP (gRPC) collector endpoint.
    pub otlp_endpoint: String,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then applies environment overrides.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = self.file_path();

        let mut config = match File::open(&file_path) {
            Ok(file) => match serde_yaml::from_reader(file) {
                Ok(config) => config,
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.version = VERSION.to_owned();
        config.url = Self::normalize_url(&config.url)?;

        Ok(Arc::new(config))
    }

    /// File to read: the requested path if it exists, `config.yaml`
    /// otherwise.
    fn file_path(&self) -> PathBuf {
        if self.path.is_file() {
            return self.path.clone();
        }

        if !self.path.as_os_str().is_empty() {
            tracing::warn!(
                path = %self.path.display(),
                fallback = DEFAULT_CONFIG_PATH,
                "configuration file not found, ignoring requested path"
            );
        }
        Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
    }

    /// Override values with the ones provided by the environment.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = var("SESSION_SECRET") {
            self.session.secret = secret;
        }
        if let Some(client_id) = var("OIDC_CLIENT_ID") {
            self.openid.client_id = client_id;
        }
        if let Some(client_secret) = var("OIDC_CLIENT_SECRET") {
            self.openid.client_secret = client_secret;
        }
        if let Some(discovery_url) = var("OIDC_DISCOVERY_URL") {
            self.openid.discovery_url = discovery_url;
        }
        if let Some(path) = var("DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(port) = var("PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
    }

    /// Whether the public URL is served over TLS.
    pub fn https(&self) -> bool {
        self.url.starts_with("https://")
    }

    /// Whether cookies must carry the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.session.secure.unwrap_or_else(|| self.https())
    }

    /// Absolute URL of a path served by this instance.
    pub fn public_url(&self, path: &str) -> Result<Url, url::ParseError> {
        Url::parse(&self.url)?.join(path)
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file cannot be read");
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            Configuration::normalize_url("civiceye.example").unwrap(),
            "https://civiceye.example/"
        );
        assert_eq!(
            Configuration::normalize_url("http://localhost:5000").unwrap(),
            "http://localhost:5000/"
        );
    }

    #[test]
    fn test_yaml_keeps_defaults() {
        let config: Configuration = serde_yaml::from_str(
            "name: hazards\nopenid:\n  client_id: abc\nrate_limit:\n  maximum_requests: 5\n",
        )
        .unwrap();

        assert_eq!(config.name, "hazards");
        assert_eq!(config.openid.client_id, "abc");
        assert_eq!(config.openid.timeout_secs, 10);
        assert_eq!(config.rate_limit.maximum_requests, 5);
        assert_eq!(config.rate_limit.window_secs, 900);
        assert_eq!(config.database, Database::default());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config =
            Configuration::default().path(PathBuf::from("missing/civiceye.yaml"));
        assert_eq!(config.file_path(), Path::new(DEFAULT_CONFIG_PATH));

        let config = Configuration::default().path(PathBuf::from("Cargo.toml"));
        assert_eq!(config.file_path(), Path::new("Cargo.toml"));
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("SESSION_SECRET", "s3cr3t"),
            ("OIDC_CLIENT_SECRET", "client-secret"),
            ("PORT", "8080"),
        ]);

        let mut config = Configuration::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.session.secret, "s3cr3t");
        assert_eq!(config.openid.client_secret, "client-secret");
        assert_eq!(config.openid.client_id, "");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_public_url() {
        let config = Configuration::default();
        assert_eq!(
            config.public_url("api/auth/callback").unwrap().as_str(),
            "http://localhost:5000/api/auth/callback"
        );
        assert_eq!(
            config.public_url("/frontend/login.html").unwrap().as_str(),
            "http://localhost:5000/frontend/login.html"
        );
        assert!(!config.secure_cookies());
    }

    #[test]
    fn test_secrets_never_serialized() {
        let mut config = Configuration::default();
        config.session.secret = "s3cr3t".into();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("s3cr3t"));
    }
}
