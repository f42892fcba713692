//! OpenID Connect client using the authorization code flow.
//!
//! Endpoints come from the provider discovery document, fetched once and
//! cached. Identity claims are read from the userinfo endpoint using the
//! access token returned by the code exchange.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde::{Deserialize, Deserializer};
use tokio::sync::OnceCell;
use url::Url;

use crate::config;
use crate::identity::{AuthExchangeError, IdentityAssertion, IdentityProvider};

/// Subset of the discovery document.
#[derive(Debug, Clone, Deserialize)]
struct Metadata {
    authorization_endpoint: String,
    token_endpoint: String,
    userinfo_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: Option<String>,
    email: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    email_verified: Option<bool>,
    name: Option<String>,
}

/// Some providers send `email_verified` as a string.
fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Lenient>::deserialize(deserializer)? {
        Some(Lenient::Bool(value)) => Some(value),
        Some(Lenient::Text(text)) => text.parse().ok(),
        None => None,
    })
}

/// Provider reachable through OpenID Connect discovery.
#[derive(Debug)]
pub struct OpenIdProvider {
    http: reqwest::Client,
    discovery_url: String,
    client_id: String,
    client_secret: String,
    scopes: String,
    metadata: OnceCell<Metadata>,
}

impl OpenIdProvider {
    /// Create a new [`OpenIdProvider`]. No request is sent before the
    /// first login.
    pub fn new(config: &config::OpenId) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("civiceye/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            discovery_url: config.discovery_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes: config.scopes.join(" "),
            metadata: OnceCell::new(),
        })
    }

    async fn metadata(&self) -> Result<&Metadata, AuthExchangeError> {
        self.metadata
            .get_or_try_init(|| async {
                let metadata = self
                    .http
                    .get(&self.discovery_url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|err| failed(err, AuthExchangeError::Discovery))?
                    .json::<Metadata>()
                    .await
                    .map_err(|err| failed(err, AuthExchangeError::Discovery))?;

                tracing::info!(
                    discovery_url = %self.discovery_url,
                    "identity provider discovered"
                );
                Ok::<_, AuthExchangeError>(metadata)
            })
            .await
    }
}

/// A timed out call fails closed like any other failure.
fn failed(
    err: reqwest::Error,
    kind: fn(reqwest::Error) -> AuthExchangeError,
) -> AuthExchangeError {
    if err.is_timeout() {
        AuthExchangeError::Timeout
    } else {
        kind(err)
    }
}

#[async_trait]
impl IdentityProvider for OpenIdProvider {
    async fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
    ) -> Result<Url, AuthExchangeError> {
        let metadata = self.metadata().await?;

        Ok(Url::parse_with_params(
            &metadata.authorization_endpoint,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", self.scopes.as_str()),
                ("state", state),
            ],
        )?)
    }

    async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<IdentityAssertion, AuthExchangeError> {
        let metadata = self.metadata().await?;

        let token = self
            .http
            .post(&metadata.token_endpoint)
            .header(header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|err| failed(err, AuthExchangeError::Token))?
            .json::<TokenResponse>()
            .await
            .map_err(|err| failed(err, AuthExchangeError::Token))?;

        let info = self
            .http
            .get(&metadata.userinfo_endpoint)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|err| failed(err, AuthExchangeError::UserInfo))?
            .json::<UserInfo>()
            .await
            .map_err(|err| failed(err, AuthExchangeError::UserInfo))?;

        IdentityAssertion::new(info.sub, info.email, info.email_verified, info.name)
    }
}
