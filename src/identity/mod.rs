//! Federated identity: provider seam, assertion and linking to local users.

mod linker;
mod openid;

pub use linker::*;
pub use openid::*;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Reasons an external login cannot produce a usable identity.
#[derive(Debug, Error)]
pub enum AuthExchangeError {
    #[error("provider discovery document cannot be fetched")]
    Discovery(#[source] reqwest::Error),

    #[error("provider endpoint is not a valid URL")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("authorization code exchange failed")]
    Token(#[source] reqwest::Error),

    #[error("user information cannot be fetched")]
    UserInfo(#[source] reqwest::Error),

    #[error("identity provider did not answer in time")]
    Timeout,

    #[error("identity provider returned `{0}`")]
    Denied(String),

    #[error("missing authorization code")]
    MissingCode,

    #[error("login state does not match")]
    StateMismatch,

    #[error("assertion has no subject identifier")]
    MissingSubject,

    #[error("assertion has no email")]
    MissingEmail,

    #[error("email is not verified by the identity provider")]
    UnverifiedEmail,
}

/// Identity asserted by the provider after a successful exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct IdentityAssertion {
    pub subject: String,
    pub email: String,
    pub name: Option<String>,
}

impl IdentityAssertion {
    /// Check provider claims and build an [`IdentityAssertion`].
    pub fn new(
        subject: Option<String>,
        email: Option<String>,
        email_verified: Option<bool>,
        name: Option<String>,
    ) -> Result<Self, AuthExchangeError> {
        let subject = subject
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .ok_or(AuthExchangeError::MissingSubject)?;
        let email = email
            .map(|e| e.trim().to_owned())
            .filter(|e| e.contains('@') && !e.starts_with('@'))
            .ok_or(AuthExchangeError::MissingEmail)?;

        if email_verified == Some(false) {
            return Err(AuthExchangeError::UnverifiedEmail);
        }

        Ok(Self {
            subject,
            email,
            name: name
                .map(|n| n.trim().to_owned())
                .filter(|n| !n.is_empty()),
        })
    }

    /// Display name, or the local part of the email when the provider
    /// gave none.
    pub fn username(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self
                .email
                .split('@')
                .next()
                .unwrap_or_default()
                .to_owned(),
        }
    }
}

/// External OpenID-style identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to start a login.
    async fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
    ) -> Result<Url, AuthExchangeError>;

    /// Exchange an authorization code for an identity.
    async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<IdentityAssertion, AuthExchangeError>;
}
