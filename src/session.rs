//! Session claims carried by signed cookies.

use std::convert::Infallible;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::identity::PendingLogin;
use crate::user::User;

pub const SESSION_COOKIE: &str = "civiceye_session";
pub const LOGIN_COOKIE: &str = "civiceye_login";
/// How long a started login stays valid.
const LOGIN_TTL: Duration = Duration::from_secs(10 * 60);

/// Authenticated identity attached to a client session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub username: String,
    pub email: String,
    pub external_id: String,
}

impl From<&User> for Claim {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            external_id: user.external_id.clone(),
        }
    }
}

/// Signed envelope around any cookie payload.
#[derive(Debug, Serialize, Deserialize)]
struct Token<T> {
    iat: u64,
    exp: u64,
    #[serde(flatten)]
    data: T,
}

/// Sign, read and clear session cookies.
#[derive(Clone)]
pub struct SessionManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    secure: bool,
}

impl SessionManager {
    /// Create a new [`SessionManager`].
    pub fn new(secret: &str, ttl: Duration, secure: bool) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
            secure,
        }
    }

    fn seal<T: Serialize>(&self, data: T, ttl: Duration) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| ServerError::internal("system clock is before 1970", err))?
            .as_secs();
        let token = Token {
            iat: now,
            exp: now + ttl.as_secs(),
            data,
        };

        Ok(encode(&Header::new(Algorithm::HS256), &token, &self.encoding)?)
    }

    /// Expired, forged or malformed tokens read as nothing.
    fn open<T: DeserializeOwned>(&self, token: &str) -> Option<T> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        decode::<Token<T>>(token, &self.decoding, &validation)
            .map(|data| data.claims.data)
            .ok()
    }

    fn cookie(&self, name: &'static str, value: String) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .build()
    }

    /// Attach `claim` to the client session.
    pub fn set(&self, jar: CookieJar, claim: &Claim) -> Result<CookieJar> {
        let token = self.seal(claim, self.ttl)?;
        Ok(jar.add(self.cookie(SESSION_COOKIE, token)))
    }

    /// Current session claim, if any.
    pub fn get(&self, jar: &CookieJar) -> Option<Claim> {
        jar.get(SESSION_COOKIE)
            .and_then(|cookie| self.open(cookie.value()))
    }

    /// Forget the current session.
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
    }

    /// Remember a started login until the provider calls back.
    pub fn set_pending(
        &self,
        jar: CookieJar,
        pending: &PendingLogin,
    ) -> Result<CookieJar> {
        let token = self.seal(pending, LOGIN_TTL)?;
        Ok(jar.add(self.cookie(LOGIN_COOKIE, token)))
    }

    /// Read and forget the started login. It can only be completed once.
    pub fn take_pending(
        &self,
        jar: CookieJar,
    ) -> (CookieJar, Option<PendingLogin>) {
        let pending = jar
            .get(LOGIN_COOKIE)
            .and_then(|cookie| self.open(cookie.value()));
        (jar.remove(Cookie::build(LOGIN_COOKIE).path("/")), pending)
    }
}

/// Session claim of the current request.
#[derive(Clone, Debug, PartialEq)]
pub struct Session(pub Option<Claim>);

impl Session {
    /// Claim of a logged-in client.
    pub fn require(self) -> Result<Claim> {
        self.0.ok_or(ServerError::NotAuthenticated)
    }
}

impl FromRequestParts<AppState> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        Ok(Session(state.session.get(&jar)))
    }
}
