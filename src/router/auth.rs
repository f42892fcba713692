//! Login through the identity provider.
//!
//! Both ends of the flow answer with redirects: the browser is mid-login
//! and never sees a JSON error.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use url::Url;

use crate::AppState;
use crate::error::Result;
use crate::identity::Callback;
use crate::router::{found, page};
use crate::session::Claim;

pub const CALLBACK_PATH: &str = "/api/auth/callback";
const AUTH_FAILED: &str = "auth_failed";

fn failure(state: &AppState) -> Result<Url> {
    let mut url = page(&state.config, &state.config.pages.login)?;
    url.query_pairs_mut().append_pair("error", AUTH_FAILED);
    Ok(url)
}

fn success(state: &AppState, claim: &Claim) -> Result<Url> {
    let mut url = page(&state.config, &state.config.pages.login)?;
    url.query_pairs_mut()
        .append_pair("success", "1")
        .append_pair("username", &claim.username)
        .append_pair("email", &claim.email);
    Ok(url)
}

/// `GET /api/auth/login`: send the browser to the identity provider.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response> {
    let redirect_uri = page(&state.config, CALLBACK_PATH)?;

    match state.linker.begin(redirect_uri.as_str()).await {
        Ok((pending, url)) => {
            let jar = state.session.set_pending(jar, &pending)?;
            Ok((jar, found(&url)).into_response())
        },
        Err(err) => {
            tracing::error!(error = %err, "login cannot start");
            metrics::counter!("logins_total", "outcome" => "failure").increment(1);
            Ok(found(&failure(&state)?))
        },
    }
}

/// `GET /api/auth/callback`: complete the login and open a session.
pub async fn callback(
    State(state): State<AppState>,
    query: std::result::Result<Query<Callback>, QueryRejection>,
    jar: CookieJar,
) -> Result<Response> {
    let callback = query.map(|Query(q)| q).unwrap_or_default();
    let (jar, pending) = state.session.take_pending(jar);
    let redirect_uri = page(&state.config, CALLBACK_PATH)?;

    match state
        .linker
        .complete(callback, pending.as_ref(), redirect_uri.as_str())
        .await
    {
        Ok(user) => {
            let claim = Claim::from(&user);
            let jar = state.session.set(jar, &claim)?;

            metrics::counter!("logins_total", "outcome" => "success").increment(1);
            tracing::info!(user_id = user.id, "user logged in");

            Ok((jar, found(&success(&state, &claim)?)).into_response())
        },
        Err(err) => {
            metrics::counter!("logins_total", "outcome" => "failure").increment(1);
            tracing::warn!(error = %err, "login failed");

            Ok((jar, found(&failure(&state)?)).into_response())
        },
    }
}

/// `GET /api/auth/logout`: forget the session.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response> {
    let home = page(&state.config, &state.config.pages.home)?;
    Ok((state.session.clear(jar), found(&home)).into_response())
}
