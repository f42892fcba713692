//! HTTP handlers.
pub mod auth;
pub mod report;
pub mod status;
pub mod user;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use url::Url;

use crate::config::Configuration;
use crate::error::{Result, ServerError};

/// `302 Found` to `location`.
pub(crate) fn found(location: &Url) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())])
        .into_response()
}

/// Absolute URL of a configured page.
pub(crate) fn page(config: &Configuration, path: &str) -> Result<Url> {
    config
        .public_url(path)
        .map_err(|err| ServerError::internal("page URL is invalid", err))
}

/// MUST NEVER be used in production.
#[cfg(test)]
pub fn state(
    pool: sqlx::SqlitePool,
    provider: std::sync::Arc<dyn crate::identity::IdentityProvider>,
) -> crate::AppState {
    use std::sync::Arc;
    use std::time::Duration;

    use civiceye_limits::RateLimiter;

    use crate::identity::IdentityLinker;
    use crate::report::{ReportRepository, ReportService};
    use crate::session::SessionManager;
    use crate::user::UserRepository;

    let config = Arc::new(Configuration::default());

    crate::AppState {
        session: SessionManager::new(
            "test-secret",
            Duration::from_secs(config.session.ttl_secs),
            false,
        ),
        linker: IdentityLinker::new(UserRepository::new(pool.clone()), provider),
        reports: ReportService::new(ReportRepository::new(pool)),
        limiter: Arc::new(RateLimiter::new(
            config.rate_limit.maximum_requests,
            Duration::from_secs(config.rate_limit.window_secs),
        )),
        config,
    }
}
