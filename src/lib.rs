//! civiceye collects geotagged civic hazard reports and signs users in
//! through an external OpenID Connect provider.
#![forbid(unsafe_code)]

pub mod config;
mod database;
pub mod error;
pub mod identity;
mod middleware;
pub mod report;
mod router;
pub mod session;
pub mod telemetry;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use civiceye_limits::RateLimiter;
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use config::Configuration;
use identity::{IdentityLinker, OpenIdProvider};
use report::{ReportRepository, ReportService};
use session::SessionManager;
use user::UserRepository;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const GENERATED_SECRET_LENGTH: usize = 64;
const STRICT_TRANSPORT_SECURITY: &str = "max-age=31536000; includeSubDomains";

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
    cookie: Option<&str>,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// `Cookie` header sending back every cookie set by `response`.
/// Expired cookies are left out.
#[cfg(test)]
pub fn cookies(response: &axum::http::Response<axum::body::Body>) -> String {
    use axum_extra::extract::cookie::Cookie;

    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| Cookie::parse(value.to_owned()).ok())
        .filter(|cookie| !cookie.value().is_empty())
        .map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
        .collect::<Vec<_>>()
        .join("; ")
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub session: SessionManager,
    pub linker: IdentityLinker,
    pub reports: ReportService,
    pub limiter: Arc<RateLimiter>,
}

fn cors(config: &config::Cors) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    if config.origins.is_empty() {
        return layer.allow_origin(Any).allow_headers(Any);
    }

    // Credentials cannot be allowed together with a wildcard.
    let origins = config
        .origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(%origin, error = %err, "ignored CORS origin");
                None
            },
        })
        .collect::<Vec<_>>();

    layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Create router.
pub fn app(state: AppState) -> Router {
    // HSTS is only meaningful once served over TLS.
    let hsts = state
        .config
        .https()
        .then(|| HeaderValue::from_static(STRICT_TRANSPORT_SECURITY));

    let middleware = ServiceBuilder::new()
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            header::SET_COOKIE,
        ]))
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, REQUEST_TIMEOUT))
        // Add CORS preflight support.
        .layer(cors(&state.config.cors))
        // Security headers, unless a handler set its own.
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::STRICT_TRANSPORT_SECURITY,
            hsts,
        ));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::handler))
        // Federated login.
        .route("/api/auth/login", get(router::auth::login))
        .route(router::auth::CALLBACK_PATH, get(router::auth::callback))
        .route("/api/auth/logout", get(router::auth::logout))
        // `GET /api/user` reads the session.
        .route("/api/user", get(router::user::handler))
        .route("/api/report", post(router::report::create))
        .route("/api/reports", get(router::report::list))
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(middleware)
        .with_state(state)
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Arc<Configuration>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let secret = if config.session.secret.is_empty() {
        tracing::warn!(
            "missing `SESSION_SECRET`, sessions will not survive a restart"
        );
        Alphanumeric.sample_string(&mut OsRng, GENERATED_SECRET_LENGTH)
    } else {
        config.session.secret.clone()
    };
    let session = SessionManager::new(
        &secret,
        Duration::from_secs(config.session.ttl_secs),
        config.secure_cookies(),
    );

    if config.openid.client_id.is_empty() {
        tracing::warn!("missing `OIDC_CLIENT_ID`, logins will be refused");
    }
    let provider = Arc::new(OpenIdProvider::new(&config.openid)?);

    // open database and execute migrations scripts.
    let db = database::Database::new(&config.database).await?;

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.maximum_requests,
        Duration::from_secs(config.rate_limit.window_secs),
    ));

    Ok(AppState {
        session,
        linker: IdentityLinker::new(UserRepository::new(db.sqlite.clone()), provider),
        reports: ReportService::new(ReportRepository::new(db.sqlite)),
        limiter,
        config,
    })
}
