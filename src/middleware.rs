//! Middlewares for routes.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use civiceye_limits::extract::client_key;

use crate::AppState;
use crate::error::{Result, ServerError};

/// Reject clients going over the sliding-window limit.
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response> {
    let key = client_key(&req, state.config.rate_limit.trust_forwarded_for);

    if state.limiter.check(&key) {
        Ok(next.run(req).await)
    } else {
        tracing::warn!(client = %key, "rate limit exceeded");
        metrics::counter!("rate_limited_total").increment(1);
        Err(ServerError::RateLimited)
    }
}
