use axum::Json;

use crate::error::Result;
use crate::session::{Claim, Session};

/// `GET /api/user`: identity of the logged-in client.
pub async fn handler(session: Session) -> Result<Json<Claim>> {
    Ok(Json(session.require()?))
}
