//! Hazard report submission and listing.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::Result;
use crate::report::{Report, ReportBody};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
}

/// `POST /api/report`.
pub async fn create(
    State(state): State<AppState>,
    body: std::result::Result<Json<ReportBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Response>)> {
    let Json(body) = body?;
    state.reports.submit(body).await?;

    Ok((StatusCode::CREATED, Json(Response { success: true })))
}

/// `GET /api/reports`: newest first.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Report>>> {
    Ok(Json(state.reports.list().await?))
}
