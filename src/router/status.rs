//! Public instance information for front-end identification.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::config::Configuration;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    name: String,
    version: String,
}

/// `GET /status.json`.
pub async fn handler(State(config): State<Arc<Configuration>>) -> Json<Status> {
    Json(Status {
        name: config.name.clone(),
        version: config.version.clone(),
    })
}
