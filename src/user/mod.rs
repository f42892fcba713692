mod repository;

pub use repository::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Subject identifier given by the identity provider.
    pub external_id: String,
    pub created_at: DateTime<Utc>,
}

/// User not yet saved on database.
#[derive(Clone, Debug, PartialEq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub external_id: String,
}
