//! Error handler for civiceye.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::ValidationErrors;

use crate::identity::AuthExchangeError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("SQL request failed: {0}")]
    Sql(#[from] sqlx::Error),

    /// A row with the same unique key already exists.
    #[error("a user with the same identity already exists")]
    Conflict,

    #[error("identity exchange failed: {0}")]
    AuthExchange(#[from] AuthExchangeError),

    #[error("not logged in")]
    NotAuthenticated,

    #[error("session token cannot be handled: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ServerError {
    /// Wrap any error as an internal one.
    pub fn internal<E>(details: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            details: details.to_owned(),
            source: Some(Box::new(source)),
        }
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseError {
    /// Machine-readable error code.
    pub error: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update machine-readable `error` code.
    pub fn code(mut self, code: &str) -> Self {
        self.error = code.into();
        self
    }

    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            error: "internal_error".to_owned(),
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            errors: None,
        }
    }
}

/// One invalid field of a request.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields: Vec<FieldError> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| issue.code.to_string()),
            })
        })
        .collect();
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    fields
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .code("invalid_body")
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => response
                .code("invalid_report")
                .details("Missing required fields.")
                .errors(validation_errors),

            ServerError::Axum(rejection) => {
                response.details(&rejection.body_text())
            },

            ServerError::NotAuthenticated => response
                .code("not_authenticated")
                .title("Not logged in.")
                .details("No valid session was found for this request.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::RateLimited => response
                .code("rate_limited")
                .title("Too many requests.")
                .status(StatusCode::TOO_MANY_REQUESTS),

            ServerError::AuthExchange(err) => response
                .code("auth_failed")
                .title("Login failed.")
                .details(&err.to_string())
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Sql(err) => {
                tracing::error!(error = %err, "database request failed");
                ResponseError::default()
            },

            ServerError::Conflict | ServerError::Token(_) => {
                tracing::error!(error = %self, "unrecovered error");
                ResponseError::default()
            },

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");
                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "error": "internal_error",
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": "",
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
