mod repository;
mod service;

pub use repository::*;
pub use service::*;

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

const LAT_MIN: f64 = -90.0;
const LAT_MAX: f64 = 90.0;
const LNG_MIN: f64 = -180.0;
const LNG_MAX: f64 = 180.0;

/// Geographic position of a hazard.
#[derive(
    Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Validate, sqlx::FromRow,
)]
pub struct Location {
    #[validate(range(min = LAT_MIN, max = LAT_MAX, message = "Latitude must be between -90 and 90."))]
    pub lat: f64,
    #[validate(range(min = LNG_MIN, max = LNG_MAX, message = "Longitude must be between -180 and 180."))]
    pub lng: f64,
}

/// Report as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Report {
    pub id: i64,
    /// Free-text attribution chosen by the submitter.
    pub reporter: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub location: Location,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }

    Ok(())
}

/// Report submission as received from clients.
///
/// Every field is optional on the wire so a missing one is reported as a
/// validation error instead of a parsing error.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
pub struct ReportBody {
    #[validate(
        required(message = "Reporter is required."),
        custom(function = "not_blank", message = "Reporter is required.")
    )]
    pub reporter: Option<String>,
    #[serde(rename = "type")]
    #[validate(
        required(message = "Type is required."),
        custom(function = "not_blank", message = "Type is required.")
    )]
    pub kind: Option<String>,
    #[validate(
        required(message = "Description is required."),
        custom(function = "not_blank", message = "Description is required.")
    )]
    pub description: Option<String>,
    #[validate(
        required(message = "Latitude is required."),
        range(min = LAT_MIN, max = LAT_MAX, message = "Latitude must be between -90 and 90.")
    )]
    pub lat: Option<f64>,
    #[validate(
        required(message = "Longitude is required."),
        range(min = LNG_MIN, max = LNG_MAX, message = "Longitude must be between -180 and 180.")
    )]
    pub lng: Option<f64>,
    /// URL or encoded picture, kept as is.
    pub image: Option<String>,
}

/// Validated report, ready to be saved.
#[derive(Clone, Debug, PartialEq, Validate)]
pub struct NewReport {
    #[validate(custom(function = "not_blank"))]
    pub reporter: String,
    #[validate(custom(function = "not_blank"))]
    pub kind: String,
    #[validate(custom(function = "not_blank"))]
    pub description: String,
    #[validate(nested)]
    pub location: Location,
    pub image: Option<String>,
}

impl TryFrom<ReportBody> for NewReport {
    type Error = ValidationErrors;

    fn try_from(body: ReportBody) -> Result<Self, Self::Error> {
        body.validate().map_err(|mut errors| {
            // report the key clients send, not the Rust field name.
            if let Some(kind) = errors.errors_mut().remove("kind") {
                errors.errors_mut().insert(Cow::Borrowed("type"), kind);
            }
            errors
        })?;

        match body {
            ReportBody {
                reporter: Some(reporter),
                kind: Some(kind),
                description: Some(description),
                lat: Some(lat),
                lng: Some(lng),
                image,
            } => Ok(NewReport {
                reporter,
                kind,
                description,
                location: Location { lat, lng },
                image,
            }),
            // `validate` already rejected missing fields.
            _ => Err(ValidationErrors::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> ReportBody {
        ReportBody {
            reporter: Some("ada".into()),
            kind: Some("Flood".into()),
            description: Some("Water over the road".into()),
            lat: Some(0.0),
            lng: Some(-0.5),
            image: None,
        }
    }

    #[test]
    fn test_valid_body() {
        let report = NewReport::try_from(body()).unwrap();
        assert_eq!(report.location, Location { lat: 0.0, lng: -0.5 });
        assert_eq!(report.kind, "Flood");
    }

    #[test]
    fn test_each_required_field() {
        let cases: [fn(&mut ReportBody); 5] = [
            |b| b.reporter = None,
            |b| b.kind = Some("   ".into()),
            |b| b.description = Some(String::new()),
            |b| b.lat = None,
            |b| b.lng = None,
        ];

        for case in cases {
            let mut body = body();
            case(&mut body);
            let errors = NewReport::try_from(body).unwrap_err();
            assert_eq!(errors.field_errors().len(), 1);
        }
    }

    #[test]
    fn test_errors_use_wire_names() {
        let mut body = body();
        body.kind = None;
        let errors = NewReport::try_from(body).unwrap_err();
        let fields: Vec<_> = errors.field_errors().into_keys().collect();
        assert_eq!(fields, ["type"]);
    }

    #[test]
    fn test_out_of_range_location() {
        let mut body = body();
        body.lat = Some(91.0);
        body.lng = Some(-181.0);
        let errors = NewReport::try_from(body).unwrap_err();
        assert_eq!(errors.field_errors().len(), 2);
    }

    #[test]
    fn test_wire_format() {
        let body: ReportBody = serde_json::from_value(serde_json::json!({
            "reporter": "ada",
            "type": "Sinkhole",
            "description": "Hole",
            "lat": 48.85,
            "lng": 2.35,
        }))
        .unwrap();
        assert_eq!(body.kind.as_deref(), Some("Sinkhole"));
        assert_eq!(body.image, None);
    }
}
