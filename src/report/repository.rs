//! Handle report storage.

use sqlx::SqlitePool;
use validator::Validate;

use crate::error::Result;
use crate::report::{NewReport, Report};

const COLUMNS: &str =
    "id, reporter, type, description, lat, lng, image, created_at";

#[derive(Clone, Debug)]
pub struct ReportRepository {
    pool: SqlitePool,
}

impl ReportRepository {
    /// Create a new [`ReportRepository`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Save a report. `created_at` is set by the store.
    pub async fn insert(&self, report: &NewReport) -> Result<Report> {
        report.validate()?;

        let query = format!(
            r#"INSERT INTO reports (reporter, type, description, lat, lng, image)
                VALUES (?, ?, ?, ?, ?, ?)
                RETURNING {COLUMNS}"#
        );

        Ok(sqlx::query_as::<_, Report>(&query)
            .bind(&report.reporter)
            .bind(&report.kind)
            .bind(&report.description)
            .bind(report.location.lat)
            .bind(report.location.lng)
            .bind(&report.image)
            .fetch_one(&self.pool)
            .await?)
    }

    /// Every report, newest first.
    pub async fn list(&self) -> Result<Vec<Report>> {
        let query = format!(
            "SELECT {COLUMNS} FROM reports ORDER BY created_at DESC, id DESC"
        );

        Ok(sqlx::query_as::<_, Report>(&query)
            .fetch_all(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use crate::report::Location;

    fn new_report(kind: &str) -> NewReport {
        NewReport {
            reporter: "ada".into(),
            kind: kind.into(),
            description: "Something is wrong here".into(),
            location: Location {
                lat: 48.8566,
                lng: 2.3522,
            },
            image: None,
        }
    }

    #[sqlx::test]
    async fn test_insert_round_trip(pool: SqlitePool) {
        let repo = ReportRepository::new(pool);
        let mut report = new_report("Flood");
        report.image = Some("https://img.example/flood.png".into());

        let saved = repo.insert(&report).await.unwrap();
        assert_eq!(saved.reporter, "ada");
        assert_eq!(saved.kind, "Flood");
        assert_eq!(saved.location, report.location);
        assert_eq!(saved.image.as_deref(), Some("https://img.example/flood.png"));

        assert_eq!(repo.list().await.unwrap(), vec![saved]);
    }

    #[sqlx::test]
    async fn test_list_newest_first(pool: SqlitePool) {
        let repo = ReportRepository::new(pool);
        for kind in ["A", "B", "C"] {
            repo.insert(&new_report(kind)).await.unwrap();
        }

        let kinds: Vec<String> =
            repo.list().await.unwrap().into_iter().map(|r| r.kind).collect();
        assert_eq!(kinds, ["C", "B", "A"]);
    }

    #[sqlx::test]
    async fn test_empty_list(pool: SqlitePool) {
        let repo = ReportRepository::new(pool);
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[sqlx::test]
    async fn test_insert_rejects_invalid(pool: SqlitePool) {
        let repo = ReportRepository::new(pool);

        let mut report = new_report(" ");
        report.location.lat = 120.0;
        let result = repo.insert(&report).await;
        assert!(matches!(result, Err(ServerError::Validation(_))));
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[sqlx::test]
    async fn test_zero_coordinates(pool: SqlitePool) {
        let repo = ReportRepository::new(pool);
        let mut report = new_report("Debris");
        report.location = Location { lat: 0.0, lng: 0.0 };

        let saved = repo.insert(&report).await.unwrap();
        assert_eq!(saved.location, Location { lat: 0.0, lng: 0.0 });
    }
}
