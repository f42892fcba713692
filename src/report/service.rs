use crate::error::Result;
use crate::report::{NewReport, Report, ReportBody, ReportRepository};

/// Accept and read hazard reports.
///
/// The `reporter` field is free text: nothing ties it to the session of
/// the submitter.
#[derive(Clone, Debug)]
pub struct ReportService {
    reports: ReportRepository,
}

impl ReportService {
    /// Create a new [`ReportService`].
    pub fn new(reports: ReportRepository) -> Self {
        Self { reports }
    }

    /// Validate then save a submitted report.
    pub async fn submit(&self, body: ReportBody) -> Result<Report> {
        let report = NewReport::try_from(body)?;
        let report = self.reports.insert(&report).await?;

        count_submission();
        tracing::info!(report_id = report.id, kind = %report.kind, "report submitted");

        Ok(report)
    }

    /// Every report, newest first.
    pub async fn list(&self) -> Result<Vec<Report>> {
        self.reports.list().await
    }
}

/// `type` is free text, so it never becomes a label.
fn count_submission() {
    metrics::counter!("reports_submitted_total").increment(1);
}

#[cfg(test)]
mod tests {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use sqlx::SqlitePool;

    use super::*;
    use crate::error::ServerError;

    fn service(pool: SqlitePool) -> ReportService {
        ReportService::new(ReportRepository::new(pool))
    }

    #[sqlx::test]
    async fn test_submit_then_list(pool: SqlitePool) {
        let service = service(pool);
        let body = ReportBody {
            reporter: Some("anonymous".into()),
            kind: Some("Fallen tree".into()),
            description: Some("Blocks the bike lane".into()),
            lat: Some(-33.86),
            lng: Some(151.2),
            image: Some("data:image/png;base64,iVBORw0KGgo=".into()),
        };

        let report = service.submit(body).await.unwrap();
        assert_eq!(report.reporter, "anonymous");
        assert_eq!(
            report.image.as_deref(),
            Some("data:image/png;base64,iVBORw0KGgo=")
        );
        assert_eq!(service.list().await.unwrap(), vec![report]);
    }

    #[sqlx::test]
    async fn test_submit_missing_fields(pool: SqlitePool) {
        let service = service(pool);
        let body = ReportBody {
            reporter: Some("ada".into()),
            ..Default::default()
        };

        let result = service.submit(body).await;
        match result {
            Err(ServerError::Validation(errors)) => {
                let fields = errors.field_errors();
                assert_eq!(fields.len(), 4);
                for field in ["description", "lat", "lng"] {
                    assert!(fields.contains_key(field), "{field} should be invalid");
                }
            },
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(service.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_single_submission_series() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            for _ in 0..50 {
                count_submission();
            }
        });

        let rendered = handle.render();
        let series: Vec<&str> = rendered
            .lines()
            .filter(|line| line.starts_with("reports_submitted_total"))
            .collect();
        assert_eq!(series, ["reports_submitted_total 50"]);
    }
}
