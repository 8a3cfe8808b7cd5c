//! Streaming CSV projection of a job's submissions.
//!
//! Rows are produced page by page on a background task and handed over a
//! bounded channel, so a large job is never materialized in full and a slow
//! reader applies backpressure to the store reads.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use courier_core::JobId;
use courier_jobs::Submission;

use crate::config::ExportConfig;

use super::query::{Page, Pagination, SubmissionFilter};
use super::store::{QueueError, SubmissionStore};

pub const CSV_HEADER: &str = "submission_id,job_id,website_id,position,status,attempt,\
lease_until,last_error,logs,evidence,created_at,updated_at\n";

/// Pages buffered between the reader task and the consumer.
const CHANNEL_DEPTH: usize = 4;

/// A stream of CSV text chunks. The first chunk always starts with the header.
pub type CsvStream = ReceiverStream<Result<String, QueueError>>;

#[derive(Clone)]
pub struct CsvExport {
    store: Arc<dyn SubmissionStore>,
    config: ExportConfig,
}

impl CsvExport {
    pub fn new(store: Arc<dyn SubmissionStore>, config: ExportConfig) -> Self {
        Self { store, config }
    }

    /// Start streaming the export. Fails up front if the job does not exist.
    pub async fn stream(&self, job_id: JobId) -> Result<CsvStream, QueueError> {
        let page_size = self.config.page_size.clamp(1, Pagination::MAX_LIMIT);
        let first = self
            .store
            .list_by_job(
                job_id,
                SubmissionFilter::default(),
                Pagination::new(Some(page_size), None),
            )
            .await?;

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let store = self.store.clone();

        tokio::spawn(async move {
            let mut chunk = String::from(CSV_HEADER);
            let mut page: Page<Submission> = first;

            loop {
                for sub in &page.items {
                    write_row(&mut chunk, sub);
                }
                if tx.send(Ok(std::mem::take(&mut chunk))).await.is_err() {
                    tracing::debug!(job_id = %job_id, "csv export abandoned by reader");
                    return;
                }
                if !page.has_more || page.items.is_empty() {
                    return;
                }

                let next = Pagination {
                    limit: page_size,
                    offset: page.pagination.offset + page.items.len() as u32,
                };
                page = match store.list_by_job(job_id, SubmissionFilter::default(), next).await {
                    Ok(page) => page,
                    Err(err) => {
                        tracing::error!(job_id = %job_id, error = %err, "csv export aborted");
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

impl core::fmt::Debug for CsvExport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CsvExport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn write_row(out: &mut String, sub: &Submission) {
    let evidence = serde_json::Value::Object(sub.evidence.clone()).to_string();
    let fields = [
        sub.id.to_string(),
        sub.job_id.to_string(),
        sub.website_id.clone(),
        sub.position.to_string(),
        sub.status.to_string(),
        sub.attempt.to_string(),
        sub.lease_until.map(|t| t.to_rfc3339()).unwrap_or_default(),
        sub.last_error.clone().unwrap_or_default(),
        sub.logs.join("\n"),
        evidence,
        sub.created_at.to_rfc3339(),
        sub.updated_at.to_rfc3339(),
    ];

    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_escaped(out, field);
    }
    out.push('\n');
}

/// RFC 4180 quoting: wrap in quotes when needed, doubling embedded quotes.
fn push_escaped(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use courier_core::DomainError;
    use courier_jobs::{Job, NewJob, Outcome, TerminalReport};
    use tokio_stream::StreamExt;

    use super::*;
    use crate::queue::{InMemoryQueueStore, JobStore};

    async fn collect(stream: CsvStream) -> String {
        let chunks: Vec<Result<String, QueueError>> = stream.collect().await;
        chunks.into_iter().map(|c| c.unwrap()).collect()
    }

    #[test]
    fn escapes_only_when_needed() {
        let mut out = String::new();
        push_escaped(&mut out, "plain");
        out.push('|');
        push_escaped(&mut out, "a,b");
        out.push('|');
        push_escaped(&mut out, "say \"hi\"");
        assert_eq!(out, "plain|\"a,b\"|\"say \"\"hi\"\"\"");
    }

    #[tokio::test]
    async fn streams_every_submission_across_pages() {
        let store = InMemoryQueueStore::arc();
        let now = Utc::now();
        let new = NewJob {
            name: "export".into(),
            message_template: String::new(),
            website_ids: (0..7).map(|i| format!("site-{i}")).collect(),
        };
        let (job, subs) = Job::create(new, now).unwrap();
        store.insert_job(job.clone(), subs).await.unwrap();

        let sub = store.claim_next(Duration::seconds(30), now).await.unwrap().unwrap();
        let report = TerminalReport {
            lease_token: sub.lease_token.unwrap(),
            outcome: Outcome::Failed,
            error: Some("form rejected, \"spam\"".into()),
            logs: vec!["one".into(), "two".into()],
            evidence: None,
        };
        store.set_terminal(sub.id, report, now).await.unwrap();

        let export = CsvExport::new(store.clone(), ExportConfig { page_size: 3 });
        let csv = collect(export.stream(job.id).await.unwrap()).await;

        assert!(csv.starts_with(CSV_HEADER));
        assert_eq!(csv.matches("site-").count(), 7);
        assert!(csv.contains("\"form rejected, \"\"spam\"\"\""));
        assert!(csv.contains("\"one\ntwo\""));

        // Read-only: exporting changes nothing.
        assert_eq!(store.get_job(job.id).await.unwrap().counts.failed, 1);
    }

    #[tokio::test]
    async fn unknown_job_fails_before_streaming() {
        let export = CsvExport::new(InMemoryQueueStore::arc(), ExportConfig::default());
        let err = export.stream(JobId::new()).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound(_))));
    }
}
