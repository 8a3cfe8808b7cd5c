//! Postgres-backed queue store.
//!
//! ## Locking
//!
//! Every mutating operation runs in one transaction and takes row locks in
//! the same order: submission rows first, then the owning job row. Counter
//! deltas are written in the same transaction as the submission change, so
//! the cached counters only drift if the database itself loses a write.
//!
//! `claim_next` selects with `FOR UPDATE SKIP LOCKED`: concurrent claimers
//! skip rows another transaction is already claiming instead of waiting on
//! them, and can never both win the same row.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | QueueError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Domain(Conflict)` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use courier_core::{DomainError, JobId, LeaseToken, SubmissionId};
use courier_jobs::{
    Evidence, Job, JobCounts, JobStatus, Submission, SubmissionStatus, TerminalReport,
};

use super::query::{Page, Pagination, SubmissionFilter};
use super::store::{JobStore, QueueError, Recomputed, SubmissionStore};

/// Idempotent schema, applied by [`PostgresQueueStore::migrate`].
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id               UUID PRIMARY KEY,
    name             TEXT NOT NULL,
    message_template TEXT NOT NULL,
    status           TEXT NOT NULL,
    count_total      BIGINT NOT NULL DEFAULT 0,
    count_pending    BIGINT NOT NULL DEFAULT 0,
    count_running    BIGINT NOT NULL DEFAULT 0,
    count_success    BIGINT NOT NULL DEFAULT 0,
    count_failed     BIGINT NOT NULL DEFAULT 0,
    created_at       TIMESTAMPTZ NOT NULL,
    updated_at       TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS submissions (
    id          UUID PRIMARY KEY,
    job_id      UUID NOT NULL REFERENCES jobs (id) ON DELETE CASCADE,
    website_id  TEXT NOT NULL,
    position    INTEGER NOT NULL,
    status      TEXT NOT NULL,
    attempt     INTEGER NOT NULL DEFAULT 0,
    lease_until TIMESTAMPTZ,
    lease_token UUID,
    last_error  TEXT,
    logs        TEXT[] NOT NULL DEFAULT '{}',
    evidence    JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at  TIMESTAMPTZ NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL,
    UNIQUE (job_id, position)
);

CREATE INDEX IF NOT EXISTS submissions_claim_idx
    ON submissions (created_at, position)
    WHERE status IN ('pending', 'running');

CREATE INDEX IF NOT EXISTS jobs_created_idx ON jobs (created_at DESC);
"#;

const SUBMISSION_COLUMNS: &str = "id, job_id, website_id, position, status, attempt, lease_until, \
     lease_token, last_error, logs, evidence, created_at, updated_at";

const JOB_COLUMNS: &str = "id, name, message_template, status, count_total, count_pending, \
     count_running, count_success, count_failed, created_at, updated_at";

/// Postgres-backed job and submission store.
#[derive(Debug, Clone)]
pub struct PostgresQueueStore {
    pool: Arc<PgPool>,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), QueueError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, QueueError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    /// Lock a submission, apply `f`, write it back and fold any status change
    /// into the job counters. Returns the updated submission.
    async fn mutate_submission(
        &self,
        operation: &'static str,
        id: SubmissionId,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Submission) -> Result<(), DomainError>,
    ) -> Result<Submission, QueueError> {
        let mut tx = self.begin().await?;

        let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?
            .ok_or_else(|| QueueError::submission_not_found(id))?;
        let mut sub = submission_from_row(&row)?;

        let before = sub.status;
        f(&mut sub)?;
        save_submission(&mut tx, &sub, operation).await?;

        if before != sub.status {
            apply_job_delta(&mut tx, sub.job_id, before, sub.status, 1, now).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(sub)
    }
}

#[async_trait::async_trait]
impl SubmissionStore for PostgresQueueStore {
    #[instrument(skip(self), fields(submission_id = %id), err)]
    async fn get_submission(&self, id: SubmissionId) -> Result<Submission, QueueError> {
        let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_submission", e))?
            .ok_or_else(|| QueueError::submission_not_found(id))?;
        submission_from_row(&row)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn list_by_job(
        &self,
        job_id: JobId,
        filter: SubmissionFilter,
        pagination: Pagination,
    ) -> Result<Page<Submission>, QueueError> {
        ensure_job_exists(&self.pool, job_id).await?;
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM submissions \
             WHERE job_id = $1 AND ($2::text IS NULL OR status = $2)",
        )
        .bind(job_id.as_uuid())
        .bind(status)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_submissions", e))?;

        let sql = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions \
             WHERE job_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY position LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query(&sql)
            .bind(job_id.as_uuid())
            .bind(status)
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_submissions", e))?;

        let items = rows
            .iter()
            .map(submission_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, to_u64(total), pagination))
    }

    #[instrument(skip(self), fields(lease_secs = lease.num_seconds()), err)]
    async fn claim_next(
        &self,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Submission>, QueueError> {
        let mut tx = self.begin().await?;

        let sql = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions \
             WHERE status = 'pending' \
                OR (status = 'running' AND (lease_until IS NULL OR lease_until < $1)) \
             ORDER BY created_at, job_id, position \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED"
        );
        let Some(row) = sqlx::query(&sql)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("claim_next", e))?
        else {
            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("commit_transaction", e))?;
            return Ok(None);
        };

        let mut sub = submission_from_row(&row)?;
        let before = sub.claim(lease, now)?;
        save_submission(&mut tx, &sub, "claim_next").await?;
        if before != sub.status {
            apply_job_delta(&mut tx, sub.job_id, before, sub.status, 1, now).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        tracing::debug!(submission_id = %sub.id, attempt = sub.attempt, "submission claimed");
        Ok(Some(sub))
    }

    #[instrument(skip(self, token, lines), fields(submission_id = %id, lines = lines.len()), err)]
    async fn append_log(
        &self,
        id: SubmissionId,
        token: LeaseToken,
        lines: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<Submission, QueueError> {
        self.mutate_submission("append_log", id, now, |s| s.append_logs(token, lines, now))
            .await
    }

    #[instrument(skip(self, token), fields(submission_id = %id), err)]
    async fn extend_lease(
        &self,
        id: SubmissionId,
        token: LeaseToken,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Submission, QueueError> {
        self.mutate_submission("extend_lease", id, now, |s| s.extend_lease(token, lease, now))
            .await
    }

    #[instrument(skip(self, report), fields(submission_id = %id, outcome = %report.outcome), err)]
    async fn set_terminal(
        &self,
        id: SubmissionId,
        report: TerminalReport,
        now: DateTime<Utc>,
    ) -> Result<Submission, QueueError> {
        self.mutate_submission("set_terminal", id, now, |s| s.report(report, now).map(|_| ()))
            .await
    }
}

#[async_trait::async_trait]
impl JobStore for PostgresQueueStore {
    #[instrument(
        skip(self, job, submissions),
        fields(job_id = %job.id, targets = submissions.len()),
        err
    )]
    async fn insert_job(&self, job: Job, submissions: Vec<Submission>) -> Result<(), QueueError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            "INSERT INTO jobs (id, name, message_template, status, count_total, count_pending, \
             count_running, count_success, count_failed, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(job.id.as_uuid())
        .bind(&job.name)
        .bind(&job.message_template)
        .bind(job.status.as_str())
        .bind(to_i64(job.counts.total))
        .bind(to_i64(job.counts.pending))
        .bind(to_i64(job.counts.running))
        .bind(to_i64(job.counts.success))
        .bind(to_i64(job.counts.failed))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;

        let ids: Vec<uuid::Uuid> = submissions.iter().map(|s| *s.id.as_uuid()).collect();
        let website_ids: Vec<String> = submissions.iter().map(|s| s.website_id.clone()).collect();
        let positions: Vec<i32> = submissions.iter().map(|s| s.position as i32).collect();
        let statuses: Vec<&str> = submissions.iter().map(|s| s.status.as_str()).collect();
        let created: Vec<DateTime<Utc>> = submissions.iter().map(|s| s.created_at).collect();

        sqlx::query(
            "INSERT INTO submissions \
                (id, job_id, website_id, position, status, created_at, updated_at) \
             SELECT t.id, $1, t.website_id, t.position, t.status, t.created_at, t.created_at \
             FROM UNNEST($2::uuid[], $3::text[], $4::int4[], $5::text[], $6::timestamptz[]) \
                AS t(id, website_id, position, status, created_at)",
        )
        .bind(job.id.as_uuid())
        .bind(&ids)
        .bind(&website_ids)
        .bind(&positions)
        .bind(&statuses)
        .bind(&created)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_submissions", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get_job(&self, id: JobId) -> Result<Job, QueueError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?
            .ok_or_else(|| QueueError::job_not_found(id))?;
        job_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn list_jobs(&self, pagination: Pagination) -> Result<Page<Job>, QueueError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_jobs", e))?;

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_jobs", e))?;

        let items = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, to_u64(total), pagination))
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn cancel_job(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, QueueError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            "SELECT id FROM submissions \
             WHERE job_id = $1 AND status IN ('pending', 'running') \
             ORDER BY id FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_open_submissions", e))?;

        let mut job = lock_job(&mut tx, id).await?;
        if job.cancel(now) {
            sqlx::query(
                "UPDATE submissions \
                 SET status = 'cancelled', lease_until = NULL, lease_token = NULL, updated_at = $2 \
                 WHERE job_id = $1 AND status IN ('pending', 'running')",
            )
            .bind(id.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("cancel_submissions", e))?;
            save_job(&mut tx, &job, "cancel_job").await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(job)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn delete_job(&self, id: JobId, now: DateTime<Utc>) -> Result<(), QueueError> {
        let mut tx = self.begin().await?;

        sqlx::query("SELECT id FROM submissions WHERE job_id = $1 ORDER BY id FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_submissions", e))?;
        lock_job(&mut tx, id).await?;

        let leased: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM submissions \
             WHERE job_id = $1 AND status = 'running' AND lease_until > $2",
        )
        .bind(id.as_uuid())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("count_active_leases", e))?;
        if leased > 0 {
            return Err(DomainError::conflict(format!(
                "job {id} has {leased} submission(s) under an active lease"
            ))
            .into());
        }

        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_job", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn retry_failed(
        &self,
        id: JobId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        let mut tx = self.begin().await?;

        let picked: Vec<uuid::Uuid> = if limit == 0 {
            Vec::new()
        } else {
            sqlx::query_scalar(
                "SELECT id FROM submissions \
                 WHERE job_id = $1 AND status = 'failed' \
                 ORDER BY created_at, position \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED",
            )
            .bind(id.as_uuid())
            .bind(i64::from(limit))
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("pick_failed", e))?
        };

        let mut job = lock_job(&mut tx, id).await?;
        job.ensure_retryable()?;

        let retried = if picked.is_empty() {
            0
        } else {
            sqlx::query(
                "UPDATE submissions \
                 SET status = 'pending', last_error = NULL, lease_until = NULL, \
                     lease_token = NULL, updated_at = $2 \
                 WHERE id = ANY($1)",
            )
            .bind(&picked)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("retry_failed", e))?
            .rows_affected()
        };

        if retried > 0 {
            job.counts
                .apply_n(SubmissionStatus::Failed, SubmissionStatus::Pending, retried);
            job.updated_at = now;
            job.settle(now);
            save_job(&mut tx, &job, "retry_failed").await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(retried)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn recompute_counts(
        &self,
        id: JobId,
        now: DateTime<Utc>,
    ) -> Result<Recomputed, QueueError> {
        let mut tx = self.begin().await?;
        let mut job = lock_job(&mut tx, id).await?;

        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM submissions WHERE job_id = $1 GROUP BY status",
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("tally_submissions", e))?;

        let mut counts = JobCounts::default();
        for row in &rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| map_sqlx_error("tally_submissions", e))?;
            let n: i64 = row
                .try_get("n")
                .map_err(|e| map_sqlx_error("tally_submissions", e))?;
            counts.add(status.parse::<SubmissionStatus>()?, to_u64(n));
        }

        let drifted = job.replace_counts(counts, now);
        if drifted {
            save_job(&mut tx, &job, "recompute_counts").await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(Recomputed { job, drifted })
    }
}

async fn ensure_job_exists(pool: &PgPool, id: JobId) -> Result<(), QueueError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM jobs WHERE id = $1)")
        .bind(id.as_uuid())
        .fetch_one(pool)
        .await
        .map_err(|e| map_sqlx_error("job_exists", e))?;
    if exists {
        Ok(())
    } else {
        Err(QueueError::job_not_found(id))
    }
}

async fn lock_job(tx: &mut Transaction<'static, Postgres>, id: JobId) -> Result<Job, QueueError> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_job", e))?
        .ok_or_else(|| QueueError::job_not_found(id))?;
    job_from_row(&row)
}

/// Move `n` submissions' worth of counters from `from` to `to` and re-derive the job status.
async fn apply_job_delta(
    tx: &mut Transaction<'static, Postgres>,
    job_id: JobId,
    from: SubmissionStatus,
    to: SubmissionStatus,
    n: u64,
    now: DateTime<Utc>,
) -> Result<(), QueueError> {
    let mut job = lock_job(tx, job_id).await?;
    job.counts.apply_n(from, to, n);
    job.updated_at = now;
    job.settle(now);
    save_job(tx, &job, "apply_job_delta").await
}

async fn save_job(
    tx: &mut Transaction<'static, Postgres>,
    job: &Job,
    operation: &'static str,
) -> Result<(), QueueError> {
    sqlx::query(
        "UPDATE jobs SET status = $2, count_total = $3, count_pending = $4, count_running = $5, \
         count_success = $6, count_failed = $7, updated_at = $8 WHERE id = $1",
    )
    .bind(job.id.as_uuid())
    .bind(job.status.as_str())
    .bind(to_i64(job.counts.total))
    .bind(to_i64(job.counts.pending))
    .bind(to_i64(job.counts.running))
    .bind(to_i64(job.counts.success))
    .bind(to_i64(job.counts.failed))
    .bind(job.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(())
}

async fn save_submission(
    tx: &mut Transaction<'static, Postgres>,
    sub: &Submission,
    operation: &'static str,
) -> Result<(), QueueError> {
    sqlx::query(
        "UPDATE submissions SET status = $2, attempt = $3, lease_until = $4, lease_token = $5, \
         last_error = $6, logs = $7, evidence = $8, updated_at = $9 WHERE id = $1",
    )
    .bind(sub.id.as_uuid())
    .bind(sub.status.as_str())
    .bind(sub.attempt as i32)
    .bind(sub.lease_until)
    .bind(sub.lease_token.map(|t| *t.as_uuid()))
    .bind(&sub.last_error)
    .bind(&sub.logs)
    .bind(serde_json::Value::Object(sub.evidence.clone()))
    .bind(sub.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(())
}

fn submission_from_row(row: &sqlx::postgres::PgRow) -> Result<Submission, QueueError> {
    let decode = |e| map_sqlx_error("decode_submission", e);

    let status: String = row.try_get("status").map_err(decode)?;
    let position: i32 = row.try_get("position").map_err(decode)?;
    let attempt: i32 = row.try_get("attempt").map_err(decode)?;
    let lease_token: Option<uuid::Uuid> = row.try_get("lease_token").map_err(decode)?;
    let evidence: serde_json::Value = row.try_get("evidence").map_err(decode)?;

    Ok(Submission {
        id: SubmissionId::from_uuid(row.try_get("id").map_err(decode)?),
        job_id: JobId::from_uuid(row.try_get("job_id").map_err(decode)?),
        website_id: row.try_get("website_id").map_err(decode)?,
        position: position.max(0) as u32,
        status: status.parse()?,
        attempt: attempt.max(0) as u32,
        lease_until: row.try_get("lease_until").map_err(decode)?,
        lease_token: lease_token.map(LeaseToken::from_uuid),
        last_error: row.try_get("last_error").map_err(decode)?,
        logs: row.try_get("logs").map_err(decode)?,
        evidence: match evidence {
            serde_json::Value::Object(map) => map,
            _ => Evidence::new(),
        },
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<Job, QueueError> {
    let decode = |e| map_sqlx_error("decode_job", e);
    let count = |column: &str| -> Result<u64, QueueError> {
        let n: i64 = row.try_get(column).map_err(decode)?;
        Ok(to_u64(n))
    };

    let status: String = row.try_get("status").map_err(decode)?;
    Ok(Job {
        id: JobId::from_uuid(row.try_get("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        message_template: row.try_get("message_template").map_err(decode)?,
        status: parse_job_status(&status)?,
        counts: JobCounts {
            total: count("count_total")?,
            pending: count("count_pending")?,
            running: count("count_running")?,
            success: count("count_success")?,
            failed: count("count_failed")?,
        },
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn parse_job_status(raw: &str) -> Result<JobStatus, QueueError> {
    raw.parse::<JobStatus>()
        .map_err(|_| QueueError::Storage(format!("unknown job status in database: {raw}")))
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

/// Map SQLx errors to QueueError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> QueueError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => DomainError::conflict(msg).into(),
                _ => QueueError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            QueueError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => QueueError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    //! These run against a real database and are skipped unless
    //! `TEST_DATABASE_URL` is set.

    use std::collections::HashSet;

    use courier_jobs::{NewJob, Outcome};
    use sqlx::postgres::PgPoolOptions;

    use super::*;

    async fn store() -> Option<Arc<PostgresQueueStore>> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(&url)
            .await
            .expect("connect to TEST_DATABASE_URL");
        let store = PostgresQueueStore::new(pool);
        store.migrate().await.expect("migrate");
        Some(Arc::new(store))
    }

    async fn seeded(store: &PostgresQueueStore, targets: usize) -> Job {
        let new = NewJob {
            name: "pg".to_string(),
            message_template: "hello".to_string(),
            website_ids: (0..targets).map(|i| format!("pg-site-{i}")).collect(),
        };
        let (job, subs) = Job::create(new, Utc::now()).unwrap();
        store.insert_job(job.clone(), subs).await.unwrap();
        job
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_claims_never_duplicate() {
        let Some(store) = store().await else { return };
        let job = seeded(&store, 40).await;

        let mut handles = Vec::new();
        for _ in 0..40 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_next(Duration::seconds(60), Utc::now()).await.unwrap()
            }));
        }

        let mut ids = HashSet::new();
        for h in handles {
            if let Some(sub) = h.await.unwrap() {
                assert!(ids.insert(sub.id));
            }
        }

        let job = store.get_job(job.id).await.unwrap();
        assert_eq!(job.counts.running as usize + job.counts.pending as usize, 40);
        let fresh = store.recompute_counts(job.id, Utc::now()).await.unwrap();
        assert!(!fresh.drifted);

        // Cancelling drops every lease, after which the job can be deleted.
        store.cancel_job(job.id, Utc::now()).await.unwrap();
        store.delete_job(job.id, Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn report_retry_and_recompute_round_trip() {
        let Some(store) = store().await else { return };
        let job = seeded(&store, 1).await;

        // Other tests may share the database; claim until we get ours.
        let mut mine = None;
        let mut foreign = Vec::new();
        while let Some(sub) = store.claim_next(Duration::seconds(60), Utc::now()).await.unwrap() {
            if sub.job_id == job.id {
                mine = Some(sub);
                break;
            }
            foreign.push(sub);
        }
        let sub = mine.expect("claimed our submission");

        let report = TerminalReport {
            lease_token: sub.lease_token.unwrap(),
            outcome: Outcome::Failed,
            error: None,
            logs: vec!["step 1".into()],
            evidence: None,
        };
        let done = store.set_terminal(sub.id, report.clone(), Utc::now()).await.unwrap();
        assert_eq!(done.status, SubmissionStatus::Failed);
        assert_eq!(done.logs, vec!["step 1".to_string()]);

        // Second report with the same token is rejected.
        let err = store.set_terminal(sub.id, report, Utc::now()).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::InvalidTransition(_))));

        assert_eq!(store.retry_failed(job.id, 10, Utc::now()).await.unwrap(), 1);
        let job = store.get_job(job.id).await.unwrap();
        assert_eq!(job.counts.pending, 1);
        assert_eq!(job.status, JobStatus::Queued);

        store.delete_job(job.id, Utc::now()).await.unwrap();
    }
}
