//! Job/submission queue with leased claims.
//!
//! ## Components
//!
//! - `SubmissionStore` / `JobStore`: persistence contracts (in-memory or Postgres)
//! - `SubmissionService`: reads, progress logs and outcome reports
//! - `LeaseManager`: hands out at-most-one-active-lease claims (`claim_next`)
//! - `RetryEngine`: bounded re-queue of failures and counter recompute
//! - `JobController`: create, cancel, export and delete at the job level
//!
//! ## Leases
//!
//! Expiry is passive. Nothing sweeps expired leases; a `running` submission
//! whose `lease_until` has passed simply becomes eligible again at the next
//! `claim_next`. Every claim mints a new `LeaseToken`, so a worker that lost
//! its lease is rejected with `StaleLease` when it reports.

pub mod controller;
pub mod export;
pub mod in_memory;
pub mod lease;
pub mod postgres;
pub mod query;
pub mod retry;
pub mod store;
pub mod submissions;

pub use controller::JobController;
pub use export::{CsvExport, CsvStream};
pub use in_memory::InMemoryQueueStore;
pub use lease::LeaseManager;
pub use postgres::PostgresQueueStore;
pub use query::{Page, Pagination, SubmissionFilter};
pub use retry::RetryEngine;
pub use store::{JobStore, QueueError, QueueStore, SubmissionStore};
pub use submissions::SubmissionService;
