//! `courier-jobs`: the job/submission domain model.
//!
//! A [`Job`] is a named batch of [`Submission`]s. Submissions move through the
//! state machine in [`transition`]; every legal move is decided there and
//! nowhere else. Job counters ([`JobCounts`]) are a cache over submission
//! statuses and can always be rebuilt with [`JobCounts::tally`].

pub mod counts;
pub mod job;
pub mod status;
pub mod submission;
pub mod transition;

pub use counts::JobCounts;
pub use job::{Job, NewJob};
pub use status::{JobStatus, Outcome, SubmissionStatus};
pub use submission::{Evidence, Submission, TerminalReport};
pub use transition::{SubmissionEvent, next_status};
