//! `courier-core`: foundation types shared by every courier crate.
//!
//! This crate is pure: identifiers, the error taxonomy and a clock seam.
//! Nothing here performs IO.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{JobId, LeaseToken, SubmissionId};
