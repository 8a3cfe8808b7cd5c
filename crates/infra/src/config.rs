//! Queue tuning knobs.
//!
//! Plain values only; reading them from the environment is the binary's job.

use chrono::Duration;

use courier_core::{DomainError, DomainResult};

/// Bounds on worker leases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    /// Lease granted when the worker does not ask for one.
    pub default_seconds: u64,
    /// Longest lease a worker may request.
    pub max_seconds: u64,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            default_seconds: 120,
            max_seconds: 3600,
        }
    }
}

impl LeasePolicy {
    /// Turn a requested lease (seconds) into a duration, applying the default.
    pub fn resolve(&self, requested: Option<u64>) -> DomainResult<Duration> {
        let seconds = requested.unwrap_or(self.default_seconds);
        if seconds == 0 {
            return Err(DomainError::invalid_input("lease must be at least 1 second"));
        }
        if seconds > self.max_seconds {
            return Err(DomainError::invalid_input(format!(
                "lease of {seconds}s exceeds the maximum of {}s",
                self.max_seconds
            )));
        }
        i64::try_from(seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                DomainError::invalid_input(format!("lease of {seconds}s is out of range"))
            })
    }
}

/// CSV export settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportConfig {
    /// Submissions fetched per page while streaming.
    pub page_size: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { page_size: 500 }
    }
}

/// Everything the queue services need besides a store and a clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueConfig {
    pub lease: LeasePolicy,
    pub export: ExportConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_defaults_and_bounds() {
        let policy = LeasePolicy::default();
        assert_eq!(policy.resolve(None).unwrap(), Duration::seconds(120));
        assert_eq!(policy.resolve(Some(1)).unwrap(), Duration::seconds(1));
        assert_eq!(policy.resolve(Some(3600)).unwrap(), Duration::seconds(3600));

        assert!(matches!(policy.resolve(Some(0)), Err(DomainError::InvalidInput(_))));
        assert!(matches!(policy.resolve(Some(3601)), Err(DomainError::InvalidInput(_))));
    }
}
