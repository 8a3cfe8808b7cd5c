//! Listing parameters and paginated results.

use serde::{Deserialize, Serialize};

use courier_jobs::SubmissionStatus;

/// Pagination parameters for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of items to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    /// Slice an in-memory, already ordered collection.
    pub fn apply<T>(&self, items: Vec<T>) -> Page<T> {
        let total = items.len() as u64;
        let page: Vec<T> = items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect();
        Page::new(page, total, *self)
    }
}

/// Optional filters for listing a job's submissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmissionFilter {
    pub status: Option<SubmissionStatus>,
}

impl SubmissionFilter {
    pub fn with_status(status: SubmissionStatus) -> Self {
        Self {
            status: Some(status),
        }
    }

    pub fn matches(&self, status: SubmissionStatus) -> bool {
        self.status.is_none_or(|wanted| wanted == status)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of items matching the query (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let has_more = u64::from(pagination.offset) + (items.len() as u64) < total;
        Self {
            items,
            total,
            pagination,
            has_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_capped() {
        assert_eq!(Pagination::new(Some(5000), None).limit, Pagination::MAX_LIMIT);
        assert_eq!(Pagination::new(None, None).limit, 50);
    }

    #[test]
    fn apply_slices_and_reports_more() {
        let page = Pagination::new(Some(2), Some(1)).apply(vec![1, 2, 3, 4]);
        assert_eq!(page.items, vec![2, 3]);
        assert_eq!(page.total, 4);
        assert!(page.has_more);

        let last = Pagination::new(Some(2), Some(2)).apply(vec![1, 2, 3, 4]);
        assert!(!last.has_more);
    }
}
