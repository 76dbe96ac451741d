pub mod expiry_worker;
pub mod fulfillment_status;
pub mod order_service;
pub mod prescriptions;
pub mod reservation_service;
pub mod saga;
pub mod stock_ledger;

use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;
/// Highest page number accepted by listings.
pub const MAX_PAGE: u64 = 1_000_000;

/// One page of a patient-scoped listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

/// Normalizes 1-based page input: page defaults to 1, limit to 10 (capped at 100).
///
/// Pages past [`MAX_PAGE`] are rejected so the row offset always fits the
/// database's signed 64-bit range.
pub fn page_params(page: Option<u64>, limit: Option<u64>) -> Result<(u64, u64), ServiceError> {
    let page = page.filter(|p| *p >= 1).unwrap_or(1);
    let limit = limit
        .filter(|l| *l >= 1)
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);
    if page > MAX_PAGE {
        return Err(ServiceError::ValidationError(format!(
            "page must be at most {}",
            MAX_PAGE
        )));
    }
    Ok((page, limit))
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        Self {
            items,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_params_apply_defaults_and_cap() {
        assert_eq!(page_params(None, None).unwrap(), (1, 10));
        assert_eq!(page_params(Some(0), Some(0)).unwrap(), (1, 10));
        assert_eq!(page_params(Some(3), Some(500)).unwrap(), (3, 100));
        assert_eq!(page_params(Some(MAX_PAGE), Some(100)).unwrap(), (MAX_PAGE, 100));
    }

    #[test]
    fn oversized_page_is_rejected() {
        assert!(matches!(
            page_params(Some(u64::MAX), Some(100)),
            Err(ServiceError::ValidationError(_))
        ));
        assert!(page_params(Some(MAX_PAGE + 1), None).is_err());
    }

    #[test]
    fn total_pages_rounds_up() {
        let page: Page<i32> = Page::new(vec![], 21, 1, 10);
        assert_eq!(page.total_pages, 3);
        let empty: Page<i32> = Page::new(vec![], 0, 1, 10);
        assert_eq!(empty.total_pages, 0);
    }
}
