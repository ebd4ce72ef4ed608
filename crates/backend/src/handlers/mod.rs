//! HTTP handlers, grouped by resource.
//!
//! Authenticated handlers receive the caller through `Extension<AuthAgent>`
//! (set by `auth::require_auth`) and pass its id into every query.

pub mod calendar;
pub mod clients;
pub mod meetings;
pub mod reports;

use shared_types::MonthQuery;

use crate::error::{ApiError, ApiResult};

/// Reject months the database layer cannot turn into bounds.
pub(crate) fn validate_month(query: &MonthQuery) -> ApiResult<()> {
    if !(1..=12).contains(&query.month) {
        return Err(ApiError::bad_request(format!(
            "month must be between 1 and 12, got {}",
            query.month
        )));
    }
    if !(1970..=9999).contains(&query.year) {
        return Err(ApiError::bad_request(format!("year {} is out of range", query.year)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_month() {
        assert!(validate_month(&MonthQuery { year: 2024, month: 1 }).is_ok());
        assert!(validate_month(&MonthQuery { year: 2024, month: 12 }).is_ok());
        assert!(validate_month(&MonthQuery { year: 2024, month: 0 }).is_err());
        assert!(validate_month(&MonthQuery { year: 2024, month: 13 }).is_err());
        assert!(validate_month(&MonthQuery { year: 1200, month: 5 }).is_err());
    }
}
