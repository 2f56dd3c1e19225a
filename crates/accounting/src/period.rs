use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Inclusive date range of an accounting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl AccountingPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, LedgerError> {
        if start > end {
            return Err(LedgerError::validation(format!(
                "period start {start} is after period end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, other: &AccountingPeriod) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl core::fmt::Display for AccountingPeriod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn bounds_are_inclusive() {
        let jan = AccountingPeriod::new(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        assert!(jan.contains(d(2024, 1, 1)));
        assert!(jan.contains(d(2024, 1, 31)));
        assert!(!jan.contains(d(2024, 2, 1)));
    }

    #[test]
    fn touching_periods_overlap_but_adjacent_ones_do_not() {
        let jan = AccountingPeriod::new(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        let feb = AccountingPeriod::new(d(2024, 2, 1), d(2024, 2, 29)).unwrap();
        let mid = AccountingPeriod::new(d(2024, 1, 31), d(2024, 2, 10)).unwrap();

        assert!(!jan.overlaps(&feb));
        assert!(jan.overlaps(&mid));
        assert!(feb.overlaps(&mid));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = AccountingPeriod::new(d(2024, 2, 1), d(2024, 1, 1)).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
