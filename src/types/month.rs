//! Calendar month arithmetic used to index monthly series.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};

/// A calendar month stored as `(year, month)` with `month` in `1..=12`.
///
/// Ordering is chronological because the year is compared first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Month(pub i32, pub u32);
impl Month {
    pub fn year(self) -> i32 {
        self.0
    }
    pub fn month(self) -> u32 {
        self.1
    }
    pub fn new(month: u32, year: i32) -> Self {
        Self(year, month)
    }

    /// The month containing `date`.
    pub fn of_date(date: NaiveDate) -> Self {
        Self(date.year(), date.month())
    }

    /// Months elapsed since year 0, January. Used for all offset arithmetic.
    fn ordinal(self) -> i64 {
        self.0 as i64 * 12 + (self.1 as i64 - 1)
    }

    fn from_ordinal(ordinal: i64) -> Self {
        let year = ordinal.div_euclid(12);
        let month = ordinal.rem_euclid(12) + 1;
        Self(year as i32, month as u32)
    }

    /// The following calendar month.
    pub fn succ(self) -> Self {
        self.offset(1)
    }

    /// Shift by `months`, which may be negative.
    pub fn offset(self, months: i64) -> Self {
        Self::from_ordinal(self.ordinal() + months)
    }

    /// Signed number of months from `self` to `other`.
    pub fn months_until(self, other: Month) -> i64 {
        other.ordinal() - self.ordinal()
    }
}

impl Display for Month {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.0, self.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_offset_crosses_year_boundary() {
        let nov = Month::new(11, 2019);
        assert_eq!(nov.offset(2), Month::new(1, 2020));
        assert_eq!(nov.offset(-11), Month::new(12, 2018));
        assert_eq!(Month::new(12, 2020).succ(), Month::new(1, 2021));
    }

    #[test]
    fn test_months_until() {
        let start = Month::new(6, 2022);
        let end = Month::new(5, 2023);
        assert_eq!(start.months_until(end), 11);
        assert_eq!(end.months_until(start), -11);
    }

    #[test]
    fn test_month_ordering_and_display() {
        assert!(Month::new(12, 2019) < Month::new(1, 2020));
        assert_eq!(Month::new(7, 2021).to_string(), "2021-07");
    }

    #[test]
    fn test_month_of_date() {
        let date = NaiveDate::from_ymd_opt(2018, 8, 31).unwrap();
        assert_eq!(Month::of_date(date), Month::new(8, 2018));
    }
}
