use crate::calc::CalcError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Fixed course plan used as the denominator of the overall rollups and as
/// the bounds for period/date filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoursePlan {
    pub working_days: u32,
    pub periods_per_day: u32,
    #[serde(default)]
    pub term_start: Option<NaiveDate>,
    #[serde(default)]
    pub term_end: Option<NaiveDate>,
}

impl Default for CoursePlan {
    fn default() -> Self {
        Self {
            working_days: 30,
            periods_per_day: 4,
            term_start: None,
            term_end: None,
        }
    }
}

impl CoursePlan {
    pub fn total_periods(&self) -> usize {
        self.working_days as usize * self.periods_per_day as usize
    }

    pub fn check_period(&self, period: i64) -> Result<u32, CalcError> {
        if period < 1 || period > i64::from(self.periods_per_day) {
            return Err(CalcError::invalid_filter(
                format!("period must be in 1..={}", self.periods_per_day),
                json!({ "period": period }),
            ));
        }
        Ok(period as u32)
    }

    pub fn check_date(&self, raw: &str) -> Result<NaiveDate, CalcError> {
        let date = NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| {
            CalcError::invalid_filter("date must be YYYY-MM-DD", json!({ "date": raw }))
        })?;
        let before_start = self.term_start.map_or(false, |s| date < s);
        let after_end = self.term_end.map_or(false, |e| date > e);
        if before_start || after_end {
            return Err(CalcError::invalid_filter(
                "date outside the configured term",
                json!({
                    "date": raw,
                    "termStart": self.term_start,
                    "termEnd": self.term_end
                }),
            ));
        }
        Ok(date)
    }
}
