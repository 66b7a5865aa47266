//! Dashboard figures: per-parameter statistics and daily measurement counts.

use crate::error::{AppResult, DaqError};
use crate::models::Sample;
use crate::store::SqliteStore;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;

/// Summary of one parameter's samples.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ParameterStatistics {
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Arithmetic mean.
    pub mean: f64,
    /// Sample standard deviation; `None` with fewer than two samples.
    pub std_dev: Option<f64>,
    /// Number of samples.
    pub count: usize,
}

impl ParameterStatistics {
    /// `None` for an empty slice.
    pub fn from_samples(samples: &[Sample]) -> Option<Self> {
        let count = samples.len();
        if count == 0 {
            return None;
        }

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for s in samples {
            min = min.min(s.value);
            max = max.max(s.value);
            sum += s.value;
        }
        let mean = sum / count as f64;

        let std_dev = (count > 1).then(|| {
            let var = samples
                .iter()
                .map(|s| (s.value - mean).powi(2))
                .sum::<f64>()
                / (count - 1) as f64;
            var.sqrt()
        });

        Some(Self {
            min,
            max,
            mean,
            std_dev,
            count,
        })
    }
}

/// Number of measurements recorded on one UTC day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    /// UTC calendar day.
    pub day: NaiveDate,
    /// Measurements recorded that day.
    pub count: u64,
}

/// Measurement counts for the last `days` days up to `now`, oldest first.
/// Days without measurements are omitted.
pub fn measurement_summary(
    store: &SqliteStore,
    days: u32,
    now: DateTime<Utc>,
) -> AppResult<Vec<DailyCount>> {
    if days == 0 {
        return Err(DaqError::InvalidInput("summary needs at least one day".into()));
    }
    let first_day = now
        .date_naive()
        .checked_sub_days(Days::new(u64::from(days) - 1))
        .ok_or_else(|| DaqError::InvalidInput(format!("{} days reaches past the calendar", days)))?;
    let since = first_day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| DaqError::InvalidInput(format!("no midnight on {}", first_day)))?
        .and_utc();

    Ok(store
        .daily_counts(since)?
        .into_iter()
        .map(|(day, count)| DailyCount { day, count })
        .collect())
}
