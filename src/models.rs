//! Domain records shared by the store, the sequencer and the history view.
//!
//! `Model` and `Parameter` are managed through the catalog; `Measurement` is
//! append-only and created exclusively by the acquisition workflow.

use chrono::{DateTime, Days, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

record_id!(
    /// Row id of a product model.
    ModelId
);
record_id!(
    /// Row id of a parameter.
    ParameterId
);
record_id!(
    /// Row id of a measurement.
    MeasurementId
);
record_id!(
    /// Row id of a report template.
    TemplateId
);

/// `at` truncated to the microsecond precision timestamps are stored with.
pub fn stored_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

/// A product type definition with an associated set of parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Row id.
    pub id: ModelId,
    /// Display name.
    pub name: String,
    /// Free text.
    pub description: String,
    /// Optional product picture.
    pub image_path: Option<PathBuf>,
    /// Optional report template.
    pub template_path: Option<PathBuf>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Input for creating a model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewModel {
    /// Display name.
    pub name: String,
    /// Free text.
    pub description: String,
    /// Optional product picture.
    pub image_path: Option<PathBuf>,
    /// Optional report template.
    pub template_path: Option<PathBuf>,
}

impl NewModel {
    /// A model with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A named measurable quantity belonging to a model.
///
/// `min_value`/`max_value` are advisory: readings outside them are still
/// stored, only flagged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Row id.
    pub id: ParameterId,
    /// Owning model.
    pub model_id: ModelId,
    /// Parameter name.
    pub name: String,
    /// Unit shown next to the name.
    pub unit: String,
    /// Free text.
    pub description: String,
    /// Advisory lower bound.
    pub min_value: Option<f64>,
    /// Advisory upper bound.
    pub max_value: Option<f64>,
}

impl Parameter {
    /// Column label used by the history table, e.g. `Length (mm)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.unit)
    }

    /// Whether `value` lies inside the optional bounds.
    pub fn within_bounds(&self, value: f64) -> bool {
        self.min_value.map_or(true, |min| value >= min)
            && self.max_value.map_or(true, |max| value <= max)
    }
}

/// Input for creating a parameter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewParameter {
    /// Owning model.
    pub model_id: ModelId,
    /// Parameter name.
    pub name: String,
    /// Unit shown next to the name.
    pub unit: String,
    /// Free text.
    pub description: String,
    /// Advisory lower bound.
    pub min_value: Option<f64>,
    /// Advisory upper bound.
    pub max_value: Option<f64>,
}

impl NewParameter {
    /// A parameter without bounds.
    pub fn new(model_id: ModelId, name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            model_id,
            name: name.into(),
            unit: unit.into(),
            ..Self::default()
        }
    }

    /// Attach advisory bounds.
    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }
}

/// One persisted numeric sample for a parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Row id.
    pub id: MeasurementId,
    /// Measured parameter.
    pub parameter_id: ParameterId,
    /// Value as entered or read.
    pub value: f64,
    /// Gauge port, `None` for keyboard entry.
    pub device_id: Option<String>,
    /// Recording time (UTC).
    pub measured_at: DateTime<Utc>,
}

/// A measurement value to append.
#[derive(Clone, Debug, PartialEq)]
pub struct NewMeasurement {
    /// Measured parameter.
    pub parameter_id: ParameterId,
    /// Value as entered or read.
    pub value: f64,
    /// Gauge port, `None` for keyboard entry.
    pub device_id: Option<String>,
    /// Recording time (UTC).
    pub measured_at: DateTime<Utc>,
}

impl NewMeasurement {
    /// A manually entered value.
    pub fn new(parameter_id: ParameterId, value: f64, measured_at: DateTime<Utc>) -> Self {
        Self {
            parameter_id,
            value,
            device_id: None,
            measured_at,
        }
    }

    /// Tag the value with the channel it was read from.
    pub fn from_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// A `(timestamp, value)` pair returned by range queries.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Recording time (UTC).
    pub measured_at: DateTime<Utc>,
    /// Stored value.
    pub value: f64,
}

/// A measurement joined with its parameter and model names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// The stored row.
    pub measurement: Measurement,
    /// Name of its parameter.
    pub parameter_name: String,
    /// Unit of its parameter.
    pub unit: String,
    /// Name of the model owning the parameter.
    pub model_name: String,
}

/// A report template registered with the station.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Row id.
    pub id: TemplateId,
    /// Display name.
    pub name: String,
    /// Copy inside the template directory.
    pub file_path: PathBuf,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// Inclusive time window for range queries. Open ends are unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// No bounds.
    pub fn all() -> Self {
        Self::default()
    }

    /// Both ends bounded.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Everything at or after `start`.
    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// The `days` days up to `now`. `None` when that reaches past the
    /// representable calendar.
    pub fn last_days(days: u32, now: DateTime<Utc>) -> Option<Self> {
        now.checked_sub_days(Days::new(u64::from(days)))
            .map(Self::since)
    }

    /// Whether `at` falls inside the window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at <= e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn length() -> Parameter {
        Parameter {
            id: ParameterId(1),
            model_id: ModelId(1),
            name: "Length".into(),
            unit: "mm".into(),
            description: String::new(),
            min_value: Some(10.0),
            max_value: Some(15.0),
        }
    }

    #[test]
    fn test_parameter_label() {
        assert_eq!(length().label(), "Length (mm)");
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let p = length();
        assert!(p.within_bounds(10.0));
        assert!(p.within_bounds(15.0));
        assert!(!p.within_bounds(15.001));

        let open = Parameter {
            min_value: None,
            max_value: None,
            ..length()
        };
        assert!(open.within_bounds(-1e9));
    }

    #[test]
    fn test_stored_precision_drops_nanoseconds() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(328_699_701);
        let stored = stored_precision(at);
        assert_eq!(stored.timestamp_subsec_nanos(), 328_699_000);
        assert_eq!(DateTime::from_timestamp_micros(at.timestamp_micros()), Some(stored));
    }

    #[test]
    fn test_last_days_bounds() {
        let now = Utc.with_ymd_and_hms(2024, 5, 7, 12, 0, 0).unwrap();
        let week = TimeRange::last_days(7, now).unwrap();
        assert_eq!(week.start, Some(Utc.with_ymd_and_hms(2024, 4, 30, 12, 0, 0).unwrap()));
        assert_eq!(week.end, None);
        assert!(TimeRange::last_days(u32::MAX, now).is_none());
    }

    #[test]
    fn test_time_range_contains() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let range = TimeRange::between(t0, t1);
        assert!(range.contains(t0));
        assert!(range.contains(t1));
        assert!(!range.contains(t1 + chrono::Duration::seconds(1)));
        assert!(TimeRange::all().contains(t0));
    }
}
