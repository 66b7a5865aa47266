//! Per-parameter acquisition sequencing.
//!
//! A [`ParameterSequencer`] walks the ordered parameters of one model for one
//! physical unit under test. Each accepted value, typed or read from the
//! gauge, is written to the store immediately and the pointer moves on.
//! There is no transaction spanning parameters, so a crash mid-sequence
//! leaves a partially measured product that the history view shows with
//! placeholders.

use crate::error::{AppResult, DaqError};
use crate::models::{stored_precision, MeasurementId, NewMeasurement, Parameter, ParameterId};
use crate::store::MeasurementStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Source of measurement timestamps.
pub trait Clock {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used to replay sessions at fixed times.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Clock reading `start` until moved.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = at;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// A value accepted during the current session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecordedValue {
    /// Parameter the value belongs to.
    pub parameter_id: ParameterId,
    /// Row id assigned by the store.
    pub measurement_id: MeasurementId,
    /// Stored value.
    pub value: f64,
    /// Recording time at stored precision.
    pub measured_at: DateTime<Utc>,
    /// Gauge port, `None` for keyboard entry.
    pub device_id: Option<String>,
    /// False when the value lies outside the parameter's advisory bounds.
    pub within_bounds: bool,
}

/// Result of a successful submit.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubmitOutcome {
    /// The value just stored.
    pub recorded: RecordedValue,
    /// True once every parameter has a value.
    pub complete: bool,
}

/// Sequences one value per parameter for one unit under test.
pub struct ParameterSequencer<S, C = SystemClock> {
    store: S,
    clock: C,
    parameters: Vec<Parameter>,
    current: usize,
    session: Vec<RecordedValue>,
}

impl<S: MeasurementStore> ParameterSequencer<S, SystemClock> {
    /// A sequencer stamping values with the wall clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: MeasurementStore, C: Clock> ParameterSequencer<S, C> {
    /// A sequencer using `clock` for timestamps.
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            parameters: Vec::new(),
            current: 0,
            session: Vec::new(),
        }
    }

    /// Start a sequence over `parameters`, in the given order.
    pub fn begin(&mut self, parameters: Vec<Parameter>) -> AppResult<()> {
        if parameters.is_empty() {
            return Err(DaqError::InvalidInput(
                "cannot begin a measurement sequence without parameters".into(),
            ));
        }
        info!(
            "Measurement sequence started over {} parameters",
            parameters.len()
        );
        self.parameters = parameters;
        self.current = 0;
        self.session.clear();
        Ok(())
    }

    /// Parse and record an operator-typed value for the current parameter.
    ///
    /// A value that is not in plain decimal notation is rejected with
    /// [`DaqError::Parse`] and nothing changes.
    pub fn submit(&mut self, raw: &str) -> AppResult<SubmitOutcome> {
        self.ensure_awaiting()?;
        let value = parse_decimal(raw)?;
        self.record(value, None)
    }

    /// Record a sample read from the gauge on `device_id`.
    pub fn submit_sample(&mut self, value: f64, device_id: &str) -> AppResult<SubmitOutcome> {
        self.ensure_awaiting()?;
        if !value.is_finite() {
            return Err(DaqError::DataFormat(value.to_string()));
        }
        self.record(value, Some(device_id.to_string()))
    }

    /// The parameter awaiting a value, or `None` once complete or before `begin`.
    pub fn current_parameter(&self) -> Option<&Parameter> {
        self.parameters.get(self.current)
    }

    /// Go back to the first parameter for a new unit under test. Values
    /// already written stay in the store.
    pub fn reset(&mut self) {
        if self.current != 0 || !self.session.is_empty() {
            debug!("Measurement sequence reset after {} values", self.session.len());
        }
        self.current = 0;
        self.session.clear();
    }

    /// Whether every parameter has a value.
    pub fn is_complete(&self) -> bool {
        !self.parameters.is_empty() && self.current >= self.parameters.len()
    }

    /// `(values recorded, parameters in sequence)`.
    pub fn progress(&self) -> (usize, usize) {
        (self.current, self.parameters.len())
    }

    /// Parameters of the running sequence.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Values accepted since the last `begin` or `reset`.
    pub fn session_values(&self) -> &[RecordedValue] {
        &self.session
    }

    /// The store values are written to.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn ensure_awaiting(&self) -> AppResult<()> {
        if self.parameters.is_empty() {
            return Err(DaqError::InvalidInput(
                "no measurement sequence has been started".into(),
            ));
        }
        if self.is_complete() {
            return Err(DaqError::InvalidInput(
                "measurement sequence is already complete".into(),
            ));
        }
        Ok(())
    }

    fn record(&mut self, value: f64, device_id: Option<String>) -> AppResult<SubmitOutcome> {
        let parameter = &self.parameters[self.current];
        let measured_at = stored_precision(self.clock.now());
        let mut new = NewMeasurement::new(parameter.id, value, measured_at);
        new.device_id = device_id.clone();

        let measurement_id = self.store.append(&new).map_err(|e| {
            warn!(
                "Failed to store {} = {} (sequence not advanced): {}",
                parameter.name, value, e
            );
            match e {
                DaqError::Persistence(_) => e,
                other => DaqError::Persistence(other.to_string()),
            }
        })?;

        let within_bounds = parameter.within_bounds(value);
        if !within_bounds {
            warn!(
                "{} = {} is outside advisory bounds [{:?}, {:?}]; stored anyway",
                parameter.label(),
                value,
                parameter.min_value,
                parameter.max_value
            );
        }
        debug!("Recorded {} = {}", parameter.label(), value);

        let recorded = RecordedValue {
            parameter_id: parameter.id,
            measurement_id,
            value,
            measured_at,
            device_id,
            within_bounds,
        };
        self.session.push(recorded.clone());
        self.current += 1;

        let complete = self.is_complete();
        if complete {
            info!("Measurement sequence complete");
        }
        Ok(SubmitOutcome { recorded, complete })
    }
}

/// Parse `raw` as a number in plain decimal notation.
///
/// Accepts an optional sign, digits and at most one decimal point, e.g.
/// `12.5`, `-3`, `.75`, `4.`. Exponents, `inf` and `nan` are rejected.
pub fn parse_decimal(raw: &str) -> AppResult<f64> {
    let trimmed = raw.trim();
    let parse_error = |reason: &str| DaqError::Parse {
        input: raw.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(parse_error("empty input"));
    }
    if !is_plain_decimal(trimmed) {
        return Err(parse_error("not a decimal number"));
    }
    let value = trimmed
        .parse::<f64>()
        .map_err(|e| parse_error(&e.to_string()))?;
    if !value.is_finite() {
        return Err(parse_error("out of range"));
    }
    Ok(value)
}

fn is_plain_decimal(s: &str) -> bool {
    let body = s.strip_prefix(|c| c == '+' || c == '-').unwrap_or(s);
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());

    match body.split_once('.') {
        None => !body.is_empty() && all_digits(body),
        Some((int, frac)) => {
            all_digits(int) && all_digits(frac) && !(int.is_empty() && frac.is_empty())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MeasurementRecord, ModelId, Sample, TimeRange};
    use chrono::TimeZone;
    use std::cell::{Cell, RefCell};
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingStore {
        written: RefCell<Vec<NewMeasurement>>,
        failing: Cell<bool>,
    }

    impl MeasurementStore for RecordingStore {
        fn append(&self, measurement: &NewMeasurement) -> AppResult<MeasurementId> {
            if self.failing.get() {
                return Err(DaqError::Persistence("database is locked".into()));
            }
            self.written.borrow_mut().push(measurement.clone());
            Ok(MeasurementId(self.written.borrow().len() as i64))
        }

        fn query(&self, _: ParameterId, _: TimeRange) -> AppResult<Vec<Sample>> {
            Ok(Vec::new())
        }

        fn latest_n(&self, _: usize) -> AppResult<Vec<MeasurementRecord>> {
            Ok(Vec::new())
        }
    }

    fn param(id: i64, name: &str, unit: &str) -> Parameter {
        Parameter {
            id: ParameterId(id),
            model_id: ModelId(1),
            name: name.into(),
            unit: unit.into(),
            description: String::new(),
            min_value: None,
            max_value: None,
        }
    }

    fn length_weight() -> Vec<Parameter> {
        vec![param(1, "Length", "mm"), param(2, "Weight", "kg")]
    }

    #[test]
    fn test_parse_decimal_accepts_plain_notation() {
        assert_eq!(parse_decimal("12.5").unwrap(), 12.5);
        assert_eq!(parse_decimal(" -3 ").unwrap(), -3.0);
        assert_eq!(parse_decimal("+.75").unwrap(), 0.75);
        assert_eq!(parse_decimal("4.").unwrap(), 4.0);
    }

    #[test]
    fn test_parse_decimal_rejects_everything_else() {
        for raw in ["abc", "", ".", "-", "1e3", "inf", "NaN", "1.2.3", "12,5", "0x10"] {
            assert!(
                matches!(parse_decimal(raw), Err(DaqError::Parse { .. })),
                "{:?} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_parse_decimal_rejects_overflow() {
        let huge = format!("1{}", "0".repeat(400));
        assert!(matches!(
            parse_decimal(&huge),
            Err(DaqError::Parse { reason, .. }) if reason == "out of range"
        ));
        assert!(parse_decimal(&format!("-{}", huge)).is_err());
        assert_eq!(parse_decimal(&format!("1{}", "0".repeat(300))).unwrap(), 1e300);
    }

    #[test]
    fn test_begin_rejects_empty_list() {
        let mut seq = ParameterSequencer::new(RecordingStore::default());
        assert!(matches!(seq.begin(Vec::new()), Err(DaqError::InvalidInput(_))));
        assert!(seq.current_parameter().is_none());
    }

    #[test]
    fn test_n_submits_complete_n_parameters() {
        let store = RecordingStore::default();
        let mut seq = ParameterSequencer::new(&store);
        seq.begin(length_weight()).unwrap();

        let first = seq.submit("12.5").unwrap();
        assert!(!first.complete);
        assert_eq!(seq.current_parameter().unwrap().name, "Weight");

        let second = seq.submit("3.2").unwrap();
        assert!(second.complete);
        assert!(seq.current_parameter().is_none());
        assert_eq!(store.written.borrow().len(), 2);

        assert!(matches!(seq.submit("1"), Err(DaqError::InvalidInput(_))));
    }

    #[test]
    fn test_bad_input_changes_nothing() {
        let store = RecordingStore::default();
        let mut seq = ParameterSequencer::new(&store);
        seq.begin(length_weight()).unwrap();

        assert!(matches!(seq.submit("abc"), Err(DaqError::Parse { .. })));
        assert_eq!(seq.current_parameter().unwrap().name, "Length");
        assert!(store.written.borrow().is_empty());
        assert!(seq.session_values().is_empty());
    }

    #[test]
    fn test_persistence_failure_keeps_position() {
        let store = RecordingStore::default();
        let mut seq = ParameterSequencer::new(&store);
        seq.begin(length_weight()).unwrap();

        store.failing.set(true);
        assert!(matches!(seq.submit("12.5"), Err(DaqError::Persistence(_))));
        assert_eq!(seq.current_parameter().unwrap().name, "Length");

        store.failing.set(false);
        seq.submit("12.5").unwrap();
        assert_eq!(seq.current_parameter().unwrap().name, "Weight");
    }

    #[test]
    fn test_reset_twice_equals_once() {
        let store = RecordingStore::default();
        let mut seq = ParameterSequencer::new(&store);
        seq.begin(length_weight()).unwrap();
        seq.submit("12.5").unwrap();

        seq.reset();
        let after_one = (seq.progress(), seq.session_values().len());
        seq.reset();
        assert_eq!((seq.progress(), seq.session_values().len()), after_one);
        assert_eq!(seq.current_parameter().unwrap().name, "Length");
        assert_eq!(store.written.borrow().len(), 1);
    }

    #[test]
    fn test_device_sample_carries_device_id() {
        let store = RecordingStore::default();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
        let mut seq = ParameterSequencer::with_clock(&store, &clock);
        seq.begin(length_weight()).unwrap();

        let outcome = seq.submit_sample(12.5, "COM3").unwrap();
        assert_eq!(outcome.recorded.device_id.as_deref(), Some("COM3"));
        assert_eq!(outcome.recorded.measured_at, clock.now());
        assert_eq!(store.written.borrow()[0].device_id.as_deref(), Some("COM3"));
    }

    #[test]
    fn test_recorded_time_matches_stored_precision() {
        let store = RecordingStore::default();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(328_699_701);
        let clock = ManualClock::new(at);
        let mut seq = ParameterSequencer::with_clock(&store, &clock);
        seq.begin(length_weight()).unwrap();

        let outcome = seq.submit("12.5").unwrap();
        let stored = store.written.borrow()[0].measured_at;
        assert_eq!(outcome.recorded.measured_at, stored);
        assert_eq!(stored.timestamp_subsec_nanos(), 328_699_000);
        assert_eq!(DateTime::from_timestamp_micros(stored.timestamp_micros()), Some(stored));
    }

    #[traced_test]
    #[test]
    fn test_out_of_bounds_value_is_stored_and_flagged() {
        let store = RecordingStore::default();
        let mut seq = ParameterSequencer::new(&store);
        let mut length = param(1, "Length", "mm");
        length.max_value = Some(10.0);
        seq.begin(vec![length]).unwrap();

        let outcome = seq.submit("12.5").unwrap();
        assert!(!outcome.recorded.within_bounds);
        assert!(outcome.complete);
        assert_eq!(store.written.borrow().len(), 1);
        assert!(logs_contain("outside advisory bounds"));
    }
}
