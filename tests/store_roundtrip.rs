//! Measurement store behaviour through the public API.

use chrono::{Duration, TimeZone, Utc};
use gauge_daq::{
    config::DatabaseConfig,
    error::DaqError,
    history::measurement_summary,
    models::{NewMeasurement, NewModel, NewParameter, TimeRange},
    store::{CatalogStore, MeasurementStore, SqliteStore},
};
use tempfile::TempDir;

fn open(dir: &TempDir) -> SqliteStore {
    SqliteStore::open(DatabaseConfig::at(dir.path().join("data").join("station.db")))
        .expect("Failed to open store")
}

#[test]
fn test_values_read_back_exactly() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let model = store.add_model(&NewModel::named("Bracket")).unwrap();
    let hole = store
        .add_parameter(&NewParameter::new(model.id, "Hole", "mm").with_bounds(Some(4.9), Some(5.1)))
        .unwrap();

    let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::microseconds(123_456);
    let values = [5.000_000_000_1, -0.1, 1.0 / 3.0];
    for (i, value) in values.iter().enumerate() {
        store
            .append(&NewMeasurement::new(hole.id, *value, at + Duration::seconds(i as i64)))
            .unwrap();
    }

    let samples = store.query(hole.id, TimeRange::all()).unwrap();
    let read: Vec<f64> = samples.iter().map(|s| s.value).collect();
    assert_eq!(read, values);
    assert_eq!(samples[0].measured_at, at);

    let window = TimeRange::between(at + Duration::seconds(1), at + Duration::seconds(1));
    let one = store.query(hole.id, window).unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].value, -0.1);
}

#[test]
fn test_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let pid = {
        let store = open(&dir);
        let model = store.add_model(&NewModel::named("Bracket")).unwrap();
        let p = store
            .add_parameter(&NewParameter::new(model.id, "Hole", "mm"))
            .unwrap();
        store
            .append(&NewMeasurement::new(p.id, 5.0, Utc::now()).from_device("COM3"))
            .unwrap();
        p.id
    };

    let store = open(&dir);
    let latest = store.latest_n(5).unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].measurement.parameter_id, pid);
    assert_eq!(latest[0].model_name, "Bracket");
    assert_eq!(latest[0].measurement.device_id.as_deref(), Some("COM3"));
}

#[test]
fn test_summary_counts_recent_days() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let model = store.add_model(&NewModel::named("Bracket")).unwrap();
    let p = store
        .add_parameter(&NewParameter::new(model.id, "Hole", "mm"))
        .unwrap();

    let now = Utc.with_ymd_and_hms(2024, 5, 7, 12, 0, 0).unwrap();
    for days_ago in [0, 0, 2, 9] {
        store
            .append(&NewMeasurement::new(p.id, 5.0, now - Duration::days(days_ago)))
            .unwrap();
    }

    let summary = measurement_summary(&store, 7, now).unwrap();
    let counts: Vec<(String, u64)> = summary
        .iter()
        .map(|d| (d.day.to_string(), d.count))
        .collect();
    assert_eq!(
        counts,
        [("2024-05-05".to_string(), 1), ("2024-05-07".to_string(), 2)]
    );
    assert_eq!(store.count_for_model(model.id).unwrap(), 4);
    assert!(matches!(
        measurement_summary(&store, 0, now),
        Err(DaqError::InvalidInput(_))
    ));
}

#[test]
fn test_summary_rejects_window_past_calendar() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let now = Utc.with_ymd_and_hms(2024, 5, 7, 12, 0, 0).unwrap();
    assert!(matches!(
        measurement_summary(&store, u32::MAX, now),
        Err(DaqError::InvalidInput(_))
    ));
}
