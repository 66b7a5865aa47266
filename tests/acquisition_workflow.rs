//! End-to-end acquisition: sequencing into SQLite and reading products back.

use chrono::{DateTime, Duration, TimeZone, Utc};
use gauge_daq::{
    adapters::MockAdapter,
    config::{DatabaseConfig, DeviceConfig},
    device::{DeviceChannel, PollEvent, SamplePoller},
    error::DaqError,
    history::{BucketPolicy, HistoryBuilder, PLACEHOLDER},
    models::{Model, NewModel, NewParameter, Parameter, TimeRange},
    sequencer::{ManualClock, ParameterSequencer},
    store::{CatalogStore, MeasurementStore, SqliteStore},
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

/// Helper creating model M with parameters Length (mm) and Weight (kg).
fn station() -> (TempDir, SqliteStore, Model, Vec<Parameter>) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = SqliteStore::open(DatabaseConfig::at(dir.path().join("station.db")))
        .expect("Failed to open store");
    let model = store.add_model(&NewModel::named("M")).unwrap();
    store
        .add_parameter(&NewParameter::new(model.id, "Length", "mm"))
        .unwrap();
    store
        .add_parameter(&NewParameter::new(model.id, "Weight", "kg"))
        .unwrap();
    let parameters = store.parameters_for_model(model.id).unwrap();
    (dir, store, model, parameters)
}

fn morning(minute: u32, millis: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, minute, 0).unwrap() + Duration::milliseconds(millis)
}

#[test]
fn test_submit_sequence_persists_each_value() {
    let (_dir, store, _model, parameters) = station();
    let mut sequencer = ParameterSequencer::new(&store);
    sequencer.begin(parameters.clone()).unwrap();

    let first = sequencer.submit("12.5").unwrap();
    assert!(!first.complete);
    assert_eq!(sequencer.current_parameter().unwrap().name, "Weight");
    let length = store.query(parameters[0].id, TimeRange::all()).unwrap();
    assert_eq!(length.len(), 1);
    assert_eq!(length[0].value, 12.5);

    let second = sequencer.submit("3.2").unwrap();
    assert!(second.complete);
    assert!(sequencer.current_parameter().is_none());
    let weight = store.query(parameters[1].id, TimeRange::all()).unwrap();
    assert_eq!(weight[0].value, 3.2);
}

#[test]
fn test_recorded_value_matches_stored_sample() {
    let (_dir, store, _model, parameters) = station();
    let mut sequencer = ParameterSequencer::new(&store);
    sequencer.begin(parameters.clone()).unwrap();

    let outcome = sequencer.submit("12.5").unwrap();
    let stored = store.query(parameters[0].id, TimeRange::all()).unwrap();
    assert_eq!(stored[0].measured_at, outcome.recorded.measured_at);
    assert_eq!(sequencer.session_values()[0].measured_at, stored[0].measured_at);
}

#[test]
fn test_non_numeric_input_is_rejected_without_writing() {
    let (_dir, store, _model, parameters) = station();
    let mut sequencer = ParameterSequencer::new(&store);
    sequencer.begin(parameters).unwrap();

    let err = sequencer.submit("abc").unwrap_err();
    assert!(matches!(err, DaqError::Parse { .. }));
    assert!(err.is_operator_recoverable());
    assert_eq!(sequencer.current_parameter().unwrap().name, "Length");
    assert!(store.latest_n(10).unwrap().is_empty());
}

#[test]
fn test_two_products_one_minute_apart() {
    let (_dir, store, model, parameters) = station();
    let clock = ManualClock::new(morning(0, 100));
    let mut sequencer = ParameterSequencer::with_clock(&store, &clock);
    sequencer.begin(parameters).unwrap();

    for minute in [0, 1] {
        clock.set(morning(minute, 100));
        sequencer.submit("12.5").unwrap();
        clock.set(morning(minute, 400));
        assert!(sequencer.submit("3.2").unwrap().complete);
        sequencer.reset();
    }

    let builder = HistoryBuilder::new(&store, BucketPolicy::default());
    let table = builder.history(model.id, 10).unwrap();
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[0].measured_at, morning(1, 100));
    assert_eq!(table.rows[1].measured_at, morning(0, 100));
    for row in &table.rows {
        assert_eq!(row.display_cells(), ["12.500", "3.200"]);
        assert!(!row.is_ambiguous());
    }

    // Repeated reads without writes in between are identical.
    assert_eq!(builder.history(model.id, 10).unwrap(), table);
}

#[test]
fn test_interrupted_unit_shows_placeholder() {
    let (_dir, store, model, parameters) = station();
    let clock = ManualClock::new(morning(0, 0));
    let mut sequencer = ParameterSequencer::with_clock(&store, &clock);
    sequencer.begin(parameters).unwrap();
    sequencer.submit("12.5").unwrap();
    drop(sequencer);

    let table = HistoryBuilder::new(&store, BucketPolicy::default())
        .history(model.id, 10)
        .unwrap();
    assert_eq!(table.rows.len(), 1);
    let labels: Vec<_> = table.columns.iter().map(|c| c.label.as_str()).collect();
    assert_eq!(labels, ["Length (mm)", "Weight (kg)"]);
    assert_eq!(table.rows[0].display_cells(), ["12.500", PLACEHOLDER]);
    assert!(table.rows[0].is_partial());
}

#[test]
fn test_history_of_unknown_model_is_not_found() {
    let (_dir, store, model, _parameters) = station();
    let builder = HistoryBuilder::new(&store, BucketPolicy::default());
    let missing = gauge_daq::models::ModelId(model.id.0 + 100);
    assert!(matches!(
        builder.history(missing, 10),
        Err(DaqError::NotFound(_))
    ));
}

#[test]
fn test_statistics_over_stored_values() {
    let (_dir, store, _model, parameters) = station();
    let clock = ManualClock::new(morning(0, 0));
    let mut sequencer = ParameterSequencer::with_clock(&store, &clock);
    sequencer.begin(parameters.clone()).unwrap();
    for raw in ["10", "12", "14"] {
        sequencer.submit(raw).unwrap();
        sequencer.reset();
        clock.advance(Duration::minutes(1));
    }

    let stats = HistoryBuilder::new(&store, BucketPolicy::default())
        .statistics(parameters[0].id, TimeRange::all())
        .unwrap()
        .unwrap();
    assert_eq!(stats.count, 3);
    assert_eq!(stats.mean, 12.0);
    assert_eq!(stats.std_dev, Some(2.0));
}

#[tokio::test(start_paused = true)]
async fn test_gauge_samples_fill_the_sequence() {
    let (_dir, store, model, parameters) = station();

    let adapter = MockAdapter::with_ports(["COM3"]);
    let gauge = adapter.handle();
    let mut channel = DeviceChannel::new(adapter, DeviceConfig::default());
    channel.open("COM3").await.unwrap();
    channel.request_start().await.unwrap();
    let channel = Arc::new(Mutex::new(channel));

    gauge.push_line("12.5");
    gauge.push_line("noise");
    gauge.push_line("3.2");

    let (mut poller, mut events) =
        SamplePoller::spawn(channel.clone(), std::time::Duration::from_millis(1000));

    let clock = ManualClock::new(morning(0, 0));
    let mut sequencer = ParameterSequencer::with_clock(&store, &clock);
    sequencer.begin(parameters).unwrap();
    let mut malformed = 0;
    while !sequencer.is_complete() {
        match events.recv().await.expect("poller ended early") {
            PollEvent::Sample {
                value, device_id, ..
            } => {
                sequencer.submit_sample(value, &device_id).unwrap();
            }
            PollEvent::Malformed(_) => malformed += 1,
            PollEvent::Failed(e) => panic!("gauge failed: {}", e),
        }
    }
    poller.stop().await;
    channel.lock().await.close().await;

    assert_eq!(malformed, 1);
    assert_eq!(gauge.sent(), ["START", "STOP"]);
    let latest = store.latest_n(2).unwrap();
    assert!(latest
        .iter()
        .all(|r| r.measurement.device_id.as_deref() == Some("COM3") && r.model_name == "M"));

    let table = HistoryBuilder::new(&store, BucketPolicy::default())
        .history(model.id, 10)
        .unwrap();
    assert_eq!(table.rows.len(), 1);
    assert!(!table.rows[0].is_partial());
}
