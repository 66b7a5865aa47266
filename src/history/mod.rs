//! Product history reconstructed from the append-only measurement log.
//!
//! Measurements of one model are grouped into "products" by time bucket:
//! every distinct bucket is one row, newest first, with one column per
//! parameter. Grouping is a heuristic, so rows carry [`RowFlag`]s when the
//! data looks ambiguous. Flags never merge or split rows.

pub mod stats;

pub use stats::{measurement_summary, DailyCount, ParameterStatistics};

use crate::config::HistoryConfig;
use crate::error::{AppResult, DaqError};
use crate::models::{ModelId, Parameter, ParameterId, Sample, TimeRange};
use crate::store::{CatalogStore, MeasurementStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Cell text for a parameter with no value in a product row.
pub const PLACEHOLDER: &str = "--";

/// Render a cell: three decimals, or [`PLACEHOLDER`].
pub fn format_cell(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.3}", v),
        None => PLACEHOLDER.to_string(),
    }
}

/// Width of the time window that makes one product.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BucketPolicy {
    width_secs: u32,
}

impl BucketPolicy {
    /// A policy of `width_secs`-second buckets. Zero is rejected.
    pub fn new(width_secs: u32) -> AppResult<Self> {
        if width_secs == 0 {
            return Err(DaqError::InvalidInput("bucket width must be positive".into()));
        }
        Ok(Self { width_secs })
    }

    /// Whole-second buckets.
    pub fn whole_seconds() -> Self {
        Self { width_secs: 1 }
    }

    /// Policy from the `[history]` settings.
    pub fn from_config(config: &HistoryConfig) -> AppResult<Self> {
        Self::new(config.bucket_width_secs)
    }

    /// Bucket width in seconds.
    pub fn width_secs(&self) -> u32 {
        self.width_secs
    }

    /// Bucket key: `floor(unix_seconds / width)`.
    pub fn bucket_of(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(i64::from(self.width_secs))
    }
}

impl Default for BucketPolicy {
    fn default() -> Self {
        Self::whole_seconds()
    }
}

/// Why a row might not correspond to exactly one physical unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowFlag {
    /// The parameter was recorded more than once in this bucket; the latest value is shown.
    DuplicateParameter { parameter_id: ParameterId },
    /// An adjacent bucket holds only parameters this row is missing, so both
    /// rows may be halves of one unit.
    PossibleSplit { neighbour_bucket: i64 },
}

/// One history column.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryColumn {
    /// Parameter shown in the column.
    pub parameter_id: ParameterId,
    /// `Name (unit)`.
    pub label: String,
}

/// One reconstructed product.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProductRow {
    /// 1-based row number, newest product first.
    pub index: usize,
    /// Bucket index, `floor(unix_seconds / width)`.
    pub bucket: i64,
    /// Earliest measurement time in the bucket.
    pub measured_at: DateTime<Utc>,
    /// Values in column order. `None` when the parameter was never recorded.
    pub cells: Vec<Option<f64>>,
    /// Why the grouping may be wrong. Empty for a clean row.
    pub flags: Vec<RowFlag>,
}

impl ProductRow {
    /// Cells rendered for display.
    pub fn display_cells(&self) -> Vec<String> {
        self.cells.iter().copied().map(format_cell).collect()
    }

    /// Whether any parameter is missing.
    pub fn is_partial(&self) -> bool {
        self.cells.iter().any(Option::is_none)
    }

    /// Whether the grouping was flagged.
    pub fn is_ambiguous(&self) -> bool {
        !self.flags.is_empty()
    }
}

/// Denormalised history: one row per product, one column per parameter.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HistoryTable {
    /// Parameters in id order.
    pub columns: Vec<HistoryColumn>,
    /// Products, newest first.
    pub rows: Vec<ProductRow>,
}

impl HistoryTable {
    /// True when no product was found.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header labels: `STT`, `measured_at`, then one per parameter.
    pub fn headers(&self) -> Vec<String> {
        let mut headers = vec!["STT".to_string(), "measured_at".to_string()];
        headers.extend(self.columns.iter().map(|c| c.label.clone()));
        headers
    }
}

#[derive(Clone, Copy)]
struct Winner {
    at: DateTime<Utc>,
    seq: usize,
    value: f64,
}

struct Bucket {
    first_at: DateTime<Utc>,
    cells: Vec<Option<Winner>>,
    hits: Vec<usize>,
}

impl Bucket {
    fn new(at: DateTime<Utc>, columns: usize) -> Self {
        Self {
            first_at: at,
            cells: vec![None; columns],
            hits: vec![0; columns],
        }
    }

    fn present(&self) -> BTreeSet<usize> {
        (0..self.cells.len())
            .filter(|&c| self.cells[c].is_some())
            .collect()
    }
}

/// Build a history table from per-parameter samples.
///
/// `samples` pairs each parameter id with its samples in insertion order.
/// Columns follow parameter id order. Within a bucket the latest
/// `measured_at` wins; equal timestamps go to the later-inserted sample.
pub fn build_table(
    parameters: &[Parameter],
    samples: &[(ParameterId, Vec<Sample>)],
    policy: BucketPolicy,
    limit: usize,
) -> HistoryTable {
    let mut ordered: Vec<&Parameter> = parameters.iter().collect();
    ordered.sort_by_key(|p| p.id);
    let columns: Vec<HistoryColumn> = ordered
        .iter()
        .map(|p| HistoryColumn {
            parameter_id: p.id,
            label: p.label(),
        })
        .collect();

    let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();
    for (parameter_id, series) in samples {
        let Some(col) = columns.iter().position(|c| c.parameter_id == *parameter_id) else {
            continue;
        };
        for (seq, sample) in series.iter().enumerate() {
            let key = policy.bucket_of(sample.measured_at);
            let bucket = buckets
                .entry(key)
                .or_insert_with(|| Bucket::new(sample.measured_at, columns.len()));
            bucket.first_at = bucket.first_at.min(sample.measured_at);
            bucket.hits[col] += 1;

            let candidate = Winner {
                at: sample.measured_at,
                seq,
                value: sample.value,
            };
            let replace = match bucket.cells[col] {
                None => true,
                Some(current) => (candidate.at, candidate.seq) > (current.at, current.seq),
            };
            if replace {
                bucket.cells[col] = Some(candidate);
            }
        }
    }

    let rows = buckets
        .iter()
        .rev()
        .take(limit)
        .enumerate()
        .map(|(i, (&key, bucket))| ProductRow {
            index: i + 1,
            bucket: key,
            measured_at: bucket.first_at,
            cells: bucket.cells.iter().map(|c| c.map(|w| w.value)).collect(),
            flags: flags_for(key, bucket, &buckets, &columns),
        })
        .collect();

    HistoryTable { columns, rows }
}

fn flags_for(
    key: i64,
    bucket: &Bucket,
    buckets: &BTreeMap<i64, Bucket>,
    columns: &[HistoryColumn],
) -> Vec<RowFlag> {
    let mut flags: Vec<RowFlag> = bucket
        .hits
        .iter()
        .enumerate()
        .filter(|(_, hits)| **hits > 1)
        .map(|(col, _)| RowFlag::DuplicateParameter {
            parameter_id: columns[col].parameter_id,
        })
        .collect();

    let present = bucket.present();
    if present.len() < columns.len() {
        for neighbour_key in [key - 1, key + 1] {
            let Some(neighbour) = buckets.get(&neighbour_key) else {
                continue;
            };
            let other = neighbour.present();
            if !other.is_empty() && present.is_disjoint(&other) {
                flags.push(RowFlag::PossibleSplit {
                    neighbour_bucket: neighbour_key,
                });
            }
        }
    }
    flags
}

/// Builds history tables and statistics from a store.
pub struct HistoryBuilder<'a, S> {
    store: &'a S,
    policy: BucketPolicy,
}

impl<'a, S> HistoryBuilder<'a, S>
where
    S: MeasurementStore + CatalogStore,
{
    /// Builder reading from `store`.
    pub fn new(store: &'a S, policy: BucketPolicy) -> Self {
        Self { store, policy }
    }

    /// Bucket policy in use.
    pub fn policy(&self) -> BucketPolicy {
        self.policy
    }

    /// Up to `limit` most recent products of `model_id`.
    pub fn history(&self, model_id: ModelId, limit: usize) -> AppResult<HistoryTable> {
        if self.store.get_model(model_id)?.is_none() {
            return Err(DaqError::NotFound(format!("model {}", model_id)));
        }
        let parameters = self.store.parameters_for_model(model_id)?;
        if parameters.is_empty() {
            return Ok(HistoryTable::default());
        }

        let mut samples = Vec::with_capacity(parameters.len());
        for parameter in &parameters {
            samples.push((parameter.id, self.store.query(parameter.id, TimeRange::all())?));
        }

        let table = build_table(&parameters, &samples, self.policy, limit);
        debug!(
            "History for model {}: {} rows x {} columns",
            model_id,
            table.rows.len(),
            table.columns.len()
        );
        Ok(table)
    }

    /// Statistics of one parameter over `range`, or `None` without samples.
    pub fn statistics(
        &self,
        parameter_id: ParameterId,
        range: TimeRange,
    ) -> AppResult<Option<ParameterStatistics>> {
        let samples = self.store.query(parameter_id, range)?;
        Ok(ParameterStatistics::from_samples(&samples))
    }
}
