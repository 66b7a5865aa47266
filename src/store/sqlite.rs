//! SQLite-backed measurement store.
//!
//! A connection is opened for each operation and dropped when the operation
//! returns, on success and error paths alike, so no handle is held across
//! operator think-time. Writes from several stations sharing one database
//! file are serialised by SQLite's own locking; `busy_timeout_ms` bounds how
//! long a write waits for the lock.
//!
//! Timestamps are stored as integer microseconds since the Unix epoch (UTC).

use super::{CatalogStore, MeasurementStore};
use crate::config::DatabaseConfig;
use crate::error::{AppResult, DaqError};
use crate::models::{
    stored_precision, Measurement, MeasurementId, MeasurementRecord, Model, ModelId,
    NewMeasurement, NewModel, NewParameter, Parameter, ParameterId, Sample, Template, TemplateId,
    TimeRange,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Relational store over a single SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    config: DatabaseConfig,
}

impl SqliteStore {
    /// A store for `config.path`. No connection is opened yet.
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    /// Create the store and bootstrap the schema.
    pub fn open(config: DatabaseConfig) -> AppResult<Self> {
        let store = Self::new(config);
        store.init_schema()?;
        Ok(store)
    }

    /// Database file this store writes to.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Create the four tables if they do not exist yet.
    pub fn init_schema(&self) -> AppResult<()> {
        if let Some(parent) = self.config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        self.with_connection(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })?;
        info!("Measurement database ready at {}", self.config.path.display());
        Ok(())
    }

    /// Run `f` with a fresh connection that is closed when `f` returns.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> AppResult<T>,
    ) -> AppResult<T> {
        let mut conn = Connection::open(&self.config.path)?;
        conn.busy_timeout(self.config.busy_timeout())?;
        conn.pragma_update(None, "foreign_keys", true)?;
        f(&mut conn)
    }

    /// Measurement counts per UTC day since `since`, oldest day first.
    pub fn daily_counts(&self, since: DateTime<Utc>) -> AppResult<Vec<(NaiveDate, u64)>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT date(measured_at / 1000000, 'unixepoch') AS day, COUNT(*)
                 FROM measurements
                 WHERE measured_at >= ?1
                 GROUP BY day
                 ORDER BY day",
            )?;
            let rows = stmt.query_map([to_micros(since)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut counts = Vec::new();
            for row in rows {
                let (day, count) = row?;
                let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                    .map_err(|e| DaqError::Persistence(format!("bad day {:?}: {}", day, e)))?;
                counts.push((day, count.max(0) as u64));
            }
            Ok(counts)
        })
    }

    /// Total number of measurements recorded for the parameters of `model_id`.
    pub fn count_for_model(&self, model_id: ModelId) -> AppResult<u64> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM measurements
                 WHERE parameter_id IN (SELECT id FROM parameters WHERE model_id = ?1)",
                [model_id.0],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

fn path_to_sql(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.to_string_lossy().into_owned())
}

fn model_from_row(row: &Row<'_>) -> rusqlite::Result<Model> {
    Ok(Model {
        id: ModelId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        image_path: row.get::<_, Option<String>>(3)?.map(PathBuf::from),
        template_path: row.get::<_, Option<String>>(4)?.map(PathBuf::from),
        created_at: timestamp_at(row, 5)?,
    })
}

fn parameter_from_row(row: &Row<'_>) -> rusqlite::Result<Parameter> {
    Ok(Parameter {
        id: ParameterId(row.get(0)?),
        model_id: ModelId(row.get(1)?),
        name: row.get(2)?,
        unit: row.get(3)?,
        description: row.get(4)?,
        min_value: row.get(5)?,
        max_value: row.get(6)?,
    })
}

fn template_from_row(row: &Row<'_>) -> rusqlite::Result<Template> {
    Ok(Template {
        id: TemplateId(row.get(0)?),
        name: row.get(1)?,
        file_path: PathBuf::from(row.get::<_, String>(2)?),
        created_at: timestamp_at(row, 3)?,
    })
}

const MODEL_COLUMNS: &str = "id, name, description, image_path, template_path, created_at";
const PARAMETER_COLUMNS: &str = "id, model_id, name, unit, description, min_value, max_value";

fn measurements_for_parameters(conn: &Connection, where_clause: &str, id: i64) -> AppResult<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM measurements WHERE parameter_id IN \
         (SELECT id FROM parameters WHERE {})",
        where_clause
    );
    Ok(conn.query_row(&sql, [id], |row| row.get(0))?)
}

impl MeasurementStore for SqliteStore {
    fn append(&self, measurement: &NewMeasurement) -> AppResult<MeasurementId> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO measurements (parameter_id, value, device_id, measured_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    measurement.parameter_id.0,
                    measurement.value,
                    measurement.device_id,
                    to_micros(measurement.measured_at),
                ],
            )?;
            let id = MeasurementId(conn.last_insert_rowid());
            debug!(
                "Stored measurement {} for parameter {}: {}",
                id, measurement.parameter_id, measurement.value
            );
            Ok(id)
        })
    }

    fn query(&self, parameter_id: ParameterId, range: TimeRange) -> AppResult<Vec<Sample>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT measured_at, value FROM measurements
                 WHERE parameter_id = ?1
                   AND (?2 IS NULL OR measured_at >= ?2)
                   AND (?3 IS NULL OR measured_at <= ?3)
                 ORDER BY measured_at, id",
            )?;
            let rows = stmt.query_map(
                params![
                    parameter_id.0,
                    range.start.map(to_micros),
                    range.end.map(to_micros),
                ],
                |row| {
                    Ok(Sample {
                        measured_at: timestamp_at(row, 0)?,
                        value: row.get(1)?,
                    })
                },
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn latest_n(&self, n: usize) -> AppResult<Vec<MeasurementRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.parameter_id, m.value, m.device_id, m.measured_at,
                        p.name, p.unit, md.name
                 FROM measurements m
                 JOIN parameters p ON m.parameter_id = p.id
                 JOIN models md ON p.model_id = md.id
                 ORDER BY m.measured_at DESC, m.id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map([n as i64], |row| {
                Ok(MeasurementRecord {
                    measurement: Measurement {
                        id: MeasurementId(row.get(0)?),
                        parameter_id: ParameterId(row.get(1)?),
                        value: row.get(2)?,
                        device_id: row.get(3)?,
                        measured_at: timestamp_at(row, 4)?,
                    },
                    parameter_name: row.get(5)?,
                    unit: row.get(6)?,
                    model_name: row.get(7)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}

impl CatalogStore for SqliteStore {
    fn add_model(&self, model: &NewModel) -> AppResult<Model> {
        if model.name.trim().is_empty() {
            return Err(DaqError::InvalidInput("model name must not be empty".into()));
        }
        let created_at = stored_precision(Utc::now());
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO models (name, description, image_path, template_path, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    model.name,
                    model.description,
                    path_to_sql(&model.image_path),
                    path_to_sql(&model.template_path),
                    to_micros(created_at),
                ],
            )?;
            let id = ModelId(conn.last_insert_rowid());
            info!("Added model {} ({})", model.name, id);
            Ok(Model {
                id,
                name: model.name.clone(),
                description: model.description.clone(),
                image_path: model.image_path.clone(),
                template_path: model.template_path.clone(),
                created_at,
            })
        })
    }

    fn list_models(&self) -> AppResult<Vec<Model>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM models ORDER BY name, id",
                MODEL_COLUMNS
            ))?;
            let rows = stmt.query_map([], model_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn get_model(&self, id: ModelId) -> AppResult<Option<Model>> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM models WHERE id = ?1", MODEL_COLUMNS),
                    [id.0],
                    model_from_row,
                )
                .optional()?)
        })
    }

    fn update_model(&self, id: ModelId, name: &str, description: &str) -> AppResult<()> {
        self.with_connection(|conn| {
            let changed = conn.execute(
                "UPDATE models SET name = ?1, description = ?2 WHERE id = ?3",
                params![name, description, id.0],
            )?;
            if changed == 0 {
                return Err(DaqError::NotFound(format!("model {}", id)));
            }
            Ok(())
        })
    }

    fn delete_model(&self, id: ModelId) -> AppResult<()> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let recorded = measurements_for_parameters(&tx, "model_id = ?1", id.0)?;
            if recorded > 0 {
                return Err(DaqError::InvalidInput(format!(
                    "model {} has {} recorded measurements",
                    id, recorded
                )));
            }
            tx.execute("DELETE FROM parameters WHERE model_id = ?1", [id.0])?;
            let changed = tx.execute("DELETE FROM models WHERE id = ?1", [id.0])?;
            if changed == 0 {
                return Err(DaqError::NotFound(format!("model {}", id)));
            }
            tx.commit()?;
            info!("Deleted model {}", id);
            Ok(())
        })
    }

    fn add_parameter(&self, parameter: &NewParameter) -> AppResult<Parameter> {
        if parameter.name.trim().is_empty() {
            return Err(DaqError::InvalidInput(
                "parameter name must not be empty".into(),
            ));
        }
        if let (Some(min), Some(max)) = (parameter.min_value, parameter.max_value) {
            if min > max {
                return Err(DaqError::InvalidInput(format!(
                    "min {} is greater than max {}",
                    min, max
                )));
            }
        }
        self.with_connection(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM models WHERE id = ?1)",
                [parameter.model_id.0],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(DaqError::NotFound(format!("model {}", parameter.model_id)));
            }
            conn.execute(
                "INSERT INTO parameters (model_id, name, unit, description, min_value, max_value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    parameter.model_id.0,
                    parameter.name,
                    parameter.unit,
                    parameter.description,
                    parameter.min_value,
                    parameter.max_value,
                ],
            )?;
            Ok(Parameter {
                id: ParameterId(conn.last_insert_rowid()),
                model_id: parameter.model_id,
                name: parameter.name.clone(),
                unit: parameter.unit.clone(),
                description: parameter.description.clone(),
                min_value: parameter.min_value,
                max_value: parameter.max_value,
            })
        })
    }

    fn parameters_for_model(&self, model_id: ModelId) -> AppResult<Vec<Parameter>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM parameters WHERE model_id = ?1 ORDER BY name, id",
                PARAMETER_COLUMNS
            ))?;
            let rows = stmt.query_map([model_id.0], parameter_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn update_parameter(
        &self,
        id: ParameterId,
        name: &str,
        unit: &str,
        description: &str,
    ) -> AppResult<()> {
        self.with_connection(|conn| {
            let changed = conn.execute(
                "UPDATE parameters SET name = ?1, unit = ?2, description = ?3 WHERE id = ?4",
                params![name, unit, description, id.0],
            )?;
            if changed == 0 {
                return Err(DaqError::NotFound(format!("parameter {}", id)));
            }
            Ok(())
        })
    }

    fn delete_parameter(&self, id: ParameterId) -> AppResult<()> {
        self.with_connection(|conn| {
            let recorded = measurements_for_parameters(conn, "id = ?1", id.0)?;
            if recorded > 0 {
                return Err(DaqError::InvalidInput(format!(
                    "parameter {} has {} recorded measurements",
                    id, recorded
                )));
            }
            let changed = conn.execute("DELETE FROM parameters WHERE id = ?1", [id.0])?;
            if changed == 0 {
                return Err(DaqError::NotFound(format!("parameter {}", id)));
            }
            Ok(())
        })
    }

    fn add_template(&self, name: &str, file_path: &Path) -> AppResult<Template> {
        let created_at = stored_precision(Utc::now());
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO templates (name, file_path, created_at) VALUES (?1, ?2, ?3)",
                params![name, file_path.to_string_lossy().into_owned(), to_micros(created_at)],
            )?;
            Ok(Template {
                id: TemplateId(conn.last_insert_rowid()),
                name: name.to_string(),
                file_path: file_path.to_path_buf(),
                created_at,
            })
        })
    }

    fn list_templates(&self) -> AppResult<Vec<Template>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, file_path, created_at FROM templates ORDER BY name, id",
            )?;
            let rows = stmt.query_map([], template_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn get_template(&self, id: TemplateId) -> AppResult<Option<Template>> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, file_path, created_at FROM templates WHERE id = ?1",
                    [id.0],
                    template_from_row,
                )
                .optional()?)
        })
    }

    fn update_template(&self, id: TemplateId, name: &str) -> AppResult<()> {
        if name.trim().is_empty() {
            return Err(DaqError::InvalidInput("template name must not be empty".into()));
        }
        self.with_connection(|conn| {
            let changed = conn.execute(
                "UPDATE templates SET name = ?1 WHERE id = ?2",
                params![name, id.0],
            )?;
            if changed == 0 {
                return Err(DaqError::NotFound(format!("template {}", id)));
            }
            debug!("Renamed template {} to {}", id, name);
            Ok(())
        })
    }

    fn delete_template(&self, id: TemplateId) -> AppResult<()> {
        self.with_connection(|conn| {
            let changed = conn.execute("DELETE FROM templates WHERE id = ?1", [id.0])?;
            if changed == 0 {
                return Err(DaqError::NotFound(format!("template {}", id)));
            }
            Ok(())
        })
    }
}
