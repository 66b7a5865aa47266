//! History export with clean feature flag handling.
use crate::error::AppResult;
use crate::history::HistoryTable;
use std::io::Write;
use std::path::Path;

// ============================================================================
// CSV Exporter
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use crate::error::DaqError;
    use std::fs::{self, File};

    /// Write `table` as CSV: `STT`, `measured_at`, then one column per parameter.
    /// Missing values are written as the placeholder, not as zero.
    pub fn write_history<W: Write>(table: &HistoryTable, out: W) -> AppResult<()> {
        let mut writer = csv::Writer::from_writer(out);
        writer
            .write_record(table.headers())
            .map_err(|e| DaqError::Export(format!("Failed to write CSV header: {}", e)))?;

        for row in &table.rows {
            let mut record = vec![row.index.to_string(), row.measured_at.to_rfc3339()];
            record.extend(row.display_cells());
            writer
                .write_record(&record)
                .map_err(|e| DaqError::Export(format!("Failed to write row {}: {}", row.index, e)))?;
        }

        writer
            .flush()
            .map_err(|e| DaqError::Export(format!("Failed to flush CSV writer: {}", e)))?;
        Ok(())
    }

    /// Write `table` to a new file at `path`, creating parent directories.
    pub fn export_history(table: &HistoryTable, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        write_history(table, file)?;
        tracing::info!(
            "Exported {} history rows to '{}'.",
            table.rows.len(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use crate::error::DaqError;

    /// Always fails: CSV support is compiled out.
    pub fn write_history<W: Write>(_table: &HistoryTable, _out: W) -> AppResult<()> {
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }

    /// Always fails: CSV support is compiled out.
    pub fn export_history(_table: &HistoryTable, _path: &Path) -> AppResult<()> {
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::{export_history, write_history};

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::{export_history, write_history};

#[cfg(all(test, feature = "storage_csv"))]
mod tests {
    use super::*;
    use crate::history::{build_table, BucketPolicy};
    use crate::models::{ModelId, Parameter, ParameterId, Sample};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn table() -> HistoryTable {
        let parameters = vec![
            Parameter {
                id: ParameterId(1),
                model_id: ModelId(1),
                name: "Length".into(),
                unit: "mm".into(),
                description: String::new(),
                min_value: None,
                max_value: None,
            },
            Parameter {
                id: ParameterId(2),
                model_id: ModelId(1),
                name: "Weight".into(),
                unit: "kg".into(),
                description: String::new(),
                min_value: None,
                max_value: None,
            },
        ];
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let samples = vec![(
            ParameterId(1),
            vec![Sample {
                measured_at: at,
                value: 12.5,
            }],
        )];
        build_table(&parameters, &samples, BucketPolicy::default(), 10)
    }

    #[test]
    fn test_write_history_csv() {
        let mut out = Vec::new();
        write_history(&table(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "STT,measured_at,Length (mm),Weight (kg)");
        assert_eq!(lines[1], "1,2024-05-01T08:00:00+00:00,12.500,--");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_export_history_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("history.csv");
        export_history(&table(), &path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("STT,"));
    }
}
