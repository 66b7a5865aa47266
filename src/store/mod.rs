//! Persistence boundary.
//!
//! [`MeasurementStore`] is the narrow interface the acquisition workflow
//! writes through; [`CatalogStore`] manages models, parameters and template
//! records. [`SqliteStore`] implements both over a relational schema with
//! four tables (models, parameters, measurements, templates).
//!
//! Implementations must make `append` atomic and immediately visible to
//! subsequent queries on the same store instance.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::AppResult;
use crate::models::{
    MeasurementId, MeasurementRecord, Model, ModelId, NewMeasurement, NewModel, NewParameter,
    Parameter, ParameterId, Sample, Template, TemplateId, TimeRange,
};
use std::path::Path;

/// Append-only measurement log.
pub trait MeasurementStore {
    /// Persist one value and return its id. Exactly one durable write.
    fn append(&self, measurement: &NewMeasurement) -> AppResult<MeasurementId>;

    /// Samples of one parameter inside `range`, oldest first. Samples with
    /// equal timestamps keep insertion order.
    fn query(&self, parameter_id: ParameterId, range: TimeRange) -> AppResult<Vec<Sample>>;

    /// The `n` most recent measurements with parameter and model names, newest first.
    fn latest_n(&self, n: usize) -> AppResult<Vec<MeasurementRecord>>;
}

/// Models, parameters and template records.
pub trait CatalogStore {
    /// Insert a model. A blank name is refused.
    fn add_model(&self, model: &NewModel) -> AppResult<Model>;
    /// Models ordered by name.
    fn list_models(&self) -> AppResult<Vec<Model>>;
    /// `None` when no such model exists.
    fn get_model(&self, id: ModelId) -> AppResult<Option<Model>>;
    /// Change a model's name and description.
    fn update_model(&self, id: ModelId, name: &str, description: &str) -> AppResult<()>;
    /// Remove a model and its parameters. Refused while measurements exist.
    fn delete_model(&self, id: ModelId) -> AppResult<()>;

    /// Insert a parameter into its model.
    fn add_parameter(&self, parameter: &NewParameter) -> AppResult<Parameter>;
    /// Parameters of a model ordered by name.
    fn parameters_for_model(&self, model_id: ModelId) -> AppResult<Vec<Parameter>>;
    /// Change a parameter's name, unit and description.
    fn update_parameter(
        &self,
        id: ParameterId,
        name: &str,
        unit: &str,
        description: &str,
    ) -> AppResult<()>;
    /// Remove a parameter. Refused while measurements exist.
    fn delete_parameter(&self, id: ParameterId) -> AppResult<()>;

    /// Record a template file already copied into place.
    fn add_template(&self, name: &str, file_path: &Path) -> AppResult<Template>;
    /// Templates ordered by name.
    fn list_templates(&self) -> AppResult<Vec<Template>>;
    /// `None` when no such template exists.
    fn get_template(&self, id: TemplateId) -> AppResult<Option<Template>>;
    /// Rename a template. The file is left where it is.
    fn update_template(&self, id: TemplateId, name: &str) -> AppResult<()>;
    /// Remove the record only; the file is the caller's.
    fn delete_template(&self, id: TemplateId) -> AppResult<()>;
}

impl<S: MeasurementStore + ?Sized> MeasurementStore for &S {
    fn append(&self, measurement: &NewMeasurement) -> AppResult<MeasurementId> {
        (**self).append(measurement)
    }

    fn query(&self, parameter_id: ParameterId, range: TimeRange) -> AppResult<Vec<Sample>> {
        (**self).query(parameter_id, range)
    }

    fn latest_n(&self, n: usize) -> AppResult<Vec<MeasurementRecord>> {
        (**self).latest_n(n)
    }
}

/// Run a blocking store call from async code without stalling the worker it
/// is called on. Other tasks on that worker, such as a gauge poller, move to
/// another thread while `op` runs. A SQLite write can wait up to
/// `busy_timeout_ms` for another station's lock.
///
/// Panics on a current-thread runtime.
pub fn run_blocking<T>(op: impl FnOnce() -> T) -> T {
    tokio::task::block_in_place(op)
}
