//! Report template registration.
//!
//! Registering copies the file into the configured template directory under
//! a timestamp-prefixed name and records it in the catalog. A name already
//! taken in the directory gets a counter after the prefix, so an existing
//! template file is never overwritten. If the record cannot be written the
//! copy is removed again.

use crate::config::TemplateConfig;
use crate::error::{AppResult, DaqError};
use crate::models::{Template, TemplateId};
use crate::store::CatalogStore;
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const PREFIX_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Template files on disk plus their catalog records.
pub struct TemplateLibrary<'a, S> {
    store: &'a S,
    dir: PathBuf,
}

impl<'a, S: CatalogStore> TemplateLibrary<'a, S> {
    /// Library storing files under `config.dir`.
    pub fn new(store: &'a S, config: &TemplateConfig) -> Self {
        Self {
            store,
            dir: config.dir.clone(),
        }
    }

    /// Directory template files are copied into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `source` into the library and register it as `name`.
    pub fn add(&self, name: &str, source: &Path) -> AppResult<Template> {
        self.add_at(name, source, Utc::now())
    }

    fn add_at(&self, name: &str, source: &Path, now: DateTime<Utc>) -> AppResult<Template> {
        if name.trim().is_empty() {
            return Err(DaqError::InvalidInput("template name is empty".into()));
        }
        let file_name = source
            .file_name()
            .ok_or_else(|| DaqError::InvalidInput(format!("{} is not a file", source.display())))?;

        fs::create_dir_all(&self.dir)?;
        let target = copy_to_unused(
            source,
            &self.dir,
            &now.format(PREFIX_FORMAT).to_string(),
            &file_name.to_string_lossy(),
        )?;

        match self.store.add_template(name, &target) {
            Ok(template) => {
                info!("Registered template '{}' at {}", name, target.display());
                Ok(template)
            }
            Err(e) => {
                warn!("Failed to register template '{}': {}", name, e);
                remove_if_present(&target)?;
                Err(e)
            }
        }
    }

    /// Templates ordered by name.
    pub fn list(&self) -> AppResult<Vec<Template>> {
        self.store.list_templates()
    }

    /// Give a template a new name. The file keeps its path.
    pub fn rename(&self, id: TemplateId, name: &str) -> AppResult<()> {
        self.store.update_template(id, name)?;
        info!("Renamed template {} to '{}'", id, name);
        Ok(())
    }

    /// Remove the record and its file. A file that is already gone is not an error.
    pub fn delete(&self, id: TemplateId) -> AppResult<()> {
        let template = self
            .store
            .get_template(id)?
            .ok_or_else(|| DaqError::NotFound(format!("template {}", id)))?;
        self.store.delete_template(id)?;
        remove_if_present(&template.file_path)?;
        info!("Deleted template '{}'", template.name);
        Ok(())
    }
}

/// Copy `source` to `{prefix}_{file_name}` in `dir`, or to
/// `{prefix}_{n}_{file_name}` for the first free `n` when that exists.
fn copy_to_unused(source: &Path, dir: &Path, prefix: &str, file_name: &str) -> AppResult<PathBuf> {
    let mut input = fs::File::open(source)?;
    for n in 0..MAX_NAME_ATTEMPTS {
        let target = if n == 0 {
            dir.join(format!("{}_{}", prefix, file_name))
        } else {
            dir.join(format!("{}_{}_{}", prefix, n, file_name))
        };
        let mut output = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = io::copy(&mut input, &mut output) {
            drop(output);
            remove_if_present(&target)?;
            return Err(e.into());
        }
        return Ok(target);
    }
    Err(DaqError::InvalidInput(format!(
        "no free name for {} in {}",
        file_name,
        dir.display()
    )))
}

fn remove_if_present(path: &Path) -> AppResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
