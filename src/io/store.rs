//! Per-location result bundles on disk.
//!
//! One JSON file per location (`<dir>/<location_id>.json`). Writes go through
//! a hidden temp file and a rename so a reader never sees a partial bundle.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::{LocationId, ModelDataBundle};
use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Open the store, creating its directory if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let store = Self::new(dir);
        fs::create_dir_all(&store.dir).map_err(|e| PipelineError::io(&store.dir, e))?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, location_id: LocationId) -> PathBuf {
        self.dir.join(format!("{location_id}.json"))
    }

    pub fn contains(&self, location_id: LocationId) -> bool {
        self.path_for(location_id).is_file()
    }

    /// Write (or replace) the bundle for its location.
    pub fn write(&self, bundle: &ModelDataBundle) -> Result<PathBuf, PipelineError> {
        let path = self.path_for(bundle.location_id);
        let tmp = self.dir.join(format!(".{}.json.tmp", bundle.location_id));

        let file = File::create(&tmp).map_err(|e| PipelineError::io(&tmp, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, bundle).map_err(|e| PipelineError::json(&tmp, e))?;
        writer.flush().map_err(|e| PipelineError::io(&tmp, e))?;
        writer.get_ref().sync_all().map_err(|e| PipelineError::io(&tmp, e))?;
        drop(writer);

        fs::rename(&tmp, &path).map_err(|e| PipelineError::io(&path, e))?;
        debug!(location_id = %bundle.location_id, path = %path.display(), "Wrote result bundle.");
        Ok(path)
    }

    /// Remove every bundle and temp file left in the store by an earlier run.
    ///
    /// Returns the number of files removed. A missing directory is empty.
    pub fn clear(&self) -> Result<usize, PipelineError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(PipelineError::io(&self.dir, e)),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|e| PipelineError::io(&self.dir, e))?.path();
            let stale = path.is_file() && path.extension().is_some_and(|ext| ext == "json" || ext == "tmp");
            if stale {
                fs::remove_file(&path).map_err(|e| PipelineError::io(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn load(&self, location_id: LocationId) -> Result<ModelDataBundle, PipelineError> {
        read_bundle(&self.path_for(location_id))
    }

    /// Load every bundle in the store, ordered by location id.
    ///
    /// Hidden files (in-flight temp files) are ignored.
    pub fn load_all(&self) -> Result<Vec<ModelDataBundle>, PipelineError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| PipelineError::io(&self.dir, e))?;
        let mut bundles = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::io(&self.dir, e))?;
            let path = entry.path();
            let is_bundle = path.extension().is_some_and(|ext| ext == "json")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| !n.starts_with('.'));
            if is_bundle {
                bundles.push(read_bundle(&path)?);
            }
        }
        bundles.sort_by_key(|b| b.location_id);
        Ok(bundles)
    }
}

fn read_bundle(path: &Path) -> Result<ModelDataBundle, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| PipelineError::json(path, e))
}
