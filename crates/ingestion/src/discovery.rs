//! Discovery of units in a data directory.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ReconcileError, Result, UnitError};

/// A source metadata file and the observation file it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestUnit {
    pub source_file: PathBuf,
    pub observation_file: PathBuf,
}

impl IngestUnit {
    /// Pair an observation file with the `.json` file of the same stem.
    pub fn for_observation_file(observation_file: impl Into<PathBuf>) -> Self {
        let observation_file = observation_file.into();
        Self {
            source_file: observation_file.with_extension("json"),
            observation_file,
        }
    }

    pub fn files(&self) -> [PathBuf; 2] {
        [self.source_file.clone(), self.observation_file.clone()]
    }
}

/// List the units in `dir`, in lexical order of observation file name.
///
/// Every regular, non-empty `.csv` file directly in `dir` is an observation
/// file. A unit whose source file is missing is returned as an error; the
/// rest of the directory is still listed. Fails only if `dir` cannot be read.
pub fn discover_units(dir: &Path) -> Result<Vec<std::result::Result<IngestUnit, UnitError>>> {
    let mut observation_files = Vec::new();

    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| ReconcileError::io(dir, e.into()))?;

        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| ReconcileError::io(entry.path(), e.into()))?;
        if metadata.len() == 0 {
            debug!(file = %entry.path().display(), "Skipping empty observation file");
            continue;
        }

        observation_files.push(entry.into_path());
    }

    observation_files.sort();

    Ok(observation_files
        .into_iter()
        .map(|file| {
            let unit = IngestUnit::for_observation_file(file);
            if unit.source_file.is_file() {
                Ok(unit)
            } else {
                let missing = unit.source_file.clone();
                Err(UnitError::for_file(
                    &unit.observation_file,
                    ReconcileError::MissingSource(missing),
                )
                .with_files(unit.files()))
            }
        })
        .collect())
}
