use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::model::forecast::ForecastResult;
use crate::model::observation::normalize_symbol;
use crate::store::ensure_parent_dir;

/// Writes one pretty JSON document per symbol and day, overwriting within the day.
#[derive(Debug, Clone)]
pub struct JsonSnapshotSink {
    dir: PathBuf,
}

impl JsonSnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self, result: &ForecastResult) -> PathBuf {
        self.dir.join(format!(
            "{}_forecast_{}.json",
            normalize_symbol(&result.symbol),
            result.generated_at.format("%Y-%m-%d")
        ))
    }

    pub fn write(&self, result: &ForecastResult) -> Result<PathBuf, StoreError> {
        let path = self.snapshot_path(result);
        ensure_parent_dir(&path)?;
        let json = serde_json::to_string_pretty(result)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

pub fn load_snapshot(path: &Path) -> Result<ForecastResult, StoreError> {
    let payload = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&payload)?)
}
