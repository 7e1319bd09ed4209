use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// Durable snapshot of everything a run fetched, in provider-native
/// shape. Cleanup re-derives deletion identifiers from it, so records
/// are stored exactly as the API returned them, never the translated
/// entities.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RawCheckpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub threads: BTreeMap<String, Vec<Value>>,
    /// Standalone file records from an unused-files scan.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<Value>,
}

impl RawCheckpoint {
    pub fn for_channel(channel: &str) -> Self {
        Self {
            channel: Some(channel.to_string()),
            ..Self::default()
        }
    }

    /// Write the checkpoint as `<prefix>-%Y%m%d-%H%M%S.json` under `out`
    /// and return the path. Two runs within the same second collide on
    /// purpose: prior archival evidence is never overwritten.
    pub fn save(&self, out: &Path, prefix: &str) -> Result<PathBuf> {
        let name = format!("{}-{}.json", prefix, Local::now().format("%Y%m%d-%H%M%S"));
        let path = out.join(name);
        self.write_to(&path)?;
        Ok(path)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let file = File::options()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    AppError::OutputConflict {
                        path: path.display().to_string(),
                    }
                } else {
                    AppError::WriteFile {
                        path: path.display().to_string(),
                        source: e,
                    }
                }
            })?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| AppError::JsonSerialize(e.to_string()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| AppError::ReadFile {
            path: path.display().to_string(),
            source: e,
        })?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| AppError::JsonParse(e.to_string()))
    }
}
