//! File-system model store for versioned model artifacts.
//!
//! Layout under the store root:
//! - `<name>/<version>/model.yaml`: the [`ModelRecord`]
//! - `<name>/<version>/<artifact>`: the copied artifact
//! - `<name>/latest`: version string of the newest registration

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

const RECORD_FILE: &str = "model.yaml";
const LATEST_FILE: &str = "latest";
const LATEST_TMP_FILE: &str = "latest.tmp";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid model tag '{0}'")]
    InvalidTag(String),
    #[error("model '{0}' not found in store")]
    NotFound(String),
    #[error("checksum mismatch for {tag}: expected {expected}, got {actual}")]
    ChecksumMismatch { tag: String, expected: String, actual: String },
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("invalid model record {path}: {source}")]
    Record { path: PathBuf, #[source] source: serde_yaml::Error },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> RegistryError + '_ {
    move |source| RegistryError::Io { path: path.to_path_buf(), source }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFormat { ForestJson, Onnx }

impl ModelFormat {
    /// Infer the format from an artifact file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref() {
            Some("json") => Some(ModelFormat::ForestJson),
            Some("onnx") => Some(ModelFormat::Onnx),
            _ => None,
        }
    }

    pub fn artifact_file_name(&self) -> &'static str {
        match self { ModelFormat::ForestJson => "model.json", ModelFormat::Onnx => "model.onnx" }
    }

    pub fn as_str(&self) -> &'static str {
        match self { ModelFormat::ForestJson => "forest-json", ModelFormat::Onnx => "onnx" }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub target: String,
    pub unit: String,
    pub api_features: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub name: String,
    pub version: String,
    pub format: ModelFormat,
    pub artifact: String,
    pub sha256: String,
    pub created_at: String,
    pub metadata: ModelMetadata,
}

impl ModelRecord {
    pub fn tag(&self) -> String { format!("{}:{}", self.name, self.version) }
}

/// `name` or `name:version`; `latest` (or no version) resolves through the `latest` pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTag {
    pub name: String,
    pub version: Option<String>,
}

fn valid_component(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

impl ModelTag {
    pub fn parse(s: &str) -> Result<Self, RegistryError> {
        let (name, version) = match s.split_once(':') {
            Some((n, v)) => (n, Some(v)),
            None => (s, None),
        };
        if !valid_component(name) { return Err(RegistryError::InvalidTag(s.to_string())); }
        let version = match version {
            None | Some("latest") => None,
            Some(v) if valid_component(v) => Some(v.to_string()),
            Some(_) => return Err(RegistryError::InvalidTag(s.to_string())),
        };
        Ok(Self { name: name.to_string(), version })
    }
}

impl FromStr for ModelTag {
    type Err = RegistryError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl fmt::Display for ModelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version.as_deref().unwrap_or("latest"))
    }
}

#[derive(Debug, Clone)]
pub struct ModelStore { root: PathBuf }

impl ModelStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(io_err(&root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path { &self.root }

    /// Copy `artifact` into the store under a fresh version and point `latest` at it.
    pub fn register(&self, name: &str, artifact: &Path, format: ModelFormat, metadata: ModelMetadata) -> Result<ModelRecord, RegistryError> {
        if !valid_component(name) { return Err(RegistryError::InvalidTag(name.to_string())); }
        let bytes = std::fs::read(artifact).map_err(io_err(artifact))?;
        let now = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let version = format!("{}-{}", now.format("%Y%m%dT%H%M%S%3fZ"), &suffix[..8]);
        let dir = self.root.join(name).join(&version);
        let record = ModelRecord {
            name: name.to_string(),
            version,
            format,
            artifact: format.artifact_file_name().to_string(),
            sha256: sha256_hex(&bytes),
            created_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            metadata,
        };
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        if let Err(e) = self.write_version(&dir, &record, &bytes) {
            if let Err(cleanup) = std::fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), error = %cleanup, "failed to remove partial registration");
            }
            return Err(e);
        }
        info!(tag = %record.tag(), format = format.as_str(), sha256 = %record.sha256, "model registered");
        Ok(record)
    }

    /// Write artifact and record into `dir`, then swap the `latest` pointer by rename.
    fn write_version(&self, dir: &Path, record: &ModelRecord, bytes: &[u8]) -> Result<(), RegistryError> {
        let artifact_path = dir.join(&record.artifact);
        std::fs::write(&artifact_path, bytes).map_err(io_err(&artifact_path))?;

        let record_path = dir.join(RECORD_FILE);
        let yaml = serde_yaml::to_string(record).map_err(|source| RegistryError::Record { path: record_path.clone(), source })?;
        std::fs::write(&record_path, yaml).map_err(io_err(&record_path))?;

        let name_dir = self.root.join(&record.name);
        let tmp = name_dir.join(LATEST_TMP_FILE);
        let latest = name_dir.join(LATEST_FILE);
        std::fs::write(&tmp, &record.version).map_err(io_err(&tmp))?;
        std::fs::rename(&tmp, &latest).map_err(io_err(&latest))?;
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Result<ModelRecord, RegistryError> {
        let tag = ModelTag::parse(tag)?;
        let version = match tag.version.clone() {
            Some(v) => v,
            None => self.latest_version(&tag.name)?,
        };
        let record_path = self.root.join(&tag.name).join(&version).join(RECORD_FILE);
        if !record_path.is_file() {
            return Err(RegistryError::NotFound(format!("{}:{}", tag.name, version)));
        }
        let record = self.read_record(&record_path)?;
        debug!(tag = %record.tag(), "model record resolved");
        Ok(record)
    }

    /// All versions of `name`, oldest first.
    pub fn list(&self, name: &str) -> Result<Vec<ModelRecord>, RegistryError> {
        if !valid_component(name) { return Err(RegistryError::InvalidTag(name.to_string())); }
        let dir = self.root.join(name);
        if !dir.is_dir() { return Ok(Vec::new()); }
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(io_err(&dir))? {
            let entry = entry.map_err(io_err(&dir))?;
            let record_path = entry.path().join(RECORD_FILE);
            if record_path.is_file() { records.push(self.read_record(&record_path)?); }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.version.cmp(&b.version)));
        Ok(records)
    }

    pub fn artifact_path(&self, record: &ModelRecord) -> PathBuf {
        self.root.join(&record.name).join(&record.version).join(&record.artifact)
    }

    /// Re-hash the stored artifact and compare with the recorded checksum.
    pub fn verify_artifact(&self, record: &ModelRecord) -> Result<Vec<u8>, RegistryError> {
        let path = self.artifact_path(record);
        let bytes = std::fs::read(&path).map_err(io_err(&path))?;
        let actual = sha256_hex(&bytes);
        if !actual.eq_ignore_ascii_case(&record.sha256) {
            return Err(RegistryError::ChecksumMismatch { tag: record.tag(), expected: record.sha256.clone(), actual });
        }
        Ok(bytes)
    }

    fn latest_version(&self, name: &str) -> Result<String, RegistryError> {
        let latest = self.root.join(name).join(LATEST_FILE);
        if !latest.is_file() { return Err(RegistryError::NotFound(name.to_string())); }
        let version = std::fs::read_to_string(&latest).map_err(io_err(&latest))?;
        let version = version.trim();
        if !valid_component(version) {
            return Err(RegistryError::InvalidTag(format!("{name}:{version}")));
        }
        Ok(version.to_string())
    }

    fn read_record(&self, path: &Path) -> Result<ModelRecord, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(io_err(path))?;
        serde_yaml::from_str(&text).map_err(|source| RegistryError::Record { path: path.to_path_buf(), source })
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}
