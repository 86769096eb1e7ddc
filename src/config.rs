use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BackupError, BackupResult};
use crate::segment::Segment;

/// Environment variable naming a JSON config file for the binaries.
pub const CONFIG_ENV: &str = "SEGBACKUP_CONFIG";

/// Settings for one backup run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackupConfig {
    /// Coordinator data directory; backup files land under `<dir>/backups`.
    pub coordinator_data_dir: PathBuf,
    pub dsn: String,
    /// Concurrent copy workers, each with its own session.
    pub jobs: usize,
    pub command_timeout_ms: u64,
    pub segments: Vec<Segment>,
    pub include_schemas: Vec<String>,
    pub exclude_schemas: Vec<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            coordinator_data_dir: PathBuf::from("."),
            dsn: "postgres://localhost:5432/postgres".to_string(),
            jobs: 1,
            command_timeout_ms: 600_000, // 10 minutes
            segments: Vec::new(),
            include_schemas: Vec::new(),
            exclude_schemas: Vec::new(),
        }
    }
}

/// Settings for one restore run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RestoreConfig {
    pub coordinator_data_dir: PathBuf,
    pub dsn: String,
    pub jobs: usize,
    pub command_timeout_ms: u64,
    pub segments: Vec<Segment>,
    /// Backup to restore (YYYYMMDDHHMMSS).
    pub timestamp: Option<String>,
    /// Regex matched against `schema.name` of data entries.
    pub include_table: Option<String>,
    pub data_only: bool,
    pub metadata_only: bool,
    /// Set on every restore session before any statement is replayed.
    pub search_path: Option<String>,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            coordinator_data_dir: PathBuf::from("."),
            dsn: "postgres://localhost:5432/postgres".to_string(),
            jobs: 1,
            command_timeout_ms: 600_000,
            segments: Vec::new(),
            timestamp: None,
            include_table: None,
            data_only: false,
            metadata_only: false,
            search_path: None,
        }
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> BackupResult<T> {
    let text = std::fs::read_to_string(path).map_err(|e| BackupError::io(format!("reading config {}", path.display()), e))?;
    serde_json::from_str(&text).map_err(|e| BackupError::config(format!("invalid config {}: {}", path.display(), e)))
}

fn parse_usize(key: &str, v: &str) -> BackupResult<usize> {
    v.trim().parse().map_err(|_| BackupError::config(format!("{} must be a non-negative integer, got '{}'", key, v)))
}

fn parse_u64(key: &str, v: &str) -> BackupResult<u64> {
    v.trim().parse().map_err(|_| BackupError::config(format!("{} must be a non-negative integer, got '{}'", key, v)))
}

fn parse_flag(v: &str) -> bool { matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on") }

fn parse_list(v: &str) -> Vec<String> { v.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).map(String::from).collect() }

fn env_lookup(key: &str) -> Option<String> { std::env::var(key).ok() }

impl BackupConfig {
    pub fn from_file(path: &Path) -> BackupResult<Self> { read_json(path) }

    /// Overlay `SEGBACKUP_*` values returned by `get`.
    pub fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, get: F) -> BackupResult<()> {
        if let Some(v) = get("SEGBACKUP_DATA_DIR") { self.coordinator_data_dir = PathBuf::from(v); }
        if let Some(v) = get("SEGBACKUP_DSN") { self.dsn = v; }
        if let Some(v) = get("SEGBACKUP_JOBS") { self.jobs = parse_usize("SEGBACKUP_JOBS", &v)?; }
        if let Some(v) = get("SEGBACKUP_TIMEOUT_MS") { self.command_timeout_ms = parse_u64("SEGBACKUP_TIMEOUT_MS", &v)?; }
        if let Some(v) = get("SEGBACKUP_INCLUDE_SCHEMAS") { self.include_schemas = parse_list(&v); }
        if let Some(v) = get("SEGBACKUP_EXCLUDE_SCHEMAS") { self.exclude_schemas = parse_list(&v); }
        Ok(())
    }

    /// File named by `SEGBACKUP_CONFIG` (or defaults), then environment overrides.
    pub fn load() -> BackupResult<Self> {
        let mut cfg = match env_lookup(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_overrides(env_lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> BackupResult<()> {
        if self.jobs == 0 {
            return Err(BackupError::config("jobs must be at least 1"));
        }
        if !self.include_schemas.is_empty() && !self.exclude_schemas.is_empty() {
            return Err(BackupError::config("include_schemas and exclude_schemas cannot be combined"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration { Duration::from_millis(self.command_timeout_ms) }

    /// Whether objects in `schema` are part of this backup.
    pub fn includes_schema(&self, schema: &str) -> bool {
        if !self.include_schemas.is_empty() {
            return self.include_schemas.iter().any(|s| s == schema);
        }
        !self.exclude_schemas.iter().any(|s| s == schema)
    }
}

impl RestoreConfig {
    pub fn from_file(path: &Path) -> BackupResult<Self> { read_json(path) }

    pub fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, get: F) -> BackupResult<()> {
        if let Some(v) = get("SEGBACKUP_DATA_DIR") { self.coordinator_data_dir = PathBuf::from(v); }
        if let Some(v) = get("SEGBACKUP_DSN") { self.dsn = v; }
        if let Some(v) = get("SEGBACKUP_JOBS") { self.jobs = parse_usize("SEGBACKUP_JOBS", &v)?; }
        if let Some(v) = get("SEGBACKUP_TIMEOUT_MS") { self.command_timeout_ms = parse_u64("SEGBACKUP_TIMEOUT_MS", &v)?; }
        if let Some(v) = get("SEGBACKUP_TIMESTAMP") { self.timestamp = Some(v); }
        if let Some(v) = get("SEGBACKUP_INCLUDE_TABLE") { self.include_table = Some(v); }
        if let Some(v) = get("SEGBACKUP_DATA_ONLY") { self.data_only = parse_flag(&v); }
        if let Some(v) = get("SEGBACKUP_METADATA_ONLY") { self.metadata_only = parse_flag(&v); }
        if let Some(v) = get("SEGBACKUP_SEARCH_PATH") { self.search_path = Some(v).filter(|p| !p.trim().is_empty()); }
        Ok(())
    }

    pub fn load() -> BackupResult<Self> {
        let mut cfg = match env_lookup(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_overrides(env_lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> BackupResult<()> {
        if self.jobs == 0 {
            return Err(BackupError::config("jobs must be at least 1"));
        }
        if self.data_only && self.metadata_only {
            return Err(BackupError::config("data_only and metadata_only cannot both be set"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration { Duration::from_millis(self.command_timeout_ms) }
}
