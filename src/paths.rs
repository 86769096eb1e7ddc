use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use crate::error::{BackupError, BackupResult};
use crate::metadata::Oid;

/// Placeholder for the segment's local data directory in data-file templates.
pub const SEG_DATA_DIR_PLACEHOLDER: &str = "<SEG_DATA_DIR>";
/// Placeholder for the segment content id in data-file templates.
pub const SEGID_PLACEHOLDER: &str = "<SEGID>";

/// `YYYYMMDDHHMMSS` key identifying one backup run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimestampKey(String);

impl TimestampKey {
    pub fn parse(s: &str) -> BackupResult<Self> {
        if s.len() != 14 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BackupError::config(format!("timestamp key must be 14 digits (YYYYMMDDHHMMSS), got '{}'", s)));
        }
        chrono::NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S")
            .map_err(|e| BackupError::config(format!("timestamp key '{}' is not a valid time: {}", s, e)))?;
        Ok(Self(s.to_string()))
    }

    pub fn now() -> Self { Self(chrono::Local::now().format("%Y%m%d%H%M%S").to_string()) }

    pub fn as_str(&self) -> &str { &self.0 }

    /// `YYYYMMDD` part, used as the date directory.
    pub fn date(&self) -> &str { &self.0[..8] }
}

impl Display for TimestampKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

// ---- Coordinator-side files (under <data_dir>/backups/<date>/<ts>) ----
#[inline]
pub fn backup_dir(data_dir: &Path, ts: &TimestampKey) -> PathBuf { data_dir.join("backups").join(ts.date()).join(ts.as_str()) }

#[inline]
pub fn predata_file(data_dir: &Path, ts: &TimestampKey) -> PathBuf { backup_dir(data_dir, ts).join(format!("gpbackup_{}_predata.sql", ts)) }

#[inline]
pub fn toc_file(data_dir: &Path, ts: &TimestampKey) -> PathBuf { backup_dir(data_dir, ts).join(format!("gpbackup_{}_toc.json", ts)) }

#[inline]
pub fn table_map_file(data_dir: &Path, ts: &TimestampKey) -> PathBuf { backup_dir(data_dir, ts).join(format!("gpbackup_{}_table_map", ts)) }

// ---- Segment-side data files ----
/// Data file path with segment placeholders left in place.
pub fn segment_data_file_template(ts: &TimestampKey, oid: Oid) -> String {
    format!(
        "{}/backups/{}/{}/gpbackup_{}_{}_{}",
        SEG_DATA_DIR_PLACEHOLDER,
        ts.date(),
        ts,
        SEGID_PLACEHOLDER,
        ts,
        oid
    )
}
