//! Restore run: replay selected predata statements in TOC order, then load
//! the selected tables' data files in parallel.

use regex::Regex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::RestoreConfig;
use crate::copy::{CopyReport, DataCopier};
use crate::error::{BackupError, BackupResult};
use crate::metadata::Relation;
use crate::paths::{predata_file, table_map_file, toc_file, TimestampKey};
use crate::segment::PathResolver;
use crate::session::{SessionError, SessionFactory};
use crate::status::{RestoreSummary, RunStatus};
use crate::table_map::TableMap;
use crate::toc::{Section, Toc, TocEntry};

/// Chooses which TOC entries a restore replays.
#[derive(Debug, Clone, Default)]
pub struct RestoreFilter {
    include_table: Option<Regex>,
    data_only: bool,
    metadata_only: bool,
}

impl RestoreFilter {
    pub fn new(include_table: Option<&str>, data_only: bool, metadata_only: bool) -> BackupResult<Self> {
        if data_only && metadata_only {
            return Err(BackupError::config("data_only and metadata_only cannot both be set"));
        }
        let include_table = include_table
            .map(|p| Regex::new(p).map_err(|e| BackupError::config(format!("invalid include_table pattern '{}': {}", p, e))))
            .transpose()?;
        Ok(Self { include_table, data_only, metadata_only })
    }

    pub fn from_config(cfg: &RestoreConfig) -> BackupResult<Self> {
        Self::new(cfg.include_table.as_deref(), cfg.data_only, cfg.metadata_only)
    }

    /// The table pattern is matched against the unquoted `schema.name`.
    pub fn selects(&self, entry: &TocEntry) -> bool {
        match entry.section {
            Section::Predata | Section::Postdata => !self.data_only,
            Section::Data => {
                !self.metadata_only
                    && self
                        .include_table
                        .as_ref()
                        .map_or(true, |re| re.is_match(&format!("{}.{}", entry.schema, entry.name)))
            }
        }
    }
}

/// Read the statement text an entry covers.
fn read_range(file: &mut File, entry: &TocEntry) -> BackupResult<String> {
    let len = entry.end_offset - entry.start_offset;
    let mut buf = vec![0u8; len as usize];
    file.seek(SeekFrom::Start(entry.start_offset))
        .and_then(|_| file.read_exact(&mut buf))
        .map_err(|e| BackupError::io(format!("read predata range for {}", entry.qualified_name()), e))?;
    String::from_utf8(buf)
        .map_err(|_| BackupError::toc(format!("predata range of {} is not valid UTF-8", entry.qualified_name())))
}

pub struct RestoreRun {
    factory: Arc<dyn SessionFactory>,
    resolver: Arc<dyn PathResolver>,
    config: RestoreConfig,
}

impl RestoreRun {
    pub fn new(factory: Arc<dyn SessionFactory>, resolver: Arc<dyn PathResolver>, config: RestoreConfig) -> Self {
        Self { factory, resolver, config }
    }

    pub async fn run(&self, ts: &TimestampKey) -> RestoreSummary {
        info!(target: "segbackup::restore", "restore of {} starting from {}", ts, self.config.coordinator_data_dir.display());
        let mut replayed = 0usize;
        match self.execute(ts, &mut replayed).await {
            Ok(summary) => {
                info!(
                    target: "segbackup::restore",
                    "restore of {} finished: {} ({} statement block(s), {} table(s), {} row(s))",
                    ts, summary.status.label(), summary.statements_replayed, summary.tables_restored, summary.rows_restored
                );
                summary
            }
            Err(e) => {
                error!(target: "segbackup::restore", "restore of {} aborted [{}]: {}", ts, e.kind_str(), e);
                RestoreSummary::aborted(ts.as_str(), replayed, e.to_string())
            }
        }
    }

    async fn execute(&self, ts: &TimestampKey, replayed: &mut usize) -> BackupResult<RestoreSummary> {
        self.config.validate()?;
        let filter = RestoreFilter::from_config(&self.config)?;
        let root = &self.config.coordinator_data_dir;
        let toc = Toc::read_from(&toc_file(root, ts))?;
        let table_map = TableMap::read_from(&table_map_file(root, ts))?;

        let selected = toc.filter(|e| filter.selects(e));
        let predata: Vec<&TocEntry> = selected.iter().filter(|e| e.section == Section::Predata).collect();
        let data: Vec<&TocEntry> = selected.iter().filter(|e| e.section == Section::Data).collect();
        info!(
            target: "segbackup::restore",
            "selected {} predata and {} data entr(ies) of {}",
            predata.len(), data.len(), ts
        );

        if !predata.is_empty() {
            self.replay_predata(&predata_file(root, ts), &predata, replayed).await?;
        }

        // resolve every oid before any data moves
        let mut relations = Vec::with_capacity(data.len());
        for entry in &data {
            let oid = table_map
                .lookup(&entry.schema, &entry.name)
                .ok_or_else(|| BackupError::toc(format!("no table map entry for {}", entry.qualified_name())))?;
            relations.push(Relation::new(oid, 0, entry.schema.clone(), entry.name.clone()));
        }
        let report = if relations.is_empty() {
            CopyReport::default()
        } else {
            let copier = DataCopier::new(
                Arc::clone(&self.factory),
                Arc::clone(&self.resolver),
                self.config.segments.clone(),
                self.config.jobs,
                self.config.command_timeout(),
            );
            copier.import_tables(&relations, ts).await?
        };

        Ok(RestoreSummary {
            timestamp: ts.to_string(),
            statements_replayed: *replayed,
            tables_restored: report.tables_copied(),
            rows_restored: report.rows_copied(),
            status: RunStatus::from_copy_errors(report.errors),
        })
    }

    async fn replay_predata(&self, path: &Path, entries: &[&TocEntry], replayed: &mut usize) -> BackupResult<()> {
        let mut file = File::open(path).map_err(|e| BackupError::io(format!("open {}", path.display()), e))?;
        let session = self.factory.connect().await?;
        let timeout = self.config.command_timeout();
        for entry in entries {
            let sql = read_range(&mut file, entry)?;
            debug!(target: "segbackup::restore", "replay {} {}", entry.object_type, entry.qualified_name());
            tokio::time::timeout(timeout, session.execute(&sql))
                .await
                .map_err(|_| SessionError::new(format!("replaying {} {} timed out", entry.object_type, entry.qualified_name())))?
                .map_err(|e| SessionError::new(format!("replaying {} {}: {}", entry.object_type, entry.qualified_name(), e)))?;
            *replayed += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(section: Section, schema: &str, name: &str) -> TocEntry {
        TocEntry { schema: schema.into(), name: name.into(), object_type: "X".into(), section, start_offset: 0, end_offset: 1 }
    }

    #[test]
    fn default_filter_selects_everything() {
        let f = RestoreFilter::new(None, false, false).unwrap();
        assert!(f.selects(&entry(Section::Predata, "", "s")));
        assert!(f.selects(&entry(Section::Data, "public", "foo")));
    }

    #[test]
    fn table_pattern_applies_to_data_only() {
        let f = RestoreFilter::new(Some(r"^sales\."), false, false).unwrap();
        assert!(f.selects(&entry(Section::Data, "sales", "orders")));
        assert!(!f.selects(&entry(Section::Data, "public", "sales")));
        assert!(f.selects(&entry(Section::Predata, "public", "x")));
    }

    #[test]
    fn section_switches() {
        let data_only = RestoreFilter::new(None, true, false).unwrap();
        assert!(!data_only.selects(&entry(Section::Predata, "", "s")));
        assert!(data_only.selects(&entry(Section::Data, "public", "foo")));
        let meta_only = RestoreFilter::new(None, false, true).unwrap();
        assert!(meta_only.selects(&entry(Section::Predata, "", "s")));
        assert!(!meta_only.selects(&entry(Section::Data, "public", "foo")));
        assert!(RestoreFilter::new(None, true, true).is_err());
    }

    #[test]
    fn bad_pattern_is_config_error() {
        assert_eq!(RestoreFilter::new(Some("("), false, false).unwrap_err().kind_str(), "config_error");
    }

    #[test]
    fn reads_exact_byte_range() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predata.sql");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"\n\nCREATE SCHEMA a;\n\nCREATE SCHEMA b;").unwrap();
        drop(f);
        let mut e = entry(Section::Predata, "", "b");
        e.start_offset = 18;
        e.end_offset = 36;
        let mut f = File::open(&path).unwrap();
        assert_eq!(read_range(&mut f, &e).unwrap(), "\n\nCREATE SCHEMA b;");
    }
}
