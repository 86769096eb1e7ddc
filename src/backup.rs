//! Backup run: predata DDL, table map, then the parallel data export under
//! one exported snapshot. The TOC is written last, once every data entry
//! has been checked against the table map.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::BackupConfig;
use crate::copy::{export_snapshot, CopyReport, DataCopier};
use crate::ddl::print_predata;
use crate::error::{BackupError, BackupResult};
use crate::metadata::Catalog;
use crate::output::ByteCountWriter;
use crate::paths::{backup_dir, predata_file, table_map_file, toc_file, TimestampKey};
use crate::segment::PathResolver;
use crate::session::{SessionError, SessionFactory};
use crate::status::{BackupSummary, RunStatus};
use crate::table_map::{write_table_map_file, TableMap};
use crate::toc::Toc;

pub struct BackupRun {
    factory: Arc<dyn SessionFactory>,
    resolver: Arc<dyn PathResolver>,
    config: BackupConfig,
}

impl BackupRun {
    pub fn new(factory: Arc<dyn SessionFactory>, resolver: Arc<dyn PathResolver>, config: BackupConfig) -> Self {
        Self { factory, resolver, config }
    }

    /// Back up `catalog` under `ts`. Fatal errors become `RunStatus::Aborted`.
    pub async fn run(&self, catalog: &Catalog, ts: &TimestampKey) -> BackupSummary {
        info!(target: "segbackup::backup", "backup {} starting in {}", ts, self.config.coordinator_data_dir.display());
        let mut counts = BTreeMap::new();
        match self.execute(catalog, ts, &mut counts).await {
            Ok(summary) => {
                info!(
                    target: "segbackup::backup",
                    "backup {} finished: {} ({} table(s), {} row(s))",
                    ts, summary.status.label(), summary.tables_copied, summary.rows_copied
                );
                summary
            }
            Err(e) => {
                error!(target: "segbackup::backup", "backup {} aborted [{}]: {}", ts, e.kind_str(), e);
                BackupSummary::aborted(ts.as_str(), counts, e.to_string())
            }
        }
    }

    async fn execute(
        &self,
        catalog: &Catalog,
        ts: &TimestampKey,
        counts: &mut BTreeMap<String, usize>,
    ) -> BackupResult<BackupSummary> {
        self.config.validate()?;
        let mut catalog = catalog.clone();
        catalog.retain_schemas(|s| self.config.includes_schema(s));

        let root = &self.config.coordinator_data_dir;
        let dir = backup_dir(root, ts);
        std::fs::create_dir_all(&dir).map_err(|e| BackupError::io(format!("create {}", dir.display()), e))?;

        let toc = Toc::new();
        let predata_path = predata_file(root, ts);
        let file = File::create(&predata_path).map_err(|e| BackupError::io(format!("create {}", predata_path.display()), e))?;
        let mut out = ByteCountWriter::new(BufWriter::new(file));
        *counts = print_predata(&mut out, &toc, &catalog)?;
        info!(target: "segbackup::backup", "wrote {} predata byte(s) to {}", out.byte_count(), predata_path.display());

        write_table_map_file(&table_map_file(root, ts), &catalog.relations)?;
        counts.insert("tables".to_string(), catalog.relations.len());

        let report = if catalog.relations.is_empty() {
            CopyReport::default()
        } else {
            self.export_data(&catalog, ts, &toc).await?
        };

        toc.validate_data_entries(&TableMap::from_relations(&catalog.relations))?;
        toc.write_to(&toc_file(root, ts))?;

        Ok(BackupSummary {
            timestamp: ts.to_string(),
            object_counts: counts.clone(),
            tables_copied: report.tables_copied(),
            rows_copied: report.rows_copied(),
            status: RunStatus::from_copy_errors(report.errors),
        })
    }

    /// Hold the coordinator transaction open while the workers copy, so the
    /// exported snapshot stays importable.
    async fn export_data(&self, catalog: &Catalog, ts: &TimestampKey, toc: &Toc) -> BackupResult<CopyReport> {
        let timeout = self.config.command_timeout();
        let coordinator = self.factory.connect().await?;
        let snapshot = tokio::time::timeout(timeout, export_snapshot(coordinator.as_ref()))
            .await
            .map_err(|_| SessionError::new("exporting snapshot timed out"))??;
        info!(target: "segbackup::backup", "exported snapshot {}", snapshot);

        let copier = DataCopier::new(
            Arc::clone(&self.factory),
            Arc::clone(&self.resolver),
            self.config.segments.clone(),
            self.config.jobs,
            timeout,
        );
        let exported = copier.export_tables(&catalog.relations, ts, toc, Some(&snapshot)).await;
        let end = if exported.is_ok() { "COMMIT" } else { "ROLLBACK" };
        match tokio::time::timeout(timeout, coordinator.execute(end)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(target: "segbackup::backup", "{} on coordinator session failed: {}", end, e),
            Err(_) => warn!(target: "segbackup::backup", "{} on coordinator session timed out", end),
        }
        exported
    }
}
