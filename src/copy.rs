//! Segment data-copy protocol
//! --------------------------
//! Moves table rows between the cluster and per-segment CSV files with
//! `COPY ... ON SEGMENT`. Work is split into (table, segment) jobs that a
//! bounded pool of workers pulls from a shared queue. Each worker owns one
//! session, opened inside a transaction that shares the coordinator's exported
//! snapshot, so every table is read as of the same point in time.
//!
//! A failing job is rolled back to its savepoint and reported as a
//! `CopyError`; the worker moves on. A job that outlives the command timeout
//! is cancelled on the server so later statements on the session do not
//! queue behind it. Only session setup failures abort the pool.
//!
//! Workers hand their open sessions back when the queue drains. The pool
//! commits them all once every worker has finished cleanly, and rolls them
//! all back after a fatal error, so an aborted import leaves no rows behind.
//! Data TOC entries are recorded after the pool drains, in table submission
//! order, and only for tables whose every job succeeded.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{BackupError, BackupResult, CopyError};
use crate::ident::escape_literal;
use crate::metadata::Relation;
use crate::paths::{segment_data_file_template, TimestampKey};
use crate::segment::{PathResolver, Segment};
use crate::session::{Session, SessionError, SessionFactory};
use crate::toc::{Section, Toc};

pub const TABLE_DATA: &str = "TABLE DATA";
const SAVEPOINT: &str = "segbackup_copy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    Export,
    Import,
}

fn quoted_path(path: &str) -> Result<String, SessionError> {
    escape_literal(path).map_err(|pos| SessionError::new(format!("path contains a NUL byte at position {}", pos)))
}

pub fn copy_out_statement(relation: &Relation, path: &str) -> Result<String, SessionError> {
    Ok(format!("COPY {} TO '{}' WITH CSV DELIMITER ',' ON SEGMENT;", relation.qualified_name(), quoted_path(path)?))
}

pub fn copy_in_statement(relation: &Relation, path: &str) -> Result<String, SessionError> {
    Ok(format!("COPY {} FROM '{}' WITH CSV DELIMITER ',' ON SEGMENT;", relation.qualified_name(), quoted_path(path)?))
}

/// Export one table's shard(s) to `path`. Returns the row count reported by the server.
pub async fn copy_table_out(session: &dyn Session, relation: &Relation, path: &str) -> Result<u64, SessionError> {
    session.execute(&copy_out_statement(relation, path)?).await
}

/// Load one table's shard(s) from `path`.
pub async fn copy_table_in(session: &dyn Session, relation: &Relation, path: &str) -> Result<u64, SessionError> {
    session.execute(&copy_in_statement(relation, path)?).await
}

/// Open a repeatable-read transaction on the coordinator session and export
/// its snapshot for the workers. The transaction must stay open until every
/// worker has imported the snapshot.
pub async fn export_snapshot(session: &dyn Session) -> Result<String, SessionError> {
    session.execute("BEGIN ISOLATION LEVEL REPEATABLE READ").await?;
    session
        .query_scalar("SELECT pg_export_snapshot()")
        .await?
        .ok_or_else(|| SessionError::new("pg_export_snapshot() returned no snapshot id"))
}

/// Aggregate result of one pool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// Per submitted table: total rows when every segment job succeeded.
    pub per_table: Vec<Option<u64>>,
    /// Failed jobs, ordered by table submission then segment.
    pub errors: Vec<CopyError>,
}

impl CopyReport {
    pub fn tables_copied(&self) -> usize { self.per_table.iter().filter(|t| t.is_some()).count() }

    pub fn rows_copied(&self) -> u64 { self.per_table.iter().flatten().sum() }
}

struct CopyJob {
    table_index: usize,
    relation: Arc<Relation>,
    segment: Option<i32>,
    path: String,
}

struct JobOutcome {
    table_index: usize,
    segment: Option<i32>,
    result: Result<u64, CopyError>,
}

struct WorkerContext {
    factory: Arc<dyn SessionFactory>,
    queue: Mutex<VecDeque<CopyJob>>,
    outcomes: Mutex<Vec<JobOutcome>>,
    abort: AtomicBool,
    direction: CopyDirection,
    snapshot: Option<String>,
    timeout: Duration,
}

impl WorkerContext {
    /// Bound `fut` by the command timeout. On expiry the statement is
    /// cancelled server-side; dropping the future alone leaves it running.
    async fn timed<T>(
        &self,
        session: &dyn Session,
        fut: impl Future<Output = Result<T, SessionError>>,
    ) -> Result<T, SessionError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(r) => r,
            Err(_) => {
                match tokio::time::timeout(self.timeout, session.cancel()).await {
                    Ok(Ok(())) => debug!(target: "segbackup::copy", "cancelled statement after timeout"),
                    Ok(Err(e)) => warn!(target: "segbackup::copy", "cancel after timeout failed: {}", e),
                    Err(_) => warn!(target: "segbackup::copy", "cancel after timeout did not complete"),
                }
                Err(SessionError::new(format!("command timed out after {}ms", self.timeout.as_millis())))
            }
        }
    }

    async fn run_job(&self, session: &dyn Session, job: &CopyJob) -> Result<u64, SessionError> {
        self.timed(session, session.execute(&format!("SAVEPOINT {}", SAVEPOINT))).await?;
        let copied = match self.direction {
            CopyDirection::Export => self.timed(session, copy_table_out(session, &job.relation, &job.path)).await,
            CopyDirection::Import => self.timed(session, copy_table_in(session, &job.relation, &job.path)).await,
        };
        match copied {
            Ok(rows) => {
                self.timed(session, session.execute(&format!("RELEASE SAVEPOINT {}", SAVEPOINT))).await?;
                Ok(rows)
            }
            Err(e) => {
                if let Err(rb) = self.timed(session, session.execute(&format!("ROLLBACK TO SAVEPOINT {}", SAVEPOINT))).await {
                    warn!(target: "segbackup::copy", "rollback after failed copy of {} failed: {}", job.relation.qualified_name(), rb);
                }
                Err(e)
            }
        }
    }
}

/// Drain the queue on one session. The session comes back with its
/// transaction still open; the pool decides how it ends.
async fn run_worker(ctx: Arc<WorkerContext>, worker_id: usize) -> BackupResult<Box<dyn Session>> {
    let session = ctx.factory.connect().await?;
    match ctx.direction {
        CopyDirection::Export => ctx.timed(session.as_ref(), session.execute("BEGIN ISOLATION LEVEL REPEATABLE READ")).await?,
        CopyDirection::Import => ctx.timed(session.as_ref(), session.execute("BEGIN")).await?,
    };
    if let Some(snapshot) = &ctx.snapshot {
        let sql = format!("SET TRANSACTION SNAPSHOT '{}'", snapshot.replace('\'', "''"));
        ctx.timed(session.as_ref(), session.execute(&sql)).await?;
    }
    debug!(target: "segbackup::copy", "worker {} ready", worker_id);

    loop {
        if ctx.abort.load(Ordering::SeqCst) {
            debug!(target: "segbackup::copy", "worker {} stopping on abort", worker_id);
            break;
        }
        let next = ctx.queue.lock().pop_front();
        let Some(job) = next else { break };
        let result = ctx.run_job(session.as_ref(), &job).await.map_err(|e| {
            let err = CopyError {
                schema: job.relation.schema.clone(),
                table: job.relation.name.clone(),
                oid: job.relation.oid,
                segment: job.segment,
                message: e.0,
            };
            warn!(target: "segbackup::copy", "{}", err);
            err
        });
        ctx.outcomes.lock().push(JobOutcome { table_index: job.table_index, segment: job.segment, result });
    }
    Ok(session)
}

/// Runs export and import jobs for a set of tables across the cluster.
pub struct DataCopier {
    factory: Arc<dyn SessionFactory>,
    resolver: Arc<dyn PathResolver>,
    segments: Vec<Segment>,
    jobs: usize,
    command_timeout: Duration,
}

impl DataCopier {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        resolver: Arc<dyn PathResolver>,
        segments: Vec<Segment>,
        jobs: usize,
        command_timeout: Duration,
    ) -> Self {
        Self { factory, resolver, segments, jobs: jobs.max(1), command_timeout }
    }

    fn build_queue(&self, relations: &[Relation], ts: &TimestampKey) -> BackupResult<VecDeque<CopyJob>> {
        let targets: Vec<Option<&Segment>> = if self.resolver.per_segment() {
            if self.segments.is_empty() {
                return Err(BackupError::config("per-segment path resolution needs at least one segment"));
            }
            self.segments.iter().map(Some).collect()
        } else {
            vec![None]
        };
        let mut queue = VecDeque::with_capacity(relations.len() * targets.len());
        for (table_index, relation) in relations.iter().enumerate() {
            let relation = Arc::new(relation.clone());
            let template = segment_data_file_template(ts, relation.oid);
            for seg in targets.iter().copied() {
                queue.push_back(CopyJob {
                    table_index,
                    relation: Arc::clone(&relation),
                    segment: seg.map(|s| s.content_id),
                    path: self.resolver.resolve(&template, seg),
                });
            }
        }
        Ok(queue)
    }

    async fn run_pool(
        &self,
        direction: CopyDirection,
        relations: &[Relation],
        ts: &TimestampKey,
        snapshot: Option<&str>,
    ) -> BackupResult<CopyReport> {
        let queue = self.build_queue(relations, ts)?;
        let total = queue.len();
        let workers = self.jobs.min(total.max(1));
        info!(
            target: "segbackup::copy",
            "{:?} of {} table(s): {} job(s) on {} worker(s)",
            direction, relations.len(), total, workers
        );
        let ctx = Arc::new(WorkerContext {
            factory: Arc::clone(&self.factory),
            queue: Mutex::new(queue),
            outcomes: Mutex::new(Vec::with_capacity(total)),
            abort: AtomicBool::new(false),
            direction,
            snapshot: snapshot.map(String::from),
            timeout: self.command_timeout,
        });

        let mut set = JoinSet::new();
        if total > 0 {
            for worker_id in 0..workers {
                set.spawn(run_worker(Arc::clone(&ctx), worker_id));
            }
        }
        let mut sessions: Vec<Box<dyn Session>> = Vec::with_capacity(workers);
        let mut fatal: Option<BackupError> = None;
        while let Some(joined) = set.join_next().await {
            let err = match joined {
                Ok(Ok(session)) => {
                    sessions.push(session);
                    continue;
                }
                Ok(Err(e)) => e,
                Err(join_err) => BackupError::Session(SessionError::new(format!("copy worker failed: {}", join_err))),
            };
            warn!(target: "segbackup::copy", "aborting copy pool: {}", err);
            ctx.abort.store(true, Ordering::SeqCst);
            fatal.get_or_insert(err);
        }

        let end = if fatal.is_some() { "ROLLBACK" } else { "COMMIT" };
        for session in &sessions {
            if let Err(e) = ctx.timed(session.as_ref(), session.execute(end)).await {
                warn!(target: "segbackup::copy", "{} on worker session failed: {}", end, e);
                if fatal.is_none() {
                    fatal = Some(BackupError::Session(SessionError::new(format!("{} failed: {}", end, e))));
                }
            }
        }
        drop(sessions);
        if let Some(err) = fatal {
            return Err(err);
        }

        let mut outcomes = std::mem::take(&mut *ctx.outcomes.lock());
        outcomes.sort_by_key(|o| (o.table_index, o.segment));
        let mut report = CopyReport { per_table: vec![Some(0); relations.len()], errors: Vec::new() };
        for outcome in outcomes {
            match outcome.result {
                Ok(rows) => {
                    if let Some(total) = report.per_table[outcome.table_index].as_mut() {
                        *total += rows;
                    }
                }
                Err(e) => {
                    report.per_table[outcome.table_index] = None;
                    report.errors.push(e);
                }
            }
        }
        info!(
            target: "segbackup::copy",
            "{:?} finished: {} table(s), {} row(s), {} error(s)",
            direction, report.tables_copied(), report.rows_copied(), report.errors.len()
        );
        Ok(report)
    }

    /// Export every table, then record one Data TOC entry per fully copied
    /// table in submission order.
    pub async fn export_tables(
        &self,
        relations: &[Relation],
        ts: &TimestampKey,
        toc: &Toc,
        snapshot: Option<&str>,
    ) -> BackupResult<CopyReport> {
        let report = self.run_pool(CopyDirection::Export, relations, ts, snapshot).await?;
        let mut offset = toc.entries(Section::Data).last().map(|e| e.end_offset).unwrap_or(0);
        for (relation, rows) in relations.iter().zip(report.per_table.iter().copied()) {
            if let Some(rows) = rows {
                toc.record(Section::Data, &relation.schema, &relation.name, TABLE_DATA, offset, offset + rows)?;
                offset += rows;
            }
        }
        Ok(report)
    }

    /// Load every table from the files of backup `ts`. Rows become visible
    /// when each worker commits.
    pub async fn import_tables(&self, relations: &[Relation], ts: &TimestampKey) -> BackupResult<CopyReport> {
        self.run_pool(CopyDirection::Import, relations, ts, None).await
    }
}

#[cfg(test)]
#[path = "copy_tests.rs"]
mod copy_tests;
