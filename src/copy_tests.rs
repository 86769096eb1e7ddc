use super::*;
use crate::segment::{PassThroughResolver, TemplateResolver};
use futures_util::future::BoxFuture;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use tokio::sync::Notify;

/// Records every statement and fails or stalls those containing a marker.
/// A stalled statement keeps its session busy until cancelled.
#[derive(Default)]
struct MockCluster {
    log: Mutex<Vec<(usize, String)>>,
    fail_on: Vec<String>,
    hang_on: Option<String>,
    refuse_connections: bool,
    /// Refuse every connection after the first `n`.
    refuse_after: Option<usize>,
    copy_delay_ms: u64,
    connects: AtomicUsize,
    cancels: AtomicUsize,
    active_copies: AtomicUsize,
    max_active_copies: AtomicUsize,
}

impl MockCluster {
    fn statements(&self) -> Vec<String> { self.log.lock().iter().map(|(_, s)| s.clone()).collect() }

    fn copies(&self) -> Vec<String> { self.statements().into_iter().filter(|s| s.starts_with("COPY")).collect() }
}

struct MockSession {
    cluster: Arc<MockCluster>,
    id: usize,
    busy: AtomicBool,
    resume: Notify,
}

impl MockSession {
    fn new(cluster: Arc<MockCluster>, id: usize) -> Self {
        Self { cluster, id, busy: AtomicBool::new(false), resume: Notify::new() }
    }

    /// Statements queue behind one the server is still running.
    async fn wait_idle(&self) {
        loop {
            let resumed = self.resume.notified();
            if !self.busy.load(Ordering::SeqCst) {
                return;
            }
            resumed.await;
        }
    }
}

impl Session for MockSession {
    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<u64, SessionError>> {
        Box::pin(async move {
            self.cluster.log.lock().push((self.id, sql.to_string()));
            self.wait_idle().await;
            if let Some(marker) = &self.cluster.hang_on {
                if sql.contains(marker.as_str()) {
                    self.busy.store(true, Ordering::SeqCst);
                    self.wait_idle().await;
                    return Err(SessionError::new("ERROR: canceling statement due to user request"));
                }
            }
            if self.cluster.fail_on.iter().any(|m| sql.contains(m.as_str())) {
                return Err(SessionError::new("ERROR: could not open file for writing: Permission denied"));
            }
            if sql.starts_with("COPY") {
                let now = self.cluster.active_copies.fetch_add(1, Ordering::SeqCst) + 1;
                self.cluster.max_active_copies.fetch_max(now, Ordering::SeqCst);
                if self.cluster.copy_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.cluster.copy_delay_ms)).await;
                }
                self.cluster.active_copies.fetch_sub(1, Ordering::SeqCst);
                return Ok(10);
            }
            Ok(0)
        })
    }

    fn query_scalar<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Option<String>, SessionError>> {
        Box::pin(async move {
            self.cluster.log.lock().push((self.id, sql.to_string()));
            Ok(Some("00000003-0000001B-1".to_string()))
        })
    }

    fn cancel(&self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move {
            self.cluster.cancels.fetch_add(1, Ordering::SeqCst);
            self.busy.store(false, Ordering::SeqCst);
            self.resume.notify_waiters();
            Ok(())
        })
    }
}

struct MockFactory(Arc<MockCluster>);

impl SessionFactory for MockFactory {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Session>, SessionError>> {
        Box::pin(async move {
            if self.0.refuse_connections {
                return Err(SessionError::new("FATAL: too many connections"));
            }
            let id = self.0.connects.fetch_add(1, Ordering::SeqCst);
            if self.0.refuse_after.map_or(false, |n| id >= n) {
                return Err(SessionError::new("FATAL: too many connections"));
            }
            Ok(Box::new(MockSession::new(Arc::clone(&self.0), id)) as Box<dyn Session>)
        })
    }
}

fn segments(n: i32) -> Vec<Segment> {
    (0..n)
        .map(|i| Segment { content_id: i, hostname: format!("sdw{}", i), port: 40000 + i as u16, data_dir: PathBuf::from(format!("/data/gpseg{}", i)) })
        .collect()
}

fn ts() -> TimestampKey { TimestampKey::parse("20170101010101").unwrap() }

fn copier(cluster: &Arc<MockCluster>, resolver: Arc<dyn PathResolver>, segs: Vec<Segment>, jobs: usize, timeout_ms: u64) -> DataCopier {
    DataCopier::new(Arc::new(MockFactory(Arc::clone(cluster))), resolver, segs, jobs, Duration::from_millis(timeout_ms))
}

#[tokio::test]
async fn one_table_with_server_side_paths_issues_one_copy() {
    let cluster = Arc::new(MockCluster::default());
    let c = copier(&cluster, Arc::new(PassThroughResolver), segments(3), 4, 5_000);
    let table = Relation::new(3456, 2345, "public", "foo");
    let toc = Toc::new();
    let report = c.export_tables(&[table], &ts(), &toc, None).await.unwrap();
    assert_eq!(
        cluster.copies(),
        vec!["COPY public.foo TO '<SEG_DATA_DIR>/backups/20170101/20170101010101/gpbackup_<SEGID>_20170101010101_3456' WITH CSV DELIMITER ',' ON SEGMENT;"]
    );
    assert!(report.errors.is_empty());
    assert_eq!(report.errors.len(), 0);
    assert_eq!(cluster.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn one_table_one_segment_resolves_local_path() {
    let cluster = Arc::new(MockCluster::default());
    let c = copier(&cluster, Arc::new(TemplateResolver), segments(1), 2, 5_000);
    let toc = Toc::new();
    c.export_tables(&[Relation::new(3456, 2345, "public", "foo")], &ts(), &toc, Some("snap")).await.unwrap();
    assert_eq!(
        cluster.copies(),
        vec!["COPY public.foo TO '/data/gpseg0/backups/20170101/20170101010101/gpbackup_0_20170101010101_3456' WITH CSV DELIMITER ',' ON SEGMENT;"]
    );
    let data = toc.entries(Section::Data);
    assert_eq!(data.len(), 1);
    assert_eq!((data[0].start_offset, data[0].end_offset), (0, 10));
    assert_eq!(data[0].object_type, TABLE_DATA);
}

#[tokio::test]
async fn every_worker_joins_the_exported_snapshot() {
    let cluster = Arc::new(MockCluster::default());
    let c = copier(&cluster, Arc::new(TemplateResolver), segments(2), 2, 5_000);
    let tables: Vec<Relation> = (0..3).map(|i| Relation::new(100 + i, 1, "public", format!("t{}", i))).collect();
    c.export_tables(&tables, &ts(), &Toc::new(), Some("00000003-0000001B-1")).await.unwrap();

    let log = cluster.log.lock().clone();
    let workers = cluster.connects.load(Ordering::SeqCst);
    assert_eq!(workers, 2);
    for id in 0..workers {
        let mine: Vec<&str> = log.iter().filter(|(s, _)| *s == id).map(|(_, q)| q.as_str()).collect();
        assert_eq!(mine[0], "BEGIN ISOLATION LEVEL REPEATABLE READ");
        assert_eq!(mine[1], "SET TRANSACTION SNAPSHOT '00000003-0000001B-1'");
        assert_eq!(*mine.last().unwrap(), "COMMIT");
    }
    assert_eq!(cluster.copies().len(), 6);
}

#[tokio::test]
async fn failed_job_is_isolated_and_reported_once() {
    let cluster = Arc::new(MockCluster { fail_on: vec!["gpbackup_1_20170101010101_200'".into()], ..Default::default() });
    let c = copier(&cluster, Arc::new(TemplateResolver), segments(2), 3, 5_000);
    let tables = vec![
        Relation::new(100, 1, "public", "a"),
        Relation::new(200, 1, "public", "bad"),
        Relation::new(300, 1, "public", "c"),
    ];
    let toc = Toc::new();
    let report = c.export_tables(&tables, &ts(), &toc, None).await.unwrap();

    assert_eq!(cluster.copies().len(), 6);
    assert_eq!(report.errors.len(), 1);
    let err = &report.errors[0];
    assert_eq!((err.table.as_str(), err.oid, err.segment), ("bad", 200, Some(1)));
    assert!(err.message.contains("Permission denied"));
    assert_eq!(report.per_table, vec![Some(20), None, Some(20)]);
    assert_eq!(report.rows_copied(), 40);

    // failed job rolled back to its savepoint, others released theirs
    let stmts = cluster.statements();
    assert_eq!(stmts.iter().filter(|s| s.starts_with("ROLLBACK TO SAVEPOINT")).count(), 1);
    assert_eq!(stmts.iter().filter(|s| s.starts_with("RELEASE SAVEPOINT")).count(), 5);

    // the incomplete table gets no data entry; order follows submission
    let names: Vec<String> = toc.entries(Section::Data).into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["a", "c"]);
    let data = toc.entries(Section::Data);
    assert_eq!((data[1].start_offset, data[1].end_offset), (20, 40));
}

#[tokio::test]
async fn hung_command_becomes_a_timeout_error() {
    let cluster = Arc::new(MockCluster { hang_on: Some("_200'".into()), ..Default::default() });
    let c = copier(&cluster, Arc::new(PassThroughResolver), segments(1), 2, 50);
    let tables = vec![Relation::new(100, 1, "public", "ok"), Relation::new(200, 1, "public", "stuck")];
    let report = c.export_tables(&tables, &ts(), &Toc::new(), None).await.unwrap();
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].message.contains("timed out after 50ms"));
    assert_eq!(report.errors[0].segment, None);
    assert_eq!(report.per_table[0], Some(10));
    assert_eq!(cluster.cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn timed_out_statement_is_cancelled_before_the_next_job() {
    let cluster = Arc::new(MockCluster { hang_on: Some("_200'".into()), ..Default::default() });
    let c = copier(&cluster, Arc::new(PassThroughResolver), segments(1), 1, 50);
    let tables = vec![
        Relation::new(100, 1, "public", "a"),
        Relation::new(200, 1, "public", "stuck"),
        Relation::new(300, 1, "public", "c"),
    ];
    let report = c.export_tables(&tables, &ts(), &Toc::new(), None).await.unwrap();

    // only the stuck table fails; the session is usable again afterwards
    assert_eq!(cluster.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].table, "stuck");
    assert_eq!(report.per_table, vec![Some(10), None, Some(10)]);
    let stmts = cluster.statements();
    assert_eq!(stmts.iter().filter(|s| s.starts_with("ROLLBACK TO SAVEPOINT")).count(), 1);
    assert_eq!(stmts.last().map(String::as_str), Some("COMMIT"));
}

#[tokio::test]
async fn connection_failure_aborts_without_data_entries() {
    let cluster = Arc::new(MockCluster { refuse_connections: true, ..Default::default() });
    let c = copier(&cluster, Arc::new(TemplateResolver), segments(2), 2, 5_000);
    let toc = Toc::new();
    let err = c.export_tables(&[Relation::new(1, 1, "public", "a")], &ts(), &toc, None).await.unwrap_err();
    assert_eq!(err.kind_str(), "session_error");
    assert!(err.is_fatal());
    assert_eq!(toc.len(Section::Data), 0);
}

#[tokio::test]
async fn aborted_import_rolls_back_every_worker() {
    let cluster = Arc::new(MockCluster { refuse_after: Some(1), ..Default::default() });
    let c = copier(&cluster, Arc::new(TemplateResolver), segments(1), 2, 5_000);
    let tables: Vec<Relation> = (0..3).map(|i| Relation::new(10 + i, 1, "public", format!("t{}", i))).collect();
    let err = c.import_tables(&tables, &ts()).await.unwrap_err();
    assert_eq!(err.kind_str(), "session_error");

    let stmts = cluster.statements();
    assert!(!stmts.iter().any(|s| s == "COMMIT"));
    assert_eq!(stmts.last().map(String::as_str), Some("ROLLBACK"));
}

#[tokio::test]
async fn worker_limit_bounds_concurrency() {
    let cluster = Arc::new(MockCluster { copy_delay_ms: 20, ..Default::default() });
    let c = copier(&cluster, Arc::new(TemplateResolver), segments(3), 2, 5_000);
    let tables: Vec<Relation> = (0..4).map(|i| Relation::new(10 + i, 1, "public", format!("t{}", i))).collect();
    let report = c.export_tables(&tables, &ts(), &Toc::new(), None).await.unwrap();
    assert_eq!(report.tables_copied(), 4);
    assert_eq!(cluster.connects.load(Ordering::SeqCst), 2);
    assert!(cluster.max_active_copies.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn import_mirrors_export() {
    let cluster = Arc::new(MockCluster::default());
    let c = copier(&cluster, Arc::new(TemplateResolver), segments(1), 1, 5_000);
    let report = c.import_tables(&[Relation::new(2345, 1, "public", "foo|bar")], &ts()).await.unwrap();
    assert_eq!(report.tables_copied(), 1);
    let stmts = cluster.statements();
    assert_eq!(stmts[0], "BEGIN");
    assert!(!stmts.iter().any(|s| s.contains("SNAPSHOT")));
    assert_eq!(
        cluster.copies(),
        vec!["COPY public.\"foo|bar\" FROM '/data/gpseg0/backups/20170101/20170101010101/gpbackup_0_20170101010101_2345' WITH CSV DELIMITER ',' ON SEGMENT;"]
    );
    assert_eq!(stmts.last().map(String::as_str), Some("COMMIT"));
}

#[tokio::test]
async fn per_segment_resolution_requires_segments() {
    let cluster = Arc::new(MockCluster::default());
    let c = copier(&cluster, Arc::new(TemplateResolver), Vec::new(), 1, 5_000);
    let err = c.export_tables(&[Relation::new(1, 1, "public", "a")], &ts(), &Toc::new(), None).await.unwrap_err();
    assert_eq!(err.kind_str(), "config_error");
}

#[tokio::test]
async fn snapshot_export_opens_repeatable_read() {
    let cluster = Arc::new(MockCluster::default());
    let session = MockFactory(Arc::clone(&cluster)).connect().await.unwrap();
    let snap = export_snapshot(session.as_ref()).await.unwrap();
    assert_eq!(snap, "00000003-0000001B-1");
    assert_eq!(cluster.statements(), vec!["BEGIN ISOLATION LEVEL REPEATABLE READ", "SELECT pg_export_snapshot()"]);
}
