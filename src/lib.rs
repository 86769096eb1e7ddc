//! Cluster backup core: deterministic predata DDL indexed by a table of
//! contents, and a parallel per-segment `COPY ... ON SEGMENT` data protocol
//! running under one exported snapshot.

pub mod error;
pub mod ident;
pub mod metadata;
pub mod output;
pub mod toc;
pub mod table_map;
pub mod ddl;
pub mod paths;
pub mod segment;
pub mod session;
pub mod copy;
pub mod status;
pub mod config;
pub mod backup;
pub mod restore;

pub use backup::BackupRun;
pub use error::{BackupError, BackupResult, CopyError};
pub use restore::{RestoreFilter, RestoreRun};
pub use status::{BackupSummary, RestoreSummary, RunStatus};
