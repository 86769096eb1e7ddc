//! Unified error model for backup and restore runs.
//! Object-scoped failures (one table on one segment) are carried as `CopyError`
//! values and collected; every other variant terminates the run.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

use crate::metadata::Oid;

/// One failed (table, segment) bulk-copy job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyError {
    pub schema: String,
    pub table: String,
    pub oid: Oid,
    /// Segment content id; `None` when one command covered every segment.
    pub segment: Option<i32>,
    /// Underlying database (or timeout) error text.
    pub message: String,
}

impl Display for CopyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.segment {
            Some(seg) => write!(f, "copy of {}.{} (oid {}) on segment {} failed: {}", self.schema, self.table, self.oid, seg, self.message),
            None => write!(f, "copy of {}.{} (oid {}) failed: {}", self.schema, self.table, self.oid, self.message),
        }
    }
}

impl std::error::Error for CopyError {}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("cannot render DDL for {object}: {message}")]
    DdlRender { object: String, message: String },

    #[error(transparent)]
    Copy(#[from] CopyError),

    #[error("table of contents is inconsistent: {0}")]
    TocConsistency(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session error: {0}")]
    Session(#[from] crate::session::SessionError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BackupError {
    pub fn ddl(object: impl Into<String>, message: impl Into<String>) -> Self {
        BackupError::DdlRender { object: object.into(), message: message.into() }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        BackupError::Io { context: context.into(), source }
    }

    pub fn toc(message: impl Into<String>) -> Self { BackupError::TocConsistency(message.into()) }

    pub fn config(message: impl Into<String>) -> Self { BackupError::Config(message.into()) }

    /// Stable short code for summaries and logs.
    pub fn kind_str(&self) -> &'static str {
        match self {
            BackupError::DdlRender { .. } => "ddl_render_error",
            BackupError::Copy(_) => "copy_error",
            BackupError::TocConsistency(_) => "toc_consistency_error",
            BackupError::Io { .. } => "io_error",
            BackupError::Session(_) => "session_error",
            BackupError::Config(_) => "config_error",
        }
    }

    /// Whether the error ends the whole run rather than a single object.
    pub fn is_fatal(&self) -> bool { !matches!(self, BackupError::Copy(_)) }
}

pub type BackupResult<T> = Result<T, BackupError>;
