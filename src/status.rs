//! Run outcome and the summaries handed to reporting.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

use crate::error::CopyError;

/// Final state of a backup or restore run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// Every fatal step completed but some copy jobs failed.
    SuccessWithErrors(Vec<CopyError>),
    /// A fatal error stopped the run; holds its text.
    Aborted(String),
}

impl RunStatus {
    pub fn from_copy_errors(errors: Vec<CopyError>) -> Self {
        if errors.is_empty() { RunStatus::Success } else { RunStatus::SuccessWithErrors(errors) }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Aborted(_) => 1,
            RunStatus::SuccessWithErrors(_) => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::SuccessWithErrors(_) => "success_with_errors",
            RunStatus::Aborted(_) => "aborted",
        }
    }

    pub fn is_success(&self) -> bool { matches!(self, RunStatus::Success) }

    /// Error lines for the report, one per failed job or the abort reason.
    pub fn error_messages(&self) -> Vec<String> {
        match self {
            RunStatus::Success => Vec::new(),
            RunStatus::SuccessWithErrors(errs) => errs.iter().map(|e| e.to_string()).collect(),
            RunStatus::Aborted(reason) => vec![reason.clone()],
        }
    }
}

impl Serialize for RunStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut st = serializer.serialize_struct("RunStatus", 3)?;
        st.serialize_field("status", self.label())?;
        st.serialize_field("exit_code", &self.exit_code())?;
        st.serialize_field("errors", &self.error_messages())?;
        st.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    pub timestamp: String,
    /// Rendered object count by kind label ("schemas", "text search parsers", ...).
    pub object_counts: BTreeMap<String, usize>,
    pub tables_copied: usize,
    pub rows_copied: u64,
    pub status: RunStatus,
}

impl BackupSummary {
    pub fn aborted(timestamp: &str, object_counts: BTreeMap<String, usize>, reason: impl Into<String>) -> Self {
        Self { timestamp: timestamp.to_string(), object_counts, tables_copied: 0, rows_copied: 0, status: RunStatus::Aborted(reason.into()) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreSummary {
    pub timestamp: String,
    pub statements_replayed: usize,
    pub tables_restored: usize,
    pub rows_restored: u64,
    pub status: RunStatus,
}

impl RestoreSummary {
    pub fn aborted(timestamp: &str, statements_replayed: usize, reason: impl Into<String>) -> Self {
        Self { timestamp: timestamp.to_string(), statements_replayed, tables_restored: 0, rows_restored: 0, status: RunStatus::Aborted(reason.into()) }
    }
}
