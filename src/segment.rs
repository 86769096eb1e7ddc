//! Cluster segments and data-file path resolution.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::paths::{SEGID_PLACEHOLDER, SEG_DATA_DIR_PLACEHOLDER};

/// One primary segment of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub content_id: i32,
    pub hostname: String,
    pub port: u16,
    pub data_dir: PathBuf,
}

/// Turns a data-file template into the concrete path for one segment.
pub trait PathResolver: Send + Sync {
    /// When false the server expands the placeholders itself and a single
    /// command per table covers every segment.
    fn per_segment(&self) -> bool;

    fn resolve(&self, template: &str, segment: Option<&Segment>) -> String;
}

/// Substitutes the segment data directory and content id locally; one copy
/// command is issued per (table, segment).
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateResolver;

impl PathResolver for TemplateResolver {
    fn per_segment(&self) -> bool { true }

    fn resolve(&self, template: &str, segment: Option<&Segment>) -> String {
        match segment {
            Some(seg) => template
                .replace(SEG_DATA_DIR_PLACEHOLDER, &seg.data_dir.to_string_lossy())
                .replace(SEGID_PLACEHOLDER, &seg.content_id.to_string()),
            None => template.to_string(),
        }
    }
}

/// Leaves the placeholders for the server to expand on each segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughResolver;

impl PathResolver for PassThroughResolver {
    fn per_segment(&self) -> bool { false }

    fn resolve(&self, template: &str, _segment: Option<&Segment>) -> String { template.to_string() }
}
