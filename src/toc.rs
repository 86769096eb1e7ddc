//! Table of contents
//! -----------------
//! Append-only index of everything a backup emitted: one entry per DDL block in
//! the predata stream and one entry per table whose data landed on every
//! segment. Restore reads it first to select statements and files without
//! re-parsing the DDL stream.
//!
//! Offsets for the Predata/Postdata sections are byte positions in the
//! corresponding file. Data-section offsets are cumulative row counts, one
//! range per table, in table submission order.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{BackupError, BackupResult};
use crate::ident::make_fqn;
use crate::table_map::TableMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    Predata,
    Data,
    Postdata,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Predata, Section::Data, Section::Postdata];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub schema: String,
    pub name: String,
    pub object_type: String,
    pub section: Section,
    pub start_offset: u64,
    pub end_offset: u64,
}

impl TocEntry {
    /// Quoted `schema.name`; schemas themselves have an empty schema part.
    pub fn qualified_name(&self) -> String {
        if self.schema.is_empty() { crate::ident::quote_ident(&self.name) } else { make_fqn(&self.schema, &self.name) }
    }
}

/// On-disk form of the table of contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocFile {
    pub predata_entries: Vec<TocEntry>,
    pub data_entries: Vec<TocEntry>,
    pub postdata_entries: Vec<TocEntry>,
}

impl TocFile {
    fn section(&self, section: Section) -> &Vec<TocEntry> {
        match section {
            Section::Predata => &self.predata_entries,
            Section::Data => &self.data_entries,
            Section::Postdata => &self.postdata_entries,
        }
    }

    fn section_mut(&mut self, section: Section) -> &mut Vec<TocEntry> {
        match section {
            Section::Predata => &mut self.predata_entries,
            Section::Data => &mut self.data_entries,
            Section::Postdata => &mut self.postdata_entries,
        }
    }
}

/// Shared, append-only TOC. Appends are serialized; nothing is ever removed.
#[derive(Debug, Default)]
pub struct Toc {
    inner: Mutex<TocFile>,
}

fn check_append(prev: Option<&TocEntry>, section: Section, start: u64, end: u64) -> BackupResult<()> {
    if end < start {
        return Err(BackupError::toc(format!("{:?} entry has end offset {} before start offset {}", section, end, start)));
    }
    if section != Section::Data && end == start {
        return Err(BackupError::toc(format!("{:?} entry at offset {} is empty", section, start)));
    }
    if let Some(prev) = prev {
        if start < prev.end_offset {
            return Err(BackupError::toc(format!(
                "{:?} entry starting at {} overlaps {} ending at {}",
                section, start, prev.qualified_name(), prev.end_offset
            )));
        }
    }
    Ok(())
}

impl Toc {
    pub fn new() -> Self { Self::default() }

    /// Append an entry. Offsets must not go backwards or overlap the previous
    /// entry in the same section.
    pub fn record(
        &self,
        section: Section,
        schema: &str,
        name: &str,
        object_type: &str,
        start_offset: u64,
        end_offset: u64,
    ) -> BackupResult<()> {
        let mut file = self.inner.lock();
        let entries = file.section_mut(section);
        check_append(entries.last(), section, start_offset, end_offset)?;
        debug!(target: "segbackup::toc", "record {:?} {} {}.{} [{}, {})", section, object_type, schema, name, start_offset, end_offset);
        entries.push(TocEntry {
            schema: schema.to_string(),
            name: name.to_string(),
            object_type: object_type.to_string(),
            section,
            start_offset,
            end_offset,
        });
        Ok(())
    }

    pub fn entries(&self, section: Section) -> Vec<TocEntry> { self.inner.lock().section(section).clone() }

    pub fn len(&self, section: Section) -> usize { self.inner.lock().section(section).len() }

    /// Entries of every section matching `pred`, Predata first, emission order kept.
    pub fn filter<P: Fn(&TocEntry) -> bool>(&self, pred: P) -> Vec<TocEntry> {
        let file = self.inner.lock();
        Section::ALL
            .iter()
            .flat_map(|s| file.section(*s).iter())
            .filter(|e| pred(e))
            .cloned()
            .collect()
    }

    /// Every Data entry must name a table present in the table map.
    pub fn validate_data_entries(&self, table_map: &TableMap) -> BackupResult<()> {
        let file = self.inner.lock();
        for entry in &file.data_entries {
            let qualified = entry.qualified_name();
            if table_map.get(&qualified).is_none() {
                return Err(BackupError::toc(format!("data entry {} has no table map entry", qualified)));
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> TocFile { self.inner.lock().clone() }

    /// Rebuild from a persisted file, re-checking offset ordering.
    pub fn from_file(file: TocFile) -> BackupResult<Self> {
        for section in Section::ALL {
            let entries = file.section(section);
            for (i, e) in entries.iter().enumerate() {
                if e.section != section {
                    return Err(BackupError::toc(format!("entry {} listed under {:?} but tagged {:?}", e.qualified_name(), section, e.section)));
                }
                check_append(if i == 0 { None } else { entries.get(i - 1) }, section, e.start_offset, e.end_offset)?;
            }
        }
        Ok(Self { inner: Mutex::new(file) })
    }

    pub fn write_to(&self, path: &Path) -> BackupResult<()> {
        let text = serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| BackupError::io(format!("serialize toc {}", path.display()), e.into()))?;
        std::fs::write(path, text).map_err(|e| BackupError::io(format!("write toc {}", path.display()), e))
    }

    pub fn read_from(path: &Path) -> BackupResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| BackupError::io(format!("read toc {}", path.display()), e))?;
        let file: TocFile = serde_json::from_str(&text)
            .map_err(|e| BackupError::toc(format!("cannot parse {}: {}", path.display(), e)))?;
        Self::from_file(file)
    }
}

#[cfg(test)]
#[path = "toc_tests.rs"]
mod toc_tests;
