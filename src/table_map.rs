//! Table map: `<qualified-name>: <oid>` per line.
//! Restore uses it to find the data files (named by oid) for each table.
//! Names holding line breaks are written in `U&"..."` form so every table
//! stays on one line.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use crate::error::{BackupError, BackupResult};
use crate::ident::{make_fqn, quote_ident_single_line, split_qualified_name};
use crate::metadata::{Oid, Relation};

const SEPARATOR: &str = ": ";

/// Render one newline-terminated line per table, in the given order.
pub fn write_table_map<W: Write>(out: &mut W, tables: &[Relation]) -> std::io::Result<()> {
    for table in tables {
        let name = format!("{}.{}", quote_ident_single_line(&table.schema), quote_ident_single_line(&table.name));
        writeln!(out, "{}{}{}", name, SEPARATOR, table.oid)?;
    }
    Ok(())
}

pub fn write_table_map_file(path: &Path, tables: &[Relation]) -> BackupResult<()> {
    let mut buf = Vec::new();
    write_table_map(&mut buf, tables).map_err(|e| BackupError::io("render table map", e))?;
    std::fs::write(path, buf).map_err(|e| BackupError::io(format!("write table map {}", path.display()), e))
}

/// Parsed table map keyed by the `make_fqn` form of each table name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableMap {
    oids: HashMap<String, Oid>,
}

impl TableMap {
    pub fn from_relations(tables: &[Relation]) -> Self {
        Self { oids: tables.iter().map(|t| (t.qualified_name(), t.oid)).collect() }
    }

    /// Parse the map text. Oids never contain the separator, so splitting on
    /// its last occurrence is unambiguous even for quoted names containing it.
    /// Keys are normalized to `make_fqn` form.
    pub fn parse(text: &str) -> BackupResult<Self> {
        let mut oids = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.is_empty() { continue; }
            let (name, oid) = line
                .rsplit_once(SEPARATOR)
                .ok_or_else(|| BackupError::toc(format!("table map line {} has no separator: {}", lineno + 1, line)))?;
            let oid: Oid = oid
                .trim()
                .parse()
                .map_err(|_| BackupError::toc(format!("table map line {} has invalid oid: {}", lineno + 1, line)))?;
            let (schema, table) = split_qualified_name(name)
                .ok_or_else(|| BackupError::toc(format!("table map line {} has a malformed name: {}", lineno + 1, line)))?;
            let name = make_fqn(&schema, &table);
            if oids.insert(name.clone(), oid).is_some() {
                return Err(BackupError::toc(format!("table map lists {} twice", name)));
            }
        }
        Ok(Self { oids })
    }

    pub fn read_from(path: &Path) -> BackupResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| BackupError::io(format!("read table map {}", path.display()), e))?;
        Self::parse(&text)
    }

    pub fn get(&self, qualified_name: &str) -> Option<Oid> { self.oids.get(qualified_name).copied() }

    /// Look up by unquoted schema and table names.
    pub fn lookup(&self, schema: &str, name: &str) -> Option<Oid> { self.get(&make_fqn(schema, name)) }

    pub fn len(&self) -> usize { self.oids.len() }

    pub fn is_empty(&self) -> bool { self.oids.is_empty() }

    pub fn as_map(&self) -> &HashMap<String, Oid> { &self.oids }
}
