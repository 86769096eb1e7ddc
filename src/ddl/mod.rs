//! DDL generation
//! --------------
//! Renders catalog records into the predata stream. Every object becomes one
//! block: a blank-line separator, its CREATE statement (plus dependent ALTERs),
//! then comment, owner and grants in that fixed order. The whole block is
//! rendered in memory first so a malformed record never leaves half a
//! statement in the stream, then written and indexed in the TOC.

use std::collections::BTreeMap;
use std::io::Write;
use tracing::debug;

use crate::error::{BackupError, BackupResult};
use crate::ident::{escape_literal, make_fqn, quote_ident};
use crate::metadata::{Catalog, Grantee, MetadataMap, ObjectKind, ObjectMetadata, Oid};
use crate::output::ByteCountWriter;
use crate::toc::{Section, Toc};

pub mod schema;
pub mod textsearch;

/// A catalog record that renders to a single predata block.
pub trait DdlObject {
    const KIND: ObjectKind;

    fn oid(&self) -> Oid;

    /// Schema recorded in the TOC; empty for schemas themselves.
    fn toc_schema(&self) -> &str;

    fn name(&self) -> &str;

    fn qualified_name(&self) -> String { make_fqn(self.toc_schema(), self.name()) }

    /// Reject records with missing required fields.
    fn validate(&self) -> Result<(), String>;

    /// CREATE statement and any dependent statements, each preceded by a
    /// blank-line separator. May be empty for objects that always exist.
    fn definition(&self, fqn: &str) -> String;
}

/// One line inside a `CREATE ... ( )` option list.
pub(crate) enum Clause<'a> {
    /// `KEY = value`, skipped when the value is absent or blank.
    Keyed(&'static str, Option<&'a str>),
    /// Copied as-is, skipped when absent or blank.
    Verbatim(Option<&'a str>),
}

pub(crate) fn create_block(kind: ObjectKind, fqn: &str, clauses: &[Clause<'_>]) -> String {
    let lines: Vec<String> = clauses
        .iter()
        .filter_map(|c| match c {
            // blank values count as absent
            Clause::Keyed(key, Some(v)) if !v.trim().is_empty() => Some(format!("{} = {}", key, v)),
            Clause::Verbatim(Some(v)) if !v.trim().is_empty() => Some((*v).to_string()),
            _ => None,
        })
        .collect();
    format!("\n\nCREATE {} {} (\n\t{}\n);", kind.keyword(), fqn, lines.join(",\n\t"))
}

pub(crate) fn required(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() { Err(format!("required field {} is empty", field)) } else { Ok(()) }
}

fn grantee_sql(grantee: &Grantee) -> String {
    match grantee {
        Grantee::Public => "PUBLIC".to_string(),
        Grantee::Role(role) => quote_ident(role),
    }
}

fn privileges_statements(meta: &ObjectMetadata, kind: ObjectKind, fqn: &str) -> String {
    let applicable = kind.grantable_privileges();
    if meta.privileges.is_empty() || applicable.is_empty() {
        return String::new();
    }
    let kw = kind.keyword();
    let mut out = format!("\n\nREVOKE ALL ON {} {} FROM PUBLIC;", kw, fqn);
    if let Some(owner) = &meta.owner {
        out.push_str(&format!("\nREVOKE ALL ON {} {} FROM {};", kw, fqn, quote_ident(owner)));
    }
    for acl in &meta.privileges {
        let held: Vec<&str> = applicable.iter().filter(|p| acl.privileges.contains(p)).map(|p| p.keyword()).collect();
        if held.is_empty() { continue; }
        let privs = if held.len() == applicable.len() { "ALL".to_string() } else { held.join(",") };
        let grant_option = if acl.grantable { " WITH GRANT OPTION" } else { "" };
        out.push_str(&format!("\nGRANT {} ON {} {} TO {}{};", privs, kw, fqn, grantee_sql(&acl.grantee), grant_option));
    }
    out.push('\n');
    out
}

/// Comment, owner and grant statements for one object, in that order.
pub fn object_metadata_statements(meta: &ObjectMetadata, kind: ObjectKind, fqn: &str) -> BackupResult<String> {
    let mut out = String::new();
    if let Some(comment) = &meta.comment {
        let escaped = escape_literal(comment)
            .map_err(|pos| BackupError::ddl(fqn, format!("comment contains a NUL byte at position {}", pos)))?;
        out.push_str(&format!("\n\nCOMMENT ON {} {} IS '{}';\n", kind.keyword(), fqn, escaped));
    }
    if let Some(owner) = &meta.owner {
        out.push_str(&format!("\n\nALTER {} {} OWNER TO {};\n", kind.keyword(), fqn, quote_ident(owner)));
    }
    out.push_str(&privileges_statements(meta, kind, fqn));
    Ok(out)
}

/// Full predata block for one object.
pub fn render_object<T: DdlObject>(obj: &T, metadata: &MetadataMap) -> BackupResult<String> {
    let fqn = obj.qualified_name();
    obj.validate().map_err(|msg| BackupError::ddl(format!("{} {}", T::KIND.keyword(), fqn), msg))?;
    let mut block = obj.definition(&fqn);
    if let Some(meta) = metadata.get(obj.oid(), T::KIND) {
        block.push_str(&object_metadata_statements(meta, T::KIND, &fqn)?);
    }
    Ok(block)
}

/// Write one block per object, in input order, recording a Predata TOC entry
/// for each. Returns the number of blocks written.
pub fn print_statements<W: Write, T: DdlObject>(
    out: &mut ByteCountWriter<W>,
    toc: &Toc,
    objects: &[T],
    metadata: &MetadataMap,
) -> BackupResult<usize> {
    let mut written = 0;
    for obj in objects {
        let block = render_object(obj, metadata)?;
        if block.is_empty() { continue; }
        let start = out.byte_count();
        out.write_all(block.as_bytes()).map_err(|e| BackupError::io("write predata stream", e))?;
        toc.record(Section::Predata, obj.toc_schema(), obj.name(), T::KIND.keyword(), start, out.byte_count())?;
        written += 1;
    }
    debug!(target: "segbackup::ddl", "printed {} {} block(s)", written, T::KIND.keyword());
    Ok(written)
}

/// Emit every predata object of the catalog in dependency order: schemas,
/// then parsers and templates, then dictionaries, then configurations.
/// Returns object counts keyed by kind for the run summary.
pub fn print_predata<W: Write>(
    out: &mut ByteCountWriter<W>,
    toc: &Toc,
    catalog: &Catalog,
) -> BackupResult<BTreeMap<String, usize>> {
    let mut counts = BTreeMap::new();
    counts.insert("schemas".to_string(), print_statements(out, toc, &catalog.schemas, &catalog.metadata)?);
    counts.insert("text search parsers".to_string(), print_statements(out, toc, &catalog.parsers, &catalog.metadata)?);
    counts.insert("text search templates".to_string(), print_statements(out, toc, &catalog.templates, &catalog.metadata)?);
    counts.insert("text search dictionaries".to_string(), print_statements(out, toc, &catalog.dictionaries, &catalog.metadata)?);
    counts.insert(
        "text search configurations".to_string(),
        print_statements(out, toc, &catalog.configurations, &catalog.metadata)?,
    );
    out.flush().map_err(|e| BackupError::io("flush predata stream", e))?;
    Ok(counts)
}
