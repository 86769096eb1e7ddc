//! Typed catalog records consumed by the DDL generator and the copy protocol.
//!
//! Records are produced by an external catalog layer and are treated as
//! immutable snapshots. Object-level decorations (comment, owner, grants) are
//! kept apart in a `MetadataMap` keyed by `(Oid, ObjectKind)`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::ident::make_fqn;

pub type Oid = u32;

/// Every object kind the generator knows how to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Schema,
    Table,
    TextSearchParser,
    TextSearchTemplate,
    TextSearchDictionary,
    TextSearchConfiguration,
}

impl ObjectKind {
    /// SQL keyword used in CREATE/COMMENT/ALTER/GRANT statements.
    pub fn keyword(self) -> &'static str {
        match self {
            ObjectKind::Schema => "SCHEMA",
            ObjectKind::Table => "TABLE",
            ObjectKind::TextSearchParser => "TEXT SEARCH PARSER",
            ObjectKind::TextSearchTemplate => "TEXT SEARCH TEMPLATE",
            ObjectKind::TextSearchDictionary => "TEXT SEARCH DICTIONARY",
            ObjectKind::TextSearchConfiguration => "TEXT SEARCH CONFIGURATION",
        }
    }

    /// Privileges grantable on this kind, in canonical order. Empty for kinds
    /// that carry no ACL.
    pub fn grantable_privileges(self) -> &'static [Privilege] {
        use Privilege::*;
        match self {
            ObjectKind::Schema => &[Usage, Create],
            ObjectKind::Table => &[Select, Insert, Update, Delete, Truncate, References, Trigger],
            ObjectKind::TextSearchParser
            | ObjectKind::TextSearchTemplate
            | ObjectKind::TextSearchDictionary
            | ObjectKind::TextSearchConfiguration => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Privilege {
    Select,
    Insert,
    Update,
    Delete,
    Truncate,
    References,
    Trigger,
    Usage,
    Create,
}

impl Privilege {
    pub fn keyword(self) -> &'static str {
        match self {
            Privilege::Select => "SELECT",
            Privilege::Insert => "INSERT",
            Privilege::Update => "UPDATE",
            Privilege::Delete => "DELETE",
            Privilege::Truncate => "TRUNCATE",
            Privilege::References => "REFERENCES",
            Privilege::Trigger => "TRIGGER",
            Privilege::Usage => "USAGE",
            Privilege::Create => "CREATE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grantee {
    Public,
    Role(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub grantee: Grantee,
    pub privileges: Vec<Privilege>,
    pub grantable: bool,
}

/// Comment, owner and grants attached to one catalog object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub comment: Option<String>,
    pub owner: Option<String>,
    pub privileges: Vec<AclEntry>,
}

/// Object metadata indexed by `(oid, kind)`. A missing key means nothing is
/// emitted for that object beyond its definition.
#[derive(Debug, Clone, Default)]
pub struct MetadataMap {
    entries: HashMap<(Oid, ObjectKind), ObjectMetadata>,
}

impl MetadataMap {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, oid: Oid, kind: ObjectKind, meta: ObjectMetadata) -> Option<ObjectMetadata> {
        self.entries.insert((oid, kind), meta)
    }

    pub fn get(&self, oid: Oid, kind: ObjectKind) -> Option<&ObjectMetadata> { self.entries.get(&(oid, kind)) }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub oid: Oid,
    pub name: String,
}

/// A user table. Identity is `oid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub oid: Oid,
    pub schema_oid: Oid,
    pub schema: String,
    pub name: String,
    pub depends_upon: Vec<String>,
}

impl Relation {
    pub fn new(oid: Oid, schema_oid: Oid, schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self { oid, schema_oid, schema: schema.into(), name: name.into(), depends_upon: Vec::new() }
    }

    /// Quoted `schema.table`, the form used in COPY commands and the table map.
    pub fn qualified_name(&self) -> String { make_fqn(&self.schema, &self.name) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSearchParser {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub start_func: String,
    pub token_func: String,
    pub end_func: String,
    pub lex_types_func: String,
    pub headline_func: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSearchTemplate {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub init_func: Option<String>,
    pub lexize_func: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSearchDictionary {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    /// Qualified template name.
    pub template: String,
    /// Option list copied verbatim into the definition.
    pub init_option: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSearchConfiguration {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub parser: String,
    /// Token category -> dictionaries in lookup order. Ordered map so
    /// rendering never depends on hash iteration order.
    pub token_to_dicts: BTreeMap<String, Vec<String>>,
}

/// Everything the external catalog layer hands to a backup run.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub schemas: Vec<Schema>,
    pub relations: Vec<Relation>,
    pub parsers: Vec<TextSearchParser>,
    pub templates: Vec<TextSearchTemplate>,
    pub dictionaries: Vec<TextSearchDictionary>,
    pub configurations: Vec<TextSearchConfiguration>,
    pub metadata: MetadataMap,
}

impl Catalog {
    /// Keep only objects whose schema passes `keep`.
    pub fn retain_schemas<F: Fn(&str) -> bool>(&mut self, keep: F) {
        self.schemas.retain(|s| keep(&s.name));
        self.relations.retain(|r| keep(&r.schema));
        self.parsers.retain(|p| keep(&p.schema));
        self.templates.retain(|t| keep(&t.schema));
        self.dictionaries.retain(|d| keep(&d.schema));
        self.configurations.retain(|c| keep(&c.schema));
    }
}
