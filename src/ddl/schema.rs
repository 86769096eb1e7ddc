use super::{required, DdlObject};
use crate::ident::quote_ident;
use crate::metadata::{ObjectKind, Oid, Schema};

impl DdlObject for Schema {
    const KIND: ObjectKind = ObjectKind::Schema;

    fn oid(&self) -> Oid { self.oid }

    fn toc_schema(&self) -> &str { "" }

    fn name(&self) -> &str { &self.name }

    fn qualified_name(&self) -> String { quote_ident(&self.name) }

    fn validate(&self) -> Result<(), String> { required("name", &self.name) }

    fn definition(&self, fqn: &str) -> String {
        // public exists in every database; only its metadata is replayed
        if self.name == "public" { String::new() } else { format!("\n\nCREATE SCHEMA {};", fqn) }
    }
}
