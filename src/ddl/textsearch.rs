//! Text search parsers, templates, dictionaries and configurations.

use super::{create_block, required, Clause, DdlObject};
use crate::ident::force_quote_ident;
use crate::metadata::{ObjectKind, Oid, TextSearchConfiguration, TextSearchDictionary, TextSearchParser, TextSearchTemplate};

impl DdlObject for TextSearchParser {
    const KIND: ObjectKind = ObjectKind::TextSearchParser;

    fn oid(&self) -> Oid { self.oid }
    fn toc_schema(&self) -> &str { &self.schema }
    fn name(&self) -> &str { &self.name }

    fn validate(&self) -> Result<(), String> {
        required("START", &self.start_func)?;
        required("GETTOKEN", &self.token_func)?;
        required("END", &self.end_func)?;
        required("LEXTYPES", &self.lex_types_func)
    }

    fn definition(&self, fqn: &str) -> String {
        create_block(
            Self::KIND,
            fqn,
            &[
                Clause::Keyed("START", Some(self.start_func.as_str())),
                Clause::Keyed("GETTOKEN", Some(self.token_func.as_str())),
                Clause::Keyed("END", Some(self.end_func.as_str())),
                Clause::Keyed("LEXTYPES", Some(self.lex_types_func.as_str())),
                Clause::Keyed("HEADLINE", self.headline_func.as_deref()),
            ],
        )
    }
}

impl DdlObject for TextSearchTemplate {
    const KIND: ObjectKind = ObjectKind::TextSearchTemplate;

    fn oid(&self) -> Oid { self.oid }
    fn toc_schema(&self) -> &str { &self.schema }
    fn name(&self) -> &str { &self.name }

    fn validate(&self) -> Result<(), String> { required("LEXIZE", &self.lexize_func) }

    fn definition(&self, fqn: &str) -> String {
        create_block(
            Self::KIND,
            fqn,
            &[Clause::Keyed("INIT", self.init_func.as_deref()), Clause::Keyed("LEXIZE", Some(self.lexize_func.as_str()))],
        )
    }
}

impl DdlObject for TextSearchDictionary {
    const KIND: ObjectKind = ObjectKind::TextSearchDictionary;

    fn oid(&self) -> Oid { self.oid }
    fn toc_schema(&self) -> &str { &self.schema }
    fn name(&self) -> &str { &self.name }

    fn validate(&self) -> Result<(), String> { required("TEMPLATE", &self.template) }

    fn definition(&self, fqn: &str) -> String {
        create_block(
            Self::KIND,
            fqn,
            &[Clause::Keyed("TEMPLATE", Some(self.template.as_str())), Clause::Verbatim(self.init_option.as_deref())],
        )
    }
}

impl DdlObject for TextSearchConfiguration {
    const KIND: ObjectKind = ObjectKind::TextSearchConfiguration;

    fn oid(&self) -> Oid { self.oid }
    fn toc_schema(&self) -> &str { &self.schema }
    fn name(&self) -> &str { &self.name }

    fn validate(&self) -> Result<(), String> {
        required("PARSER", &self.parser)?;
        match self.token_to_dicts.iter().find(|(_, dicts)| dicts.is_empty()) {
            Some((token, _)) => Err(format!("token category {} maps to no dictionaries", token)),
            None => Ok(()),
        }
    }

    fn definition(&self, fqn: &str) -> String {
        let mut out = create_block(Self::KIND, fqn, &[Clause::Keyed("PARSER", Some(self.parser.as_str()))]);
        // BTreeMap iteration is sorted by token category
        for (token, dicts) in &self.token_to_dicts {
            out.push_str(&format!(
                "\n\nALTER {} {}\n\tADD MAPPING FOR {} WITH {};",
                Self::KIND.keyword(),
                fqn,
                force_quote_ident(token),
                dicts.join(", ")
            ));
        }
        out
    }
}

#[cfg(test)]
#[path = "textsearch_tests.rs"]
mod textsearch_tests;
