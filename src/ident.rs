//! Identifier and literal quoting
//! ------------------------------
//! Single source of truth for how names and string literals are rendered into
//! DDL, COPY commands and the table-map file.

use once_cell::sync::Lazy;
use std::collections::HashSet;

static RESERVED_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "both",
        "case", "cast", "check", "collate", "column", "constraint", "create", "current_catalog",
        "current_date", "current_role", "current_time", "current_timestamp", "current_user",
        "default", "deferrable", "desc", "distinct", "do", "else", "end", "except", "false",
        "fetch", "for", "foreign", "from", "grant", "group", "having", "in", "initially",
        "intersect", "into", "lateral", "leading", "limit", "localtime", "localtimestamp", "not",
        "null", "offset", "on", "only", "or", "order", "placing", "primary", "references",
        "returning", "select", "session_user", "some", "symmetric", "table", "then", "to",
        "trailing", "true", "union", "unique", "user", "using", "variadic", "when", "where",
        "window", "with",
    ]
    .into_iter()
    .collect()
});

pub fn is_reserved_keyword(ident: &str) -> bool { RESERVED_KEYWORDS.contains(ident) }

/// True when `ident` can be written bare: lowercase ascii letters, digits and
/// underscores, not starting with a digit, and not a reserved word.
fn is_plain_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') && !is_reserved_keyword(ident)
}

/// Quote an identifier for SQL output when it needs it, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    if is_plain_identifier(ident) {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// Always-quoted form, used for text search token categories.
pub fn force_quote_ident(ident: &str) -> String { format!("\"{}\"", ident.replace('"', "\"\"")) }

/// `schema.name` with each part quoted independently.
pub fn make_fqn(schema: &str, name: &str) -> String { format!("{}.{}", quote_ident(schema), quote_ident(name)) }

/// `quote_ident` for line-oriented files: a name holding a line break is
/// written as a `U&"..."` identifier with `\000A` / `\000D` escapes, so the
/// result never spans lines.
pub fn quote_ident_single_line(ident: &str) -> String {
    if !ident.contains(|c| c == '\n' || c == '\r') {
        return quote_ident(ident);
    }
    let mut out = String::with_capacity(ident.len() + 8);
    out.push_str("U&\"");
    for c in ident.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\"\""),
            '\n' => out.push_str("\\000A"),
            '\r' => out.push_str("\\000D"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Body of a quoted identifier up to its closing quote. Returns the decoded
/// name and the text after the quote.
fn parse_quoted(body: &str, unicode: bool) -> Option<(String, &str)> {
    let mut name = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                if matches!(chars.peek(), Some((_, '"'))) {
                    chars.next();
                    name.push('"');
                } else {
                    return Some((name, &body[i + 1..]));
                }
            }
            '\\' if unicode => {
                if matches!(chars.peek(), Some((_, '\\'))) {
                    chars.next();
                    name.push('\\');
                    continue;
                }
                let hex: String = (0..4).filter_map(|_| chars.next().map(|(_, h)| h)).collect();
                if hex.len() != 4 || !hex.chars().all(|h| h.is_ascii_hexdigit()) {
                    return None;
                }
                name.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
            }
            c => name.push(c),
        }
    }
    None
}

fn parse_ident(s: &str) -> Option<(String, &str)> {
    if let Some(body) = s.strip_prefix("U&\"") {
        parse_quoted(body, true)
    } else if let Some(body) = s.strip_prefix('"') {
        parse_quoted(body, false)
    } else {
        let end = s.find('.').unwrap_or(s.len());
        if end == 0 {
            return None;
        }
        Some((s[..end].to_string(), &s[end..]))
    }
}

/// Split a `schema.name` written by `make_fqn` or `quote_ident_single_line`
/// into its unquoted parts.
pub fn split_qualified_name(text: &str) -> Option<(String, String)> {
    let (schema, rest) = parse_ident(text)?;
    let (name, rest) = parse_ident(rest.strip_prefix('.')?)?;
    rest.is_empty().then_some((schema, name))
}

/// Inverse of `quote_ident` for a single identifier: strips surrounding quotes
/// and un-doubles embedded ones. Bare identifiers are returned unchanged.
pub fn unquote_ident(ident: &str) -> String {
    let trimmed = ident.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].replace("\"\"", "\"")
    } else {
        trimmed.to_string()
    }
}

/// Escape text for use inside a single-quoted SQL literal.
/// Returns the offending character position when the text cannot be stored
/// by the server at all (NUL bytes).
pub fn escape_literal(text: &str) -> Result<String, usize> {
    if let Some(pos) = text.find('\0') {
        return Err(pos);
    }
    Ok(text.replace('\'', "''"))
}
