//! Frontmatter codec for the on-disk memory format.
//!
//! A serialized memory is an optional header block of `key: value` lines
//! between `---` marker lines, a blank line, then the body. List values are
//! bracket-wrapped and comma-separated (`tags: [a, b]`).
//!
//! Parsing is permissive: a missing or malformed header never errors, the
//! whole text is treated as the body with no metadata. Values other than
//! bracket lists stay literal strings for the caller to interpret.

use crate::domain::Memory;

const MARKER: &str = "---";

/// A header field value: a literal string or an ordered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    List(Vec<String>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::Text(_) => None,
            Value::List(items) => Some(items),
        }
    }
}

/// Outcome of looking for a header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frontmatter {
    /// Ordered `key: value` fields from a well-formed header.
    Header(Vec<(String, Value)>),
    /// No header, or one too malformed to trust.
    NoHeader,
}

impl Frontmatter {
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Frontmatter::Header(fields) => fields
                .iter()
                .find_map(|(k, v)| (k.as_str() == key).then_some(v)),
            Frontmatter::NoHeader => None,
        }
    }
}

/// Split a serialized memory into its header fields and body.
///
/// Never fails: anything that does not look like a complete header block
/// folds into `NoHeader` with the entire input as the body.
pub fn parse(text: &str) -> (Frontmatter, &str) {
    let Some(after_open) = text.strip_prefix("---\n") else {
        return (Frontmatter::NoHeader, text);
    };

    let mut fields = Vec::new();
    let mut rest = after_open;
    loop {
        let Some((line, tail)) = rest.split_once('\n') else {
            // Unterminated header block.
            return (Frontmatter::NoHeader, text);
        };
        rest = tail;
        if line.trim_end() == MARKER {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            return (Frontmatter::NoHeader, text);
        };
        fields.push((key.trim().to_string(), parse_value(value.trim())));
    }

    // One blank separator line between header and body, when present.
    let body = rest.strip_prefix('\n').unwrap_or(rest);
    (Frontmatter::Header(fields), body)
}

fn parse_value(raw: &str) -> Value {
    if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        let items = inner
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect();
        Value::List(items)
    } else {
        Value::Text(raw.to_string())
    }
}

/// Render header fields plus a body into one text blob.
///
/// With no fields at all this degrades to the body alone, no marker lines.
pub fn compose(fields: &[(String, Value)], body: &str) -> String {
    if fields.is_empty() {
        return body.to_string();
    }
    let mut out = String::with_capacity(body.len() + 128);
    out.push_str(MARKER);
    out.push('\n');
    for (key, value) in fields {
        out.push_str(key);
        out.push_str(": ");
        match value {
            Value::Text(text) => out.push_str(text),
            Value::List(items) => {
                out.push('[');
                out.push_str(&items.join(", "));
                out.push(']');
            }
        }
        out.push('\n');
    }
    out.push_str(MARKER);
    out.push_str("\n\n");
    out.push_str(body);
    out
}

/// Serialize a memory to its frontmatter-plus-body text form.
///
/// Emits category/project/tags when present, then createdAt/updatedAt
/// (RFC 3339) as the final header lines.
pub fn serialize_memory(memory: &Memory) -> String {
    let mut fields = Vec::new();
    if let Some(category) = &memory.category {
        fields.push(("category".to_string(), Value::Text(category.clone())));
    }
    if let Some(project) = &memory.project {
        fields.push(("project".to_string(), Value::Text(project.clone())));
    }
    if !memory.tags.is_empty() {
        fields.push(("tags".to_string(), Value::List(memory.tags.clone())));
    }
    fields.push((
        "createdAt".to_string(),
        Value::Text(memory.created_at.to_rfc3339()),
    ));
    fields.push((
        "updatedAt".to_string(),
        Value::Text(memory.updated_at.to_rfc3339()),
    ));
    compose(&fields, &memory.content)
}
