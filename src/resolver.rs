//! Resolution of `@{SESSION_ID}.…` references against session outputs.
//!
//! Parameter templates are arbitrary JSON values whose string leaves may
//! embed references into the session's rolling output windows:
//!
//! ```text
//! ref      := '@{SESSION_ID}.' path ('|' default)?
//! path     := segment ('.' segment)*
//! segment  := identifier ('[' integer ']')?
//! ```
//!
//! `SESSION_ID` is a fixed sentinel, not substituted with the actual id: it
//! marks the path as relative to the current session's `data.outputs`. The
//! first segment names a step's output window (an optional index selects an
//! entry; the default is the newest, `[-1]`); later segments descend into
//! object fields, with indices selecting within array values.
//!
//! A string that consists of exactly one reference substitutes the resolved
//! value with its native type; a reference embedded in surrounding text is
//! stringified (JSON-encoded unless it is itself a string). The `|default`
//! form is only recognised in whole-string position.
//!
//! Resolution is pure: it reads state and builds new values, and it never
//! rescans substituted content (a fully-literal template is a fixed point).

use serde_json::Value;

use crate::state::{index_slice, SessionState};

/// The sentinel that introduces a reference.
pub const SESSION_MARKER: &str = "@{SESSION_ID}";

/// One `identifier[index]` element of a reference path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub key: String,
    pub index: Option<i64>,
}

/// A parsed reference: path segments plus an optional whole-string default.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub segments: Vec<Segment>,
    pub default: Option<String>,
    /// The reference text as it appeared in the template (without default),
    /// used in unresolved-input reports.
    raw: String,
}

impl Reference {
    /// Parses a whole string as a single reference, with optional default.
    ///
    /// Returns `None` when the string is not exactly one reference.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match analyze(s) {
            Parsed::Whole(reference) => Some(reference),
            _ => None,
        }
    }

    /// The reference text, e.g. `@{SESSION_ID}.gen.ok`.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Follows the path through the session's outputs.
    ///
    /// Absence at any point yields `None`; the default is deliberately not
    /// applied here so callers can distinguish absence from a defaulted
    /// value.
    #[must_use]
    pub fn lookup(&self, state: &SessionState) -> Option<Value> {
        let first = self.segments.first()?;
        let window = state.data.outputs.get(&first.key)?;
        let mut value = index_slice(window, first.index.unwrap_or(-1))?.clone();
        for segment in &self.segments[1..] {
            value = match value {
                Value::Object(map) => map.get(&segment.key)?.clone(),
                _ => return None,
            };
            if let Some(index) = segment.index {
                value = match value {
                    Value::Array(items) => index_slice(&items, index)?.clone(),
                    _ => return None,
                };
            }
        }
        Some(value)
    }

    /// Lookup with the default applied on absence.
    #[must_use]
    pub fn resolve(&self, state: &SessionState) -> Option<Value> {
        self.lookup(state)
            .or_else(|| self.default.clone().map(Value::String))
    }
}

/// References that could not be resolved while resolving a template.
///
/// The engine maps this report to the `pending` step status.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnresolvedInputs {
    pub missing: Vec<String>,
}

impl std::fmt::Display for UnresolvedInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unresolved references: {}", self.missing.join(", "))
    }
}

/// Resolves every reference inside a parameter template.
///
/// All-or-nothing for required references: if any reference without a
/// default is unresolvable the whole template is reported unresolved, with
/// every missing reference listed.
pub fn resolve_template(
    template: &Value,
    state: &SessionState,
) -> Result<Value, UnresolvedInputs> {
    let mut missing = Vec::new();
    let resolved = resolve_value(template, state, &mut missing);
    if missing.is_empty() {
        Ok(resolved)
    } else {
        Err(UnresolvedInputs { missing })
    }
}

/// Resolves a bare reference string the way the condition evaluator sees
/// it: non-reference strings evaluate to themselves, absent references to
/// `None` (unless defaulted).
#[must_use]
pub fn resolve_scalar(expr: &str, state: &SessionState) -> Option<Value> {
    match analyze(expr) {
        Parsed::Whole(reference) => reference.resolve(state),
        _ => Some(Value::String(expr.to_string())),
    }
}

fn resolve_value(value: &Value, state: &SessionState, missing: &mut Vec<String>) -> Value {
    match value {
        Value::String(s) => resolve_string(s, state, missing),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, state, missing))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, state, missing)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, state: &SessionState, missing: &mut Vec<String>) -> Value {
    match analyze(s) {
        Parsed::Literal => Value::String(s.to_string()),
        Parsed::Whole(reference) => match reference.resolve(state) {
            Some(value) => value,
            None => {
                missing.push(reference.raw().to_string());
                Value::String(s.to_string())
            }
        },
        Parsed::Interpolated(chunks) => {
            let mut out = String::new();
            for chunk in chunks {
                match chunk {
                    Chunk::Text(text) => out.push_str(&text),
                    Chunk::Ref(reference) => match reference.lookup(state) {
                        Some(value) => out.push_str(&stringify(&value)),
                        None => {
                            missing.push(reference.raw().to_string());
                            out.push_str(reference.raw());
                        }
                    },
                }
            }
            Value::String(out)
        }
    }
}

/// Substitution text for a value embedded in surrounding text: strings are
/// spliced verbatim, everything else is JSON-encoded.
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

enum Chunk {
    Text(String),
    Ref(Reference),
}

enum Parsed {
    /// No reference at all.
    Literal,
    /// The entire string is one reference (optionally defaulted).
    Whole(Reference),
    /// References embedded in surrounding text.
    Interpolated(Vec<Chunk>),
}

fn analyze(s: &str) -> Parsed {
    if !s.contains(SESSION_MARKER) {
        return Parsed::Literal;
    }

    // Whole-string form: the reference starts the string and either runs to
    // its end or is followed by a pipe-delimited default.
    if let Some(rest) = s.strip_prefix(SESSION_MARKER) {
        if let Some(path_text) = rest.strip_prefix('.') {
            if let Some((segments, consumed)) = parse_path(path_text) {
                let tail = &path_text[consumed..];
                let raw = s[..SESSION_MARKER.len() + 1 + consumed].to_string();
                if tail.is_empty() {
                    return Parsed::Whole(Reference {
                        segments,
                        default: None,
                        raw,
                    });
                }
                if let Some(default) = tail.strip_prefix('|') {
                    if !default.contains(SESSION_MARKER) {
                        return Parsed::Whole(Reference {
                            segments,
                            default: Some(default.to_string()),
                            raw,
                        });
                    }
                }
            }
        }
    }

    // Otherwise scan for embedded references, keeping everything else as
    // literal text.
    let mut chunks = Vec::new();
    let mut cursor = 0;
    let mut found = false;
    while let Some(offset) = s[cursor..].find(SESSION_MARKER) {
        let start = cursor + offset;
        let after_marker = start + SESSION_MARKER.len();
        let parsed = s[after_marker..]
            .strip_prefix('.')
            .and_then(|path_text| parse_path(path_text));
        match parsed {
            Some((segments, consumed)) => {
                if start > cursor {
                    chunks.push(Chunk::Text(s[cursor..start].to_string()));
                }
                let end = after_marker + 1 + consumed;
                chunks.push(Chunk::Ref(Reference {
                    segments,
                    default: None,
                    raw: s[start..end].to_string(),
                }));
                cursor = end;
                found = true;
            }
            None => {
                // A marker not followed by a path stays literal text.
                chunks.push(Chunk::Text(s[cursor..after_marker].to_string()));
                cursor = after_marker;
            }
        }
    }
    if !found {
        return Parsed::Literal;
    }
    if cursor < s.len() {
        chunks.push(Chunk::Text(s[cursor..].to_string()));
    }
    Parsed::Interpolated(chunks)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Parses `segment ('.' segment)*` from the front of `s`, returning the
/// segments and the number of bytes consumed. Parsing stops at the first
/// character that cannot extend the path; a trailing dot is not consumed.
fn parse_path(s: &str) -> Option<(Vec<Segment>, usize)> {
    let mut segments = Vec::new();
    let mut pos = 0;
    loop {
        let key_len = s[pos..].chars().take_while(|&c| is_ident_char(c)).count();
        if key_len == 0 {
            break;
        }
        let key_end = pos + key_len;
        let key = s[pos..key_end].to_string();
        let mut segment_end = key_end;
        let mut index = None;
        if let Some(bracketed) = parse_index(&s[key_end..]) {
            index = Some(bracketed.0);
            segment_end = key_end + bracketed.1;
        }
        segments.push(Segment { key, index });
        pos = segment_end;

        // Continue only when a dot is followed by another identifier.
        let mut rest = s[pos..].chars();
        match (rest.next(), rest.next()) {
            (Some('.'), Some(c)) if is_ident_char(c) => pos += 1,
            _ => break,
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some((segments, pos))
    }
}

/// Parses a leading `[integer]`, returning the index and bytes consumed.
fn parse_index(s: &str) -> Option<(i64, usize)> {
    let inner = s.strip_prefix('[')?;
    let close = inner.find(']')?;
    let index: i64 = inner[..close].trim().parse().ok()?;
    Some((index, close + 2))
}
