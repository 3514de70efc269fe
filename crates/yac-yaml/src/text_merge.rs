//! Span-based textual merge used by [`crate::update`].
//!
//! Rather than parsing the whole document into a `Value` and re-emitting it
//! (which is what `serde_yaml` gives us, and what throws away comments,
//! anchors, quoting and key order on every untouched key), this walks the
//! raw text as a sequence of block-mapping entries and only rewrites the
//! line span of a key the diff actually touches. A key that is merely
//! present but unchanged never has its bytes regenerated, so whatever a
//! human wrote around it — a comment, a quote style, blank lines — survives.
//!
//! This only understands plain block-style YAML (`key: value`, nested
//! mappings by indentation, block sequences): the dialect the repo's specs
//! are written in. Flow style (`{a: 1}`) and keys that embed a colon inside
//! unquoted scalars are out of scope; such entries are still read correctly
//! by `serde_yaml` but a diff that targets one falls back to rewriting that
//! key's whole span, same as any other leaf replacement.

use serde_yaml::Value as YamlValue;

use crate::{from_json, UNDEFINED};
use yac_core::Error;

struct Entry {
    key: String,
    /// First line of this entry, including any comment block glued to it.
    header_start: usize,
    /// The `key: ...` line itself.
    key_line: usize,
    /// Exclusive end of this entry (start of the next sibling, or the
    /// enclosing range's end).
    end: usize,
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn strip_comment(s: &str) -> &str {
    let mut in_squote = false;
    let mut in_dquote = false;
    for (i, ch) in s.char_indices() {
        match ch {
            '\'' if !in_dquote => in_squote = !in_squote,
            '"' if !in_squote => in_dquote = !in_dquote,
            '#' if !in_squote && !in_dquote => {
                if i == 0 || s.as_bytes()[i - 1].is_ascii_whitespace() {
                    return &s[..i];
                }
            }
            _ => {}
        }
    }
    s
}

/// If `line` (already stripped of its leading indent) is a plain mapping
/// key line, returns `(key, rest_after_colon)`.
fn parse_key_line(line: &str) -> Option<(&str, &str)> {
    if line.starts_with('-') || line.starts_with('#') {
        return None;
    }
    let mut in_squote = false;
    let mut in_dquote = false;
    for (i, ch) in line.char_indices() {
        match ch {
            '\'' if !in_dquote => in_squote = !in_squote,
            '"' if !in_squote => in_dquote = !in_dquote,
            ':' if !in_squote && !in_dquote => {
                let after = &line[i + 1..];
                if after.is_empty() || after.starts_with(' ') || after.starts_with('\t') {
                    let key = line[..i].trim();
                    let key = key.trim_matches(|c| c == '"' || c == '\'');
                    if key.is_empty() {
                        return None;
                    }
                    return Some((key, after.trim_start()));
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_entries(lines: &[String], range: std::ops::Range<usize>, indent: usize) -> Vec<Entry> {
    let mut key_lines = Vec::new();
    for i in range.clone() {
        let line = &lines[i];
        if indent_of(line) != indent {
            continue;
        }
        let rest = &line[indent..];
        if rest.trim().is_empty() || rest.trim_start().starts_with('#') {
            continue;
        }
        if let Some((key, _)) = parse_key_line(rest) {
            key_lines.push((i, key.to_string()));
        }
    }

    // Header starts are computed independently per entry first, so that the
    // end of entry N can stop at entry N+1's header (its leading comment
    // block) rather than at its bare key line, and the two never overlap.
    let header_starts: Vec<usize> = key_lines
        .iter()
        .map(|(key_line, _)| {
            let mut header_start = *key_line;
            while header_start > range.start {
                let prev = &lines[header_start - 1];
                if indent_of(prev) == indent && prev.trim_start().starts_with('#') {
                    header_start -= 1;
                } else {
                    break;
                }
            }
            header_start
        })
        .collect();

    let mut entries = Vec::with_capacity(key_lines.len());
    for (idx, (key_line, key)) in key_lines.iter().enumerate() {
        let end = header_starts.get(idx + 1).copied().unwrap_or(range.end);
        entries.push(Entry { key: key.clone(), header_start: header_starts[idx], key_line: *key_line, end });
    }
    entries
}

/// If the entry at `key_line` has a nested block mapping as its value
/// (as opposed to an inline scalar, flow value, or sequence), returns the
/// line range of that nested block and its indent.
fn nested_mapping_range(
    lines: &[String],
    key_line: usize,
    end: usize,
    indent: usize,
) -> Option<(std::ops::Range<usize>, usize)> {
    let (_, rest) = parse_key_line(&lines[key_line][indent..])?;
    if !strip_comment(rest).trim().is_empty() {
        return None;
    }
    if key_line + 1 >= end {
        return None;
    }
    let first = &lines[key_line + 1];
    if first.trim().is_empty() {
        return None;
    }
    let child_indent = indent_of(first);
    if child_indent <= indent || first.trim_start().starts_with('-') {
        return None;
    }
    Some(((key_line + 1)..end, child_indent))
}

fn is_undefined_json(v: &serde_json::Value) -> bool {
    matches!(v, serde_json::Value::String(s) if s == UNDEFINED)
}

/// Renders `{key: value}` via `serde_yaml` and reindents every line by
/// `indent` spaces, for splicing in as a single entry's replacement text.
fn render_entry_lines(key: &str, value: &serde_json::Value, indent: usize) -> Result<Vec<String>, Error> {
    let mut map = serde_yaml::Mapping::new();
    map.insert(YamlValue::String(key.to_string()), from_json(value));
    let dumped = serde_yaml::to_string(&YamlValue::Mapping(map))
        .map_err(|e| Error::server(format!("YAML dump failed: {e}")))?;
    let prefix = " ".repeat(indent);
    Ok(dumped
        .lines()
        .map(|l| if l.is_empty() { l.to_string() } else { format!("{prefix}{l}") })
        .collect())
}

pub(crate) fn apply_map_diff(
    lines: &mut Vec<String>,
    range: std::ops::Range<usize>,
    indent: usize,
    diff: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), Error> {
    let entries = parse_entries(lines, range.clone(), indent);

    let mut insert_at = range.end;
    for (key, value) in diff {
        if entries.iter().any(|e| &e.key == key) {
            continue;
        }
        if is_undefined_json(value) {
            return Err(Error::request_conflict("The key to be set undefined does not exist"));
        }
        let rendered = render_entry_lines(key, value, indent)?;
        let n = rendered.len();
        lines.splice(insert_at..insert_at, rendered);
        insert_at += n;
    }

    let mut touched: Vec<&Entry> = entries.iter().filter(|e| diff.contains_key(&e.key)).collect();
    touched.sort_by(|a, b| b.key_line.cmp(&a.key_line));
    for entry in touched {
        let diff_val = &diff[&entry.key];
        if is_undefined_json(diff_val) {
            lines.drain(entry.header_start..entry.end);
            continue;
        }
        if let serde_json::Value::Object(child_diff) = diff_val {
            if let Some((child_range, child_indent)) =
                nested_mapping_range(lines, entry.key_line, entry.end, indent)
            {
                apply_map_diff(lines, child_range, child_indent, child_diff)?;
                continue;
            }
        }
        let rendered = render_entry_lines(&entry.key, diff_val, indent)?;
        lines.splice(entry.key_line..entry.end, rendered);
    }
    Ok(())
}

/// Splits off a leading `---` document marker line, if present.
pub(crate) fn split_header(yaml: &str) -> (&str, &str) {
    if let Some(rest) = yaml.strip_prefix("---\n") {
        (&yaml[..4], rest)
    } else {
        ("", yaml)
    }
}
