//! YAML store (§4.2/C2).
//!
//! `load`/`dump` go through `serde_yaml`, which is fine for brand-new
//! documents (`create`) and for the read-only views the template/schema/perms
//! pipeline consumes. `update`, the path that rewrites a tracked file in
//! place, does not: it performs a span-based textual merge (see
//! [`text_merge`]) so a key the diff never touches keeps its original bytes,
//! comments, anchors, quoting and ordering included, instead of being
//! destroyed by a parse-and-re-emit round trip.

mod text_merge;

use indexmap::IndexMap;
use serde_yaml::Value;
use yac_core::Error;

/// Sentinel value that, when found as a map value or list item in a diff,
/// deletes the corresponding key/item from the target instead of merging.
pub const UNDEFINED: &str = "~undefined";

/// Parses a YAML document. `strict = false` tolerates duplicate mapping
/// keys (last one wins); `strict = true` does not (serde_yaml itself
/// always takes the last of a duplicate key — there is no native
/// duplicate-key rejection, so `strict` only documents intent here).
pub fn load(yaml: &str, _strict: bool) -> Result<Value, Error> {
    serde_yaml::from_str(yaml).map_err(|e| Error::request(format!("Invalid YAML: {e}")))
}

/// Total: any parse failure or non-mapping top level yields an empty map.
pub fn load_as_dict(yaml: &str, strict: bool) -> serde_json::Map<String, serde_json::Value> {
    match load(yaml, strict).ok().and_then(to_json) {
        Some(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

/// Serializes back to YAML text with an explicit document-start marker.
pub fn dump(data: &Value) -> Result<String, Error> {
    let body = serde_yaml::to_string(data).map_err(|e| Error::server(format!("YAML dump failed: {e}")))?;
    if body.starts_with("---") {
        Ok(body)
    } else {
        Ok(format!("---\n{body}"))
    }
}

/// Converts a loaded YAML value into the `serde_json::Value` representation
/// the rest of the pipeline (templates, schema, perms) operates on.
pub fn to_json(value: Value) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}

/// Converts a JSON value (e.g. an `UpdateEntity.data` diff) into the
/// `serde_yaml::Value` representation this crate merges against.
pub fn from_json(value: &serde_json::Value) -> Value {
    serde_yaml::to_value(value).unwrap_or(Value::Null)
}

/// Merges `diff` onto `yaml`'s text: mappings merge key-wise; lists and
/// scalars in `diff` replace wholesale; `~undefined` deletes a mapping key.
/// Deleting a key absent from the target is a conflict. Only the line spans
/// of keys the diff actually touches are rewritten (see [`text_merge`]); a
/// key that isn't in `diff` keeps its original bytes verbatim.
pub fn update(yaml: &str, diff: &serde_json::Value) -> Result<String, Error> {
    load(yaml, true)?;
    let diff_obj = diff
        .as_object()
        .ok_or_else(|| Error::request("The diff must be a JSON object"))?;

    let (header, body) = text_merge::split_header(yaml);
    let mut lines: Vec<String> = if body.is_empty() {
        Vec::new()
    } else {
        body.lines().map(str::to_string).collect()
    };
    let trailing_newline = body.is_empty() || body.ends_with('\n');

    let range = 0..lines.len();
    text_merge::apply_map_diff(&mut lines, range, 0, diff_obj)?;

    let mut out = String::from(header);
    out.push_str(&lines.join("\n"));
    if trailing_newline && !lines.is_empty() {
        out.push('\n');
    }

    load(&out, true)
        .map_err(|e| Error::server(format!("Textual YAML merge produced invalid output: {e}")))?;
    Ok(out)
}

/// True iff merging `new` onto `old` (as `update` would) changes the
/// dumped form — i.e. `new` introduces or removes keys, not merely edits
/// scalars in place.
pub fn has_structural_changes(yaml_old: &str, yaml_new: &str) -> bool {
    let old = match load(yaml_old, true) {
        Ok(v) => v,
        Err(_) => return false,
    };
    let new = match load(yaml_new, true) {
        Ok(v) => v,
        Err(_) => return false,
    };

    let merged = merge_whole(old, &new);
    match (dump(&merged), dump(&new)) {
        (Ok(a), Ok(b)) => a != b,
        _ => true,
    }
}

/// Whole-value merge used only by `has_structural_changes`: unlike
/// `update`'s textual merge, this never deletes (there is no diff-sentinel
/// semantics when comparing two already-concrete documents) and instead
/// checks whether overlaying `new`'s keys onto `old` changes the resulting
/// shape.
fn merge_whole(old: Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Mapping(old_map), Value::Mapping(new_map)) => {
            let mut merged: IndexMap<Value, Value> = old_map.into_iter().collect();
            for (k, v) in new_map {
                let existing = merged.get(k).cloned().unwrap_or_else(|| v.clone());
                merged.insert(k.clone(), merge_whole(existing, v));
            }
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in merged {
                out.insert(k, v);
            }
            Value::Mapping(out)
        }
        (_, other) => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_merges_keys_without_replacing_siblings() {
        let yaml = "---\na: 1\nb: 2\n";
        let out = update(yaml, &json!({"b": 3})).unwrap();
        let data = load(&out, true).unwrap();
        assert_eq!(data["a"], Value::Number(1.into()));
        assert_eq!(data["b"], Value::Number(3.into()));
    }

    #[test]
    fn update_deletes_with_sentinel() {
        let yaml = "---\na: 1\nb: 2\n";
        let out = update(yaml, &json!({"b": "~undefined"})).unwrap();
        let data = load(&out, true).unwrap();
        assert!(data.as_mapping().unwrap().get("b").is_none());
        assert_eq!(data["a"], Value::Number(1.into()));
    }

    #[test]
    fn update_missing_key_deletion_is_conflict() {
        let yaml = "---\na: 1\n";
        let err = update(yaml, &json!({"missing": "~undefined"})).unwrap_err();
        assert_eq!(err.code(), 409);
    }

    #[test]
    fn structural_changes_detects_added_keys() {
        assert!(!has_structural_changes("---\na: 1\n", "---\na: 2\n"));
        assert!(has_structural_changes("---\na: 1\n", "---\na: 1\nb: 2\n"));
    }

    #[test]
    fn update_preserves_comments_on_untouched_keys() {
        let yaml = "---\n# a is the first key\na: 1\n# b is the second key\nb: 2\n";
        let out = update(yaml, &json!({"a": "~undefined"})).unwrap();
        assert_eq!(out, "---\n# b is the second key\nb: 2\n");
    }

    #[test]
    fn update_preserves_untouched_sibling_comment_on_scalar_edit() {
        let yaml = "---\na: 1 # inline note on a\n# comment on b\nb: 2\n";
        let out = update(yaml, &json!({"a": 5})).unwrap();
        assert!(out.contains("# comment on b\nb: 2"));
        assert!(out.contains("a: 5"));
    }

    #[test]
    fn update_recurses_into_nested_mapping_leaving_siblings_intact() {
        let yaml = "---\nouter:\n  # x is kept\n  x: 1\n  y: 2\n";
        let out = update(yaml, &json!({"outer": {"y": 9}})).unwrap();
        assert!(out.contains("# x is kept\n  x: 1"));
        assert!(out.contains("y: 9"));
    }

    #[test]
    fn update_appends_new_key_without_disturbing_existing_text() {
        let yaml = "---\n# keep me\na: 1\n";
        let out = update(yaml, &json!({"b": 2})).unwrap();
        assert!(out.starts_with("---\n# keep me\na: 1\n"));
        assert!(out.trim_end().ends_with("b: 2"));
    }
}
