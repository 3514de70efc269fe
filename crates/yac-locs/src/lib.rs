//! Location paths: `#/a/b/0`-style references into JSON-like trees, and
//! the schema-loc → data-loc regex machinery used to filter them.

use regex::Regex;
use serde_json::Value;

/// Subschema singleton keywords: a schema-level position whose parent is
/// one of these is still schema level (the child is the subschema itself).
pub const SUBSCHEMAS: &[&str] = &[
    "if",
    "else",
    "then",
    "not",
    "propertyNames",
    "contains",
    "items",
    "contentSchema",
];
/// Subschema map keywords: a schema-level position two segments below one
/// of these (keyword, key) is still schema level.
pub const SUBSCHEMA_OBJECTS: &[&str] = &["$defs", "properties", "patternProperties", "dependentSchemas"];
/// Subschema array keywords: same two-segment rule as the maps.
pub const SUBSCHEMA_ARRAYS: &[&str] = &["oneOf", "allOf", "anyOf", "prefixItems"];

/// Depth-first walk collecting the locations of every node for which
/// `add` returns true.
pub fn get(data: &Value, add: &dyn Fn(&Value) -> bool, loc: &str, res: &mut Vec<String>) {
    if add(data) {
        res.push(loc.to_string());
    }
    match data {
        Value::Object(map) => {
            for (key, value) in map {
                get(value, add, &format!("{loc}/{key}"), res);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                get(item, add, &format!("{loc}/{index}"), res);
            }
        }
        _ => {}
    }
}

/// Returns the leaf referenced by `data_loc`, or `None` if the path does
/// not resolve.
pub fn extract<'a>(data_loc: &str, data: &'a Value) -> Option<&'a Value> {
    let mut keys = data_loc.split('/');
    // first segment is always "#"
    keys.next();

    let mut d = Some(data);
    for key in keys {
        d = match d {
            Some(Value::Object(map)) => map.get(key),
            Some(Value::Array(items)) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
    }
    d
}

/// Is `schema_loc[index]`'s position a schema-level position, assuming the
/// root (`index == 0`) always is?
pub fn on_schema_lvl(schema_loc: &[&str], index: usize) -> bool {
    if index == 0 {
        return true;
    }
    if index >= 1 && SUBSCHEMAS.contains(&schema_loc[index - 1]) {
        return true;
    }
    if index >= 2
        && (SUBSCHEMA_OBJECTS.contains(&schema_loc[index - 2])
            || SUBSCHEMA_ARRAYS.contains(&schema_loc[index - 2]))
    {
        return true;
    }
    false
}

/// Converts a schema location into an anchored regex over data locations.
pub fn to_regex(schema_loc: &str, recursive: bool) -> String {
    let mut keys: Vec<String> = schema_loc.split('/').map(|s| s.to_string()).collect();
    // first segment is always "#"
    if !keys.is_empty() {
        keys.remove(0);
    }

    let recursion = if recursive { "(/.+)*" } else { "" };
    let root = format!("^\\#{recursion}$");

    if keys.is_empty() {
        return root;
    }

    // keywords we cannot provide data for: collapse to root.
    for key in ["if", "not", "propertyNames", "$defs", "const"] {
        let refs: Vec<&str> = keys.iter().map(|s| s.as_str()).collect();
        for (i, k) in refs.iter().enumerate() {
            if *k == key && on_schema_lvl(&refs, i) {
                return root;
            }
        }
    }

    // keywords we can skip/ignore for data purposes.
    for key in ["else", "then", "contentSchema"] {
        loop {
            let refs: Vec<&str> = keys.iter().map(|s| s.as_str()).collect();
            let found = refs
                .iter()
                .enumerate()
                .find(|(i, k)| **k == key && on_schema_lvl(&refs, *i))
                .map(|(i, _)| i);
            match found {
                Some(i) => {
                    keys.remove(i);
                }
                None => break,
            }
        }
    }

    // keywords where we also drop the next segment (array index into the subschema list).
    for key in ["oneOf", "allOf", "anyOf", "dependentSchemas"] {
        loop {
            let refs: Vec<&str> = keys.iter().map(|s| s.as_str()).collect();
            let found = refs
                .iter()
                .enumerate()
                .find(|(i, k)| **k == key && on_schema_lvl(&refs, *i))
                .map(|(i, _)| i);
            match found {
                Some(i) => {
                    if i + 1 < keys.len() {
                        keys.remove(i + 1);
                    }
                    keys.remove(i);
                }
                None => break,
            }
        }
    }

    if keys.is_empty() {
        return root;
    }

    let mut res: Vec<String> = Vec::new();
    let mut i = 0;
    while i < keys.len() {
        match keys[i].as_str() {
            "properties" | "prefixItems" => {
                if i + 1 < keys.len() {
                    res.push(regex::escape(&keys[i + 1]));
                }
                i += 2;
            }
            "patternProperties" => {
                if i + 1 < keys.len() {
                    res.push(keys[i + 1].clone());
                }
                i += 2;
            }
            "items" | "contains" => {
                res.push(r"\d+".to_string());
                i += 1;
            }
            other => {
                if i + 1 != keys.len() {
                    tracing::error!("Unknown keyword \"{other}\" in json_schema: {schema_loc}");
                }
                i += 1;
            }
        }
    }

    format!("^\\#/{}{recursion}$", res.join("/"))
}

/// Filters `data_locs` to the ones described by `schema_loc`. `recursive`
/// also includes everything below that location.
pub fn reduce(schema_loc: &str, data_locs: &[String], recursive: bool) -> Vec<String> {
    let pattern = to_regex(schema_loc, recursive);
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    data_locs.iter().filter(|d| re.is_match(d)).cloned().collect()
}

/// Returns the candidate from `loc_list` with the longest common leading
/// segment-prefix with `loc`, or `None` if nothing shares even the root.
pub fn get_most_specific(loc: &str, loc_list: &[String]) -> Option<String> {
    let loc_segs: Vec<&str> = loc.split('/').collect();
    let mut best_len = 0usize;
    let mut best: Option<String> = None;
    for candidate in loc_list {
        let cand_segs: Vec<&str> = candidate.split('/').collect();
        let common = loc_segs
            .iter()
            .zip(cand_segs.iter())
            .take_while(|(a, b)| a == b)
            .count();
        if common > best_len {
            best_len = common;
            best = Some(candidate.clone());
        }
    }
    // a lone "#" match (common == 1) is not a real match on its own unless
    // the candidate IS the root; mirror the Python's commonpath behaviour
    // where any shared prefix (including just "/") counts.
    if best_len == 0 {
        None
    } else {
        best
    }
}

/// Conservative syntactic test: is `key` explicitly specified in `schema`?
pub fn is_specified(key: &str, schema: &Value) -> bool {
    let obj = match schema.as_object() {
        Some(obj) => obj,
        None => return false,
    };

    if let Some(Value::Object(props)) = obj.get("properties") {
        if props.contains_key(key) {
            return true;
        }
    }

    for subschema_key in ["then", "else"] {
        if let Some(sub) = obj.get(subschema_key) {
            if is_specified(key, sub) {
                return true;
            }
        }
    }

    for list_key in ["oneOf", "allOf", "anyOf"] {
        if let Some(Value::Array(list)) = obj.get(list_key) {
            for sub in list {
                if is_specified(key, sub) {
                    return true;
                }
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_collects_matching_locations() {
        let data = json!({"a": {"b": [1, 2]}});
        let mut res = Vec::new();
        get(&data, &|v| v.is_number(), "#", &mut res);
        assert_eq!(res, vec!["#/a/b/0", "#/a/b/1"]);
    }

    #[test]
    fn extract_resolves_nested_path() {
        let data = json!({"a": {"b": [1, 2]}});
        assert_eq!(extract("#/a/b/1", &data), Some(&json!(2)));
        assert_eq!(extract("#/a/c", &data), None);
    }

    #[test]
    fn to_regex_root_recursive_matches_everything() {
        let re = Regex::new(&to_regex("#", true)).unwrap();
        assert!(re.is_match("#"));
        assert!(re.is_match("#/a/b/0"));
    }

    #[test]
    fn to_regex_properties_is_exact() {
        let re = Regex::new(&to_regex("#/properties/name", false)).unwrap();
        assert!(re.is_match("#/name"));
        assert!(!re.is_match("#/name/extra"));
    }

    #[test]
    fn to_regex_collapses_on_if_keyword() {
        assert_eq!(to_regex("#/if/properties/x", false), "^\\#$");
    }

    #[test]
    fn reduce_filters_by_schema_loc() {
        let locs = vec!["#/a".to_string(), "#/b".to_string(), "#/a/c".to_string()];
        let got = reduce("#/properties/a", &locs, true);
        assert_eq!(got, vec!["#/a".to_string(), "#/a/c".to_string()]);
    }

    #[test]
    fn get_most_specific_prefers_longer_prefix() {
        let candidates = vec!["#/a".to_string(), "#/a/b".to_string(), "#/x".to_string()];
        assert_eq!(
            get_most_specific("#/a/b/c", &candidates),
            Some("#/a/b".to_string())
        );
    }

    #[test]
    fn is_specified_checks_properties_and_conditionals() {
        let schema = json!({"then": {"properties": {"secret": {}}}});
        assert!(is_specified("secret", &schema));
        assert!(!is_specified("other", &schema));
        assert!(!is_specified("secret", &json!(true)));
    }
}
