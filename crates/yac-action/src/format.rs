//! `"{old.name}"`-style format-string resolution against the action props
//! mapping, the Rust equivalent of Python's `"...".format(**props)` (which,
//! since `props` nests dicts, reaches into them via the `{a.b.c}` /
//! `{a[b][c]}` grammar rather than flat kwargs).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+(?:[.\[][A-Za-z0-9_\]]*)*)\}").unwrap());

fn resolve_path(props: &Value, path: &str) -> Option<String> {
    let mut cur = props;
    for segment in path.split(|c| c == '.' || c == '[' || c == ']').filter(|s| !s.is_empty()) {
        cur = cur.get(segment)?;
    }
    Some(match cur {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    })
}

/// Renders `template`, replacing every `{path}` placeholder with the
/// corresponding value from `props`. Fails on the first unresolved
/// placeholder, naming it the way a Python `KeyError`/`AttributeError`
/// would.
pub fn format_string(template: &str, props: &Value) -> Result<String, String> {
    let mut error = None;
    let out = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let path = &caps[1];
        match resolve_path(props, path) {
            Some(v) => v,
            None => {
                if error.is_none() {
                    error = Some(format!("{path} is not available in this context"));
                }
                String::new()
            }
        }
    });
    match error {
        Some(e) => Err(e),
        None => Ok(out.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_path() {
        let props = json!({"old": {"name": "h1"}});
        assert_eq!(format_string("http://{old.name}.example.com", &props).unwrap(), "http://h1.example.com");
    }

    #[test]
    fn resolves_bracket_path() {
        let props = json!({"old": {"name": "h1"}});
        assert_eq!(format_string("http://{old[name]}.example.com", &props).unwrap(), "http://h1.example.com");
    }

    #[test]
    fn missing_path_errors() {
        let props = json!({"old": {"name": "h1"}});
        assert!(format_string("{missing.field}", &props).is_err());
    }
}
