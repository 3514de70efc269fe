//! Jinja2-style templating (§4.3/C3): renders strings, and recursively
//! dicts/lists of strings, against a `props` mapping. A template that is
//! *exactly* one `{{ ... }}` expression evaluates to the native JSON type
//! of its result instead of being stringified, so e.g. a property default
//! of `"{{ 3 + 2 }}"` becomes the number `5`, not the string `"5"`.

pub mod builtins;

use minijinja::value::Value as JValue;
use minijinja::{Environment, UndefinedBehavior};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use yac_core::Error;

/// A render failure with the location (`#/a/b` form) at which it
/// occurred, accumulated as the recursive `render` call unwinds — mirrors
/// the schema validator's own location trail so both surface identically
/// in an error response.
#[derive(Debug, Clone)]
pub struct J2Error {
    pub loc: String,
    pub message: String,
}

impl J2Error {
    fn at(message: impl Into<String>) -> Self {
        J2Error {
            loc: String::new(),
            message: message.into(),
        }
    }

    fn prefix(mut self, segment: &str) -> Self {
        self.loc = format!("/{segment}{}", self.loc);
        self
    }
}

impl std::fmt::Display for J2Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}: {}", self.loc, self.message)
    }
}

impl From<J2Error> for Error {
    fn from(e: J2Error) -> Error {
        Error::request(e.to_string())
    }
}

static EXPR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^\{\{(.+)\}\}$").unwrap());

fn make_env(strict: bool) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(if strict {
        UndefinedBehavior::Strict
    } else {
        UndefinedBehavior::Lenient
    });
    env.add_function("now", builtins::now);
    env.add_function("uuid", builtins::uuid);
    env.add_function("to_consts", builtins::to_consts);
    env.add_function("next_int_by_regex", builtins::next_int_by_regex);
    env.add_function("host_in_ip4ranges", builtins::host_in_ip4ranges);
    env.add_function("ip4net_to_fqhn", builtins::ip4net_to_fqhn);
    env.add_function("to_fqhn", builtins::to_fqhn);
    env.add_filter("regex_replace", builtins::regex_replace);
    env.add_filter("re_escape", builtins::re_escape);
    env.add_filter("rformat", builtins::rformat);
    env.add_filter("to_datetime", builtins::to_datetime);
    env.add_test("regex_match", builtins::regex_match);
    env
}

fn json_to_jvalue(v: &Value) -> JValue {
    JValue::from_serialize(v)
}

fn jvalue_to_json(v: JValue) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

/// Renders a single string against `props`. When `allow_nonstr` is set and
/// the whole (trimmed) string is exactly one `{{ ... }}` expression, the
/// expression is compiled and evaluated directly to a `minijinja::Value`
/// and converted to JSON — the native-value equivalent of round-tripping
/// through `json.dumps`/`json.loads`, and the reason a non-string default
/// like a number or a list can come out of a template at all.
pub fn render_str(
    template: &str,
    props: &Value,
    allow_nonstr: bool,
    strict: bool,
) -> Result<Value, J2Error> {
    let env = make_env(strict);
    let ctx = json_to_jvalue(props);

    if allow_nonstr {
        if let Some(caps) = EXPR_PATTERN.captures(template.trim()) {
            let expr_src = caps.get(1).unwrap().as_str().trim();
            let expr = env
                .compile_expression(expr_src)
                .map_err(|e| J2Error::at(e.to_string()))?;
            let result = expr.eval(ctx).map_err(|e| J2Error::at(e.to_string()))?;
            return Ok(jvalue_to_json(result));
        }
    }

    let rendered = env
        .render_str(template, ctx)
        .map_err(|e| J2Error::at(e.to_string()))?;
    Ok(Value::String(rendered))
}

/// Evaluates `expr` as a boolean predicate — used by `yac_if` and by the
/// role/set permission predicates, both of which need a plain true/false.
pub fn render_test(expr: &str, props: &Value) -> Result<bool, J2Error> {
    let wrapped = format!("{{{{ {expr} }}}}");
    match render_str(&wrapped, props, true, true)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        other => Ok(other != Value::Bool(false)),
    }
}

/// Renders `expr` down to a plain string (action URLs, shell command
/// lines, log message templates).
pub fn render_print(expr: &str, props: &Value, strict: bool) -> Result<String, J2Error> {
    match render_str(expr, props, false, strict)? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

/// Recursively renders every string leaf of `value` against `props`;
/// object/array structure and non-string scalars pass through unchanged.
/// On failure, the location of the offending leaf is accumulated into the
/// returned `J2Error` as the recursion unwinds.
pub fn render(value: &Value, props: &Value, strict: bool) -> Result<Value, J2Error> {
    match value {
        Value::String(s) => render_str(s, props, true, strict),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                let rendered = render(v, props, strict).map_err(|e| e.prefix(k))?;
                out.insert(k.clone(), rendered);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let rendered = render(item, props, strict).map_err(|e| e.prefix(&i.to_string()))?;
                out.push(rendered);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_template_renders_to_string() {
        let props = json!({"name": "alice"});
        let out = render_str("hello {{ name }}", &props, true, true).unwrap();
        assert_eq!(out, json!("hello alice"));
    }

    #[test]
    fn single_expression_coerces_to_native_type() {
        let props = json!({"count": 2});
        let out = render_str("{{ count + 3 }}", &props, true, true).unwrap();
        assert_eq!(out, json!(5));
    }

    #[test]
    fn single_expression_can_yield_a_list() {
        let props = json!({"items": [1, 2, 3]});
        let out = render_str("{{ items }}", &props, true, true).unwrap();
        assert_eq!(out, json!([1, 2, 3]));
    }

    #[test]
    fn strict_mode_fails_on_undefined_name() {
        let props = json!({});
        let err = render_str("{{ missing }}", &props, true, true).unwrap_err();
        assert!(!err.message.is_empty());
    }

    #[test]
    fn render_dict_accumulates_location_on_error() {
        let props = json!({});
        let value = json!({"a": {"b": "{{ missing }}"}});
        let err = render(&value, &props, true).unwrap_err();
        assert_eq!(err.loc, "/a/b");
    }

    #[test]
    fn render_test_evaluates_predicate() {
        let props = json!({"role": "admin"});
        assert!(render_test("role == 'admin'", &props).unwrap());
        assert!(!render_test("role == 'user'", &props).unwrap());
    }

    #[test]
    fn regex_match_test_is_registered() {
        let props = json!({"name": "host-1"});
        assert!(render_test("name is regex_match('^host-\\d+$')", &props).unwrap());
    }
}
