//! Template-props builders (§4.7/§4.8/§4.10, grounded on
//! `original_source/app/lib/props.py`): each function assembles the exact
//! `props` mapping a particular template render site needs, from the
//! current operation, the request spec, and (where relevant) the loaded
//! entity data/perms.

use crate::types::{OperationRequest, RequestSpec, User};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

fn user_json(user: &Option<User>) -> Value {
    match user {
        Some(u) => json!({"name": u.name, "full_name": u.full_name, "email": u.email}),
        None => Value::Null,
    }
}

/// Resolves `request.headers` against the per-operation raw header map:
/// a header is taken from the wire only if a `yac-<key>` header was sent
/// and it matches the configured `pattern` (defaulting to `"^$"`, i.e.
/// "never matches anything real" when no pattern is configured); the
/// spec's `default` is used otherwise.
pub fn resolve_request(op: &OperationRequest, request_spec: &RequestSpec) -> Value {
    let mut headers = Map::new();
    for (key, spec) in &request_spec.headers {
        let wire_name = format!("yac-{}", key.replace('_', "-").to_lowercase());
        let pattern = spec.pattern.clone().unwrap_or_else(|| "^$".to_string());
        let value = op
            .request
            .headers
            .get(&wire_name)
            .filter(|v| Regex::new(&pattern).map(|re| re.is_match(v)).unwrap_or(false));
        let resolved = match value {
            Some(v) => v.clone(),
            None => spec.default.clone().unwrap_or_default(),
        };
        headers.insert(key.clone(), Value::String(resolved));
    }
    json!({"ip": op.request.ip, "headers": headers})
}

/// Props for rendering `specs.request` itself — no request data exists yet.
pub fn get_request(env: &HashMap<String, String>) -> Value {
    json!({"env": env})
}

/// Props for rendering `specs.types` (per-user type filtering).
pub fn get_types(op: &OperationRequest, request_spec: &RequestSpec, env: &HashMap<String, String>) -> Value {
    json!({
        "env": env,
        "request": resolve_request(op, request_spec),
        "user": user_json(&op.user),
    })
}

/// Props for action hook invocation.
pub fn get_action(op: &OperationRequest, request_spec: &RequestSpec) -> Value {
    json!({
        "request": resolve_request(op, request_spec),
        "user": user_json(&op.user),
        "operation": op.operation,
        "actions": op.actions,
        "old": {"name": op.name},
        "new": {"name": op.entity.as_ref().and_then(|e| e.name())},
    })
}

/// Props for log retrieval.
pub fn get_log(op: &OperationRequest, request_spec: &RequestSpec) -> Value {
    json!({
        "request": resolve_request(op, request_spec),
        "user": user_json(&op.user),
        "old": {"name": op.name},
    })
}

/// Props for role/set predicate evaluation.
pub fn get_roles(
    op: &OperationRequest,
    request_spec: &RequestSpec,
    old_data: &Value,
    env: &HashMap<String, String>,
) -> Value {
    json!({
        "env": env,
        "request": resolve_request(op, request_spec),
        "user": user_json(&op.user),
        "operation": op.operation,
        "actions": op.actions,
        "type": op.type_name,
        "old": {"name": op.name, "data": old_data},
        "new": {"name": op.entity.as_ref().and_then(|e| e.name())},
    })
}

/// Props for `name_generator` rendering.
pub fn get_namegen(
    op: &OperationRequest,
    request_spec: &RequestSpec,
    old_list: &[String],
    new_data: &Value,
    env: &HashMap<String, String>,
) -> Value {
    json!({
        "env": env,
        "request": resolve_request(op, request_spec),
        "user": user_json(&op.user),
        "operation": op.operation,
        "actions": op.actions,
        "old": {"list": old_list},
        "new": {"data": new_data},
    })
}

/// Props for the schema pipeline.
pub fn get_schema(
    op: &OperationRequest,
    request_spec: &RequestSpec,
    old_data: &Value,
    old_perms: &[String],
    new_data: &Value,
    env: &HashMap<String, String>,
) -> Value {
    json!({
        "env": env,
        "request": resolve_request(op, request_spec),
        "user": user_json(&op.user),
        "operation": op.operation,
        "actions": op.actions,
        "type": op.type_name,
        "old": {"name": op.name, "data": old_data, "perms": old_perms},
        "new": {"name": op.entity.as_ref().and_then(|e| e.name()), "data": new_data},
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HeaderSpec, Operation, RequestContext};

    fn op_with_header(name: &str, value: &str) -> OperationRequest {
        let mut headers = HashMap::new();
        headers.insert(name.to_string(), value.to_string());
        OperationRequest {
            user: None,
            request: RequestContext { ip: "127.0.0.1".into(), headers },
            operation: Operation::Read,
            type_name: "host".into(),
            name: None,
            actions: vec![],
            entity: None,
        }
    }

    #[test]
    fn resolve_request_uses_default_when_pattern_absent() {
        let mut spec = RequestSpec::default();
        spec.headers.insert(
            "env".to_string(),
            HeaderSpec { pattern: None, default: Some("prod".to_string()) },
        );
        let op = op_with_header("yac-env", "staging");
        let got = resolve_request(&op, &spec);
        assert_eq!(got["headers"]["env"], json!("prod"));
    }

    #[test]
    fn resolve_request_uses_wire_value_when_pattern_matches() {
        let mut spec = RequestSpec::default();
        spec.headers.insert(
            "env".to_string(),
            HeaderSpec { pattern: Some("^(prod|staging)$".to_string()), default: Some("prod".to_string()) },
        );
        let op = op_with_header("yac-env", "staging");
        let got = resolve_request(&op, &spec);
        assert_eq!(got["headers"]["env"], json!("staging"));
    }
}
