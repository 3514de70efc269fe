//! Role/set permission resolution (§4.7/C7): evaluates every role
//! definition's template predicate against the current operation and
//! aggregates the permission codes of the ones that match, expanding
//! aggregate codes (`all`, `adm`, …) into their constituent permissions.

use std::collections::HashMap;

use serde_json::Value;
use yac_core::types::{OperationRequest, Permission, RequestSpec, Role, Sets};
use yac_template::render_test;

/// Expands aggregate permission codes and implied `see` grants, then
/// dedupes and sorts. `q+r` entries (role-def values joined with `+`,
/// e.g. `"edt+del"`) are split before expansion.
fn expand_perms(perms: &[String]) -> Vec<Permission> {
    let mut split = Vec::new();
    for p in perms {
        split.extend(p.split('+').map(|s| s.to_string()));
    }

    let mut result: Vec<Permission> = Vec::new();
    for r in split {
        match r.as_str() {
            "all" => result.extend(
                ["see", "add", "rnm", "cpy", "lnk", "edt", "cln", "del", "act"]
                    .iter()
                    .map(|s| s.to_string()),
            ),
            "adm" => result.extend(
                ["see", "add", "rnm", "cpy", "lnk", "edt", "cln", "del", "act", "adm"]
                    .iter()
                    .map(|s| s.to_string()),
            ),
            "cln" => result.extend(["see", "cln"].iter().map(|s| s.to_string())),
            "edt" => result.extend(["see", "edt"].iter().map(|s| s.to_string())),
            "lnk" => result.extend(["see", "lnk"].iter().map(|s| s.to_string())),
            "cpy" => result.extend(["see", "cpy"].iter().map(|s| s.to_string())),
            "rnm" => result.extend(["see", "rnm"].iter().map(|s| s.to_string())),
            "add" => result.extend(["see", "add"].iter().map(|s| s.to_string())),
            other => result.push(other.to_string()),
        }
    }

    result.sort();
    result.dedup();
    result
}

/// Reads the role definitions from the spec and renders their template
/// predicates against the operation/request context. For every role
/// definition that matches, the permission it grants is collected:
///
/// - `all:<type>:<perm>` grants unconditionally for that type.
/// - `set:<type>:<set>:<perm>` additionally requires the named set's own
///   predicate (`sets.<type>.<set>`, defaulting to `false` if undefined)
///   to match.
/// - `<type>:<name>:<perm>` grants only for the entity `name` in question
///   (the operation's current name, or its new name if `new_name` is set —
///   used for rename/copy targets before they exist).
pub fn get_from_roles(
    op: &OperationRequest,
    request_spec: &RequestSpec,
    roles: &[Role],
    sets: &Sets,
    old_data: &Value,
    env: &HashMap<String, String>,
    new_name: bool,
) -> Vec<Permission> {
    let name: Option<&str> = if new_name {
        op.entity.as_ref().and_then(|e| e.name())
    } else {
        op.name.as_deref()
    };

    let role_props = yac_core::props::get_roles(op, request_spec, old_data, env);

    let mut perms = Vec::new();
    for role in roles {
        for (role_def, role_test) in &role.0 {
            let matched = match render_test(role_test, &role_props) {
                Ok(b) => b,
                Err(error) => {
                    tracing::error!("Role {role_def} could not be rendered: {error}");
                    false
                }
            };
            if !matched {
                continue;
            }
            tracing::debug!("Extracting perms from role {role_def}");

            if let Some(rest) = role_def.strip_prefix(&format!("all:{}:", op.type_name)) {
                perms.push(rest.to_string());
            } else if let Some(rest) = role_def.strip_prefix("set:") {
                let mut parts = rest.splitn(3, ':');
                let (set_type, set_name, perm) =
                    match (parts.next(), parts.next(), parts.next()) {
                        (Some(t), Some(n), Some(p)) => (t, n, p),
                        _ => continue,
                    };
                if set_type != op.type_name {
                    continue;
                }
                let set_test = sets
                    .0
                    .get(op.type_name.as_str())
                    .and_then(|m| m.get(set_name))
                    .map(|s| s.as_str())
                    .unwrap_or("false");
                let set_matched = match render_test(set_test, &role_props) {
                    Ok(b) => b,
                    Err(error) => {
                        tracing::error!(
                            "Set {}.{set_name} could not be rendered: {error}",
                            op.type_name
                        );
                        false
                    }
                };
                if set_matched {
                    perms.push(perm.to_string());
                }
            } else if let Some(name) = name {
                if let Some(rest) =
                    role_def.strip_prefix(&format!("{}:{}:", op.type_name, name))
                {
                    perms.push(rest.to_string());
                }
            }
        }
    }

    tracing::debug!("Extracted perms: {}", perms.join(", "));
    expand_perms(&perms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use yac_core::types::{Operation, RequestContext};

    fn base_op() -> OperationRequest {
        OperationRequest {
            user: None,
            request: RequestContext::default(),
            operation: Operation::Read,
            type_name: "host".into(),
            name: Some("h1".into()),
            actions: vec![],
            entity: None,
        }
    }

    #[test]
    fn expand_perms_all_includes_see() {
        let got = expand_perms(&["all".to_string()]);
        assert!(got.contains(&"see".to_string()));
        assert!(got.contains(&"act".to_string()));
        assert!(!got.contains(&"adm".to_string()));
    }

    #[test]
    fn expand_perms_edt_implies_see() {
        let got = expand_perms(&["edt".to_string()]);
        assert_eq!(got, vec!["edt".to_string(), "see".to_string()]);
    }

    #[test]
    fn all_type_role_matches_unconditionally() {
        let op = base_op();
        let mut role = Map::new();
        role.insert("all:host:edt".to_string(), "true".to_string());
        let roles = vec![Role(role)];
        let sets = Sets::default();
        let env = Map::new();
        let perms = get_from_roles(
            &op,
            &RequestSpec::default(),
            &roles,
            &sets,
            &Value::Null,
            &env,
            false,
        );
        assert!(perms.contains(&"edt".to_string()));
        assert!(perms.contains(&"see".to_string()));
    }

    #[test]
    fn named_role_requires_matching_name() {
        let op = base_op();
        let mut role = Map::new();
        role.insert("host:h1:del".to_string(), "true".to_string());
        role.insert("host:h2:del".to_string(), "true".to_string());
        let roles = vec![Role(role)];
        let perms = get_from_roles(
            &op,
            &RequestSpec::default(),
            &roles,
            &Sets::default(),
            &Value::Null,
            &Map::new(),
            false,
        );
        assert!(perms.contains(&"del".to_string()));
    }

    #[test]
    fn set_role_requires_set_predicate() {
        let op = base_op();
        let mut role = Map::new();
        role.insert("set:host:prod:edt".to_string(), "true".to_string());
        let roles = vec![Role(role)];
        let mut set_defs = Map::new();
        set_defs.insert("prod".to_string(), "false".to_string());
        let mut sets_map = Map::new();
        sets_map.insert("host".to_string(), set_defs);
        let sets = Sets(sets_map);
        let perms = get_from_roles(
            &op,
            &RequestSpec::default(),
            &roles,
            &sets,
            &Value::Null,
            &Map::new(),
            false,
        );
        assert!(!perms.contains(&"edt".to_string()));
    }
}
