//! Required validator testers, one struct per original
//! `app/plugin/validator/*.py` file, canonical ranks per SPEC_FULL.md §4.9.

use yac_core::error::{Error, Result};
use yac_core::types::{Entity, EntityPayload, NameGenerated, Operation, OperationRequest, Specs};
use yac_plugin::Plugin;
use yac_yaml as yaml;

use crate::Tester;

/// rank 0, early: entity payload variant matches the operation; `arbitrary`
/// takes exactly one action.
pub struct OperationsTester;
impl Plugin for OperationsTester {
    fn name(&self) -> &str {
        "operations"
    }
    fn order(&self) -> (bool, i32) {
        (false, 0)
    }
}
impl Tester for OperationsTester {
    fn test_always(&self, op: &OperationRequest, _specs: &Specs) -> Result<()> {
        match op.operation {
            Operation::Create => {
                if !matches!(
                    op.entity,
                    Some(EntityPayload::New { .. })
                        | Some(EntityPayload::Copy { .. })
                        | Some(EntityPayload::Link { .. })
                ) {
                    return Err(Error::request("The entity has the wrong format for this operation"));
                }
            }
            Operation::Change => {
                if !matches!(
                    op.entity,
                    Some(EntityPayload::Replace { .. }) | Some(EntityPayload::Update { .. })
                ) {
                    return Err(Error::request("The entity has the wrong format for this operation"));
                }
            }
            Operation::Read | Operation::Delete | Operation::Arbitrary => {
                if op.entity.is_some() {
                    return Err(Error::request("The entity must not be set for this operation"));
                }
            }
        }

        if op.operation == Operation::Arbitrary && op.actions.len() != 1 {
            return Err(Error::request("Exactly one action is required for this operation"));
        }

        Ok(())
    }
}

/// rank 10, early: the resolved type exists; create/change/delete are each
/// gated by the type's boolean.
pub struct TypeSpecTester;
impl Plugin for TypeSpecTester {
    fn name(&self) -> &str {
        "type_spec"
    }
    fn order(&self) -> (bool, i32) {
        (false, 10)
    }
}
impl Tester for TypeSpecTester {
    fn test_always(&self, op: &OperationRequest, specs: &Specs) -> Result<()> {
        let ty = specs
            .r#type
            .as_ref()
            .ok_or_else(|| Error::request_not_found(format!("Type {} is not defined", op.type_name)))?;

        if op.operation == Operation::Create && !ty.create {
            return Err(Error::request_forbidden("The operation \"create\" is disabled"));
        }
        if op.operation == Operation::Change && !ty.change {
            return Err(Error::request_forbidden("The operation \"change\" is disabled"));
        }
        if op.operation == Operation::Delete && !ty.delete {
            return Err(Error::request_forbidden("The operation \"delete\" is disabled"));
        }
        Ok(())
    }
}

fn assert_match(pattern: &regex::Regex, pattern_str: &str, name: Option<&str>, loc: &str) -> Result<()> {
    let name = name.ok_or_else(|| Error::request(format!("The {loc} must be set for this operation")))?;
    if !pattern.is_match(name) {
        return Err(Error::request(format!(
            "The {loc} {name} does not match the type spec pattern \"{pattern_str}\""
        )));
    }
    Ok(())
}

fn assert_none(name: Option<&str>, loc: &str) -> Result<()> {
    if name.is_some() {
        return Err(Error::request(format!("The {loc} must not be set for this operation")));
    }
    Ok(())
}

/// rank 20, early: names present-or-absent and pattern-matched per
/// operation; `name_generated` rules enforced for create.
pub struct NamesTester;
impl Plugin for NamesTester {
    fn name(&self) -> &str {
        "names"
    }
    fn order(&self) -> (bool, i32) {
        (false, 20)
    }
}
impl Tester for NamesTester {
    fn test_always(&self, op: &OperationRequest, specs: &Specs) -> Result<()> {
        if op.operation == Operation::Read {
            return Ok(());
        }

        let ty = specs
            .r#type
            .as_ref()
            .expect("validated by type_spec tester, which always runs first");
        let pattern = regex::Regex::new(&ty.name_pattern)
            .map_err(|e| Error::specs(format!("In types.name_pattern: {e}")))?;

        if op.operation == Operation::Create {
            assert_none(op.name.as_deref(), "name")?;
        } else {
            assert_match(&pattern, &ty.name_pattern, op.name.as_deref(), "name")?;
        }

        if op.operation == Operation::Change {
            let entity = op.entity.as_ref().expect("validated by operations tester");
            assert_match(&pattern, &ty.name_pattern, entity.name(), "entity.name")?;
        }

        if op.operation == Operation::Create {
            let entity = op.entity.as_ref().expect("validated by operations tester");
            match ty.name_generated {
                NameGenerated::Never => {
                    assert_match(&pattern, &ty.name_pattern, entity.name(), "entity.name")?;
                }
                NameGenerated::Optional => {
                    if entity.name().is_some() {
                        assert_match(&pattern, &ty.name_pattern, entity.name(), "entity.name")?;
                    }
                }
                NameGenerated::Enforced => {
                    assert_none(entity.name(), "entity.name")?;
                }
            }

            match entity {
                EntityPayload::Copy { copy, .. } => {
                    assert_match(&pattern, &ty.name_pattern, Some(copy.as_str()), "entity.copy")?;
                }
                EntityPayload::Link { link, .. } => {
                    assert_match(&pattern, &ty.name_pattern, Some(link.as_str()), "entity.link")?;
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn assert_perm(perm: &str, perms: &Option<Vec<String>>) -> Result<()> {
    if perms.as_ref().map(|p| p.iter().any(|p| p == perm)).unwrap_or(false) {
        Ok(())
    } else {
        Err(Error::request_forbidden(format!(
            "You need the \"{perm}\" permission to execute this operation."
        )))
    }
}

/// late rank 10: per operation, the permission(s) the requesting user must
/// hold on `old.perms`/`new.perms`.
pub struct PermissionsTester;
impl Plugin for PermissionsTester {
    fn name(&self) -> &str {
        "permissions"
    }
    fn order(&self) -> (bool, i32) {
        (true, 10)
    }
}
impl Tester for PermissionsTester {
    fn test_nolist(&self, op: &OperationRequest, _specs: &Specs, old: &Entity, new: &Entity) -> Result<()> {
        match op.operation {
            Operation::Read => assert_perm("see", &old.perms),

            Operation::Create => {
                assert_perm("add", &new.perms)?;
                match op.entity {
                    Some(EntityPayload::Copy { .. }) => assert_perm("cpy", &old.perms),
                    Some(EntityPayload::Link { .. }) => assert_perm("lnk", &old.perms),
                    _ => Ok(()),
                }
            }

            Operation::Change => {
                let entity = op.entity.as_ref().expect("validated by operations tester");
                let mut has_changes = true;
                match entity {
                    EntityPayload::Update { data, .. } => {
                        has_changes = !(data.is_object() && data.as_object().unwrap().is_empty());
                    }
                    EntityPayload::Replace { yaml_old, yaml_new, .. } => {
                        has_changes = yaml_old != yaml_new;
                        if yaml::has_structural_changes(yaml_old, yaml_new) {
                            assert_perm("cln", &old.perms)?;
                        }
                    }
                    _ => return Err(Error::request("The entity has the wrong format for this operation")),
                }

                if has_changes {
                    assert_perm("edt", &old.perms)?;
                }
                if op.name.as_deref() != entity.name() {
                    assert_perm("add", &new.perms)?;
                    assert_perm("rnm", &old.perms)?;
                }
                Ok(())
            }

            Operation::Delete => assert_perm("del", &old.perms),

            Operation::Arbitrary => Ok(()),
        }
    }
}

/// late rank 20: every requested action exists on the type, is hooked for
/// the current operation, and the user holds one of its perms on
/// `old.perms` (bypassed only for a `force` action outside `arbitrary`).
pub struct ActionsTester;
impl Plugin for ActionsTester {
    fn name(&self) -> &str {
        "actions"
    }
    fn order(&self) -> (bool, i32) {
        (true, 20)
    }
}
impl Tester for ActionsTester {
    fn test_nolist(&self, op: &OperationRequest, specs: &Specs, old: &Entity, _new: &Entity) -> Result<()> {
        let actions = specs.r#type.as_ref().map(|t| t.actions.as_slice()).unwrap_or(&[]);

        for action in &op.actions {
            let action_spec = actions
                .iter()
                .find(|a| &a.name == action)
                .ok_or_else(|| Error::request_not_found(format!("Action {action} is not defined")))?;

            let hooked = action_spec.hooks.iter().any(|h| hook_matches_operation(*h, op.operation));
            if !hooked {
                return Err(Error::request_not_found(format!(
                    "Action {action} is not defined for this operation"
                )));
            }

            let held = old
                .perms
                .as_ref()
                .map(|perms| action_spec.perms.iter().any(|p| perms.contains(p)))
                .unwrap_or(false);
            if !held && (op.operation == Operation::Arbitrary || !action_spec.force) {
                return Err(Error::request_forbidden(format!(
                    "You need one of these permission to run this action(s): {}",
                    action_spec.perms.join(", ")
                )));
            }
        }
        Ok(())
    }
}

fn hook_matches_operation(hook: yac_core::types::TypeActionHook, op: Operation) -> bool {
    use yac_core::types::TypeActionHook as H;
    matches!(
        (hook, op),
        (H::Arbitrary, Operation::Arbitrary)
            | (H::CreateBefore | H::CreateAfter, Operation::Create)
            | (H::ChangeBefore | H::ChangeAfter, Operation::Change)
            | (H::DeleteBefore | H::DeleteAfter, Operation::Delete)
    )
}

/// late rank 30: existence invariants for create/change/delete/read and
/// the stale-replace check.
pub struct ConflictsTester;
impl Plugin for ConflictsTester {
    fn name(&self) -> &str {
        "conflicts"
    }
    fn order(&self) -> (bool, i32) {
        (true, 30)
    }
}
impl Tester for ConflictsTester {
    fn test_nolist(&self, op: &OperationRequest, _specs: &Specs, old: &Entity, new: &Entity) -> Result<()> {
        match op.operation {
            Operation::Create => {
                if new.exists.unwrap_or(false) {
                    return Err(Error::request_conflict(format!(
                        "{} already exists",
                        new.name.clone().unwrap_or_default()
                    )));
                }
                if matches!(op.entity, Some(EntityPayload::Copy { .. }) | Some(EntityPayload::Link { .. })) {
                    if !old.exists.unwrap_or(false) {
                        return Err(Error::request_not_found(format!(
                            "{} does not exist",
                            old.name.clone().unwrap_or_default()
                        )));
                    }
                    if old.is_link.unwrap_or(false) {
                        return Err(Error::request("Links cannot be copied/linked"));
                    }
                }
            }
            _ => {
                if !old.exists.unwrap_or(false) {
                    return Err(Error::request_not_found(format!(
                        "{} does not exist",
                        old.name.clone().unwrap_or_default()
                    )));
                }
            }
        }

        if op.operation == Operation::Change {
            if old.is_link.unwrap_or(false) {
                return Err(Error::request("Links cannot be modified"));
            }
            let entity = op.entity.as_ref().expect("validated by operations tester");
            if old.name.as_deref() != entity.name() && new.exists.unwrap_or(false) {
                return Err(Error::request_conflict(format!(
                    "{} already exists",
                    entity.name().unwrap_or_default()
                )));
            }
            if let EntityPayload::Replace { yaml_old, .. } = entity {
                if old.yaml.as_deref() != Some(yaml_old.as_str()) {
                    return Err(Error::request_conflict("The data has changed in the meantime"));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yac_core::types::{RequestContext, Type};

    fn op_with(operation: Operation, entity: Option<EntityPayload>) -> OperationRequest {
        OperationRequest {
            user: None,
            request: RequestContext::default(),
            operation,
            type_name: "host".into(),
            name: None,
            actions: vec![],
            entity,
        }
    }

    fn specs_with_type(ty: Type) -> Specs {
        Specs {
            version: "1.0".into(),
            request: Default::default(),
            types: vec![ty.clone()],
            roles: vec![],
            sets: Default::default(),
            schema: serde_json::json!({}),
            r#type: Some(ty),
        }
    }

    fn host_type(create: bool, change: bool, delete: bool) -> Type {
        Type {
            name: "host".into(),
            title: None,
            name_pattern: "^h[0-9]+$".into(),
            name_example: None,
            name_generated: NameGenerated::Never,
            name_generator: None,
            create,
            change,
            delete,
            options: vec![],
            logs: vec![],
            actions: vec![],
            favorites: vec![],
            details: serde_json::json!({}),
        }
    }

    #[test]
    fn operations_tester_rejects_mismatched_payload() {
        let op = op_with(Operation::Create, Some(EntityPayload::Replace {
            name: "h1".into(),
            yaml_old: "".into(),
            yaml_new: "".into(),
        }));
        let err = OperationsTester.test_always(&op, &specs_with_type(host_type(true, true, true))).unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn type_spec_tester_rejects_disabled_create() {
        let op = op_with(Operation::Create, Some(EntityPayload::New { name: None, yaml: "---\n{}".into() }));
        let specs = specs_with_type(host_type(false, true, true));
        let err = TypeSpecTester.test_always(&op, &specs).unwrap_err();
        assert_eq!(err.code(), 403);
    }

    #[test]
    fn names_tester_enforces_pattern() {
        let mut op = op_with(Operation::Delete, None);
        op.name = Some("not-a-host".into());
        let specs = specs_with_type(host_type(true, true, true));
        let err = NamesTester.test_always(&op, &specs).unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn permissions_tester_requires_see_on_read() {
        let op = op_with(Operation::Read, None);
        let old = Entity { perms: Some(vec![]), ..Default::default() };
        let new = Entity::default();
        let err = PermissionsTester.test_nolist(&op, &specs_with_type(host_type(true, true, true)), &old, &new).unwrap_err();
        assert_eq!(err.code(), 403);
    }

    #[test]
    fn conflicts_tester_rejects_existing_create_target() {
        let op = op_with(Operation::Create, Some(EntityPayload::New { name: None, yaml: "---\n{}".into() }));
        let old = Entity::default();
        let new = Entity { name: Some("h1".into()), exists: Some(true), ..Default::default() };
        let err = ConflictsTester.test_nolist(&op, &specs_with_type(host_type(true, true, true)), &old, &new).unwrap_err();
        assert_eq!(err.code(), 409);
    }
}
