//! Operation validation (§4.9/C9), grounded on `original_source/app/lib/validator.py`:
//! derives the candidate `new_data`, runs it through the schema pipeline when
//! relevant, then runs the ordered tester pipeline (early `test_always`, then
//! late `test_nolist`) and folds everything into one `ValidationResult`.

pub mod testers;

use std::sync::Arc;

use yac_core::error::{Error, Result};
use yac_core::types::{Entity, EntityPayload, Operation, OperationRequest, SchemaResult, Specs, ValidationResult};
use yac_plugin::{Plugin, Registry};

/// A validator plugin: early testers see only the request and the resolved
/// specs (list/detail-agnostic); late testers additionally see the loaded
/// `old`/`new` entities and so can only run once a specific entity is
/// resolved (never during a list operation).
pub trait Tester: Plugin {
    fn test_always(&self, _op: &OperationRequest, _specs: &Specs) -> Result<()> {
        Ok(())
    }
    fn test_nolist(&self, _op: &OperationRequest, _specs: &Specs, _old: &Entity, _new: &Entity) -> Result<()> {
        Ok(())
    }
}

const REQUIRED: &[&str] = &["actions", "conflicts", "names", "operations", "permissions", "type_spec"];

pub fn registry() -> Result<Registry<dyn Tester>> {
    let plugins: Vec<Arc<dyn Tester>> = vec![
        Arc::new(testers::OperationsTester),
        Arc::new(testers::TypeSpecTester),
        Arc::new(testers::NamesTester),
        Arc::new(testers::PermissionsTester),
        Arc::new(testers::ActionsTester),
        Arc::new(testers::ConflictsTester),
    ];
    let reg = Registry::new(plugins);
    reg.require("validator", REQUIRED)?;
    Ok(reg)
}

fn new_data_for(op: &OperationRequest, old: &Entity) -> std::result::Result<serde_json::Value, String> {
    match &op.entity {
        Some(EntityPayload::New { yaml, .. }) => yac_yaml::load(yaml, true)
            .map_err(|e| e.to_string())
            .and_then(|v| yac_yaml::to_json(v).ok_or_else(|| "not an object".to_string())),
        Some(EntityPayload::Replace { yaml_new, .. }) => yac_yaml::load(yaml_new, true)
            .map_err(|e| e.to_string())
            .and_then(|v| yac_yaml::to_json(v).ok_or_else(|| "not an object".to_string())),
        Some(EntityPayload::Update { data, .. }) => {
            let merged = yac_yaml::update(old.yaml.as_deref().unwrap_or(""), data).map_err(|e| e.to_string())?;
            yac_yaml::load(&merged, true)
                .map_err(|e| e.to_string())
                .and_then(|v| yac_yaml::to_json(v).ok_or_else(|| "not an object".to_string()))
        }
        _ => Ok(serde_json::json!({})),
    }
}

/// Runs the full validation pipeline. When `raise_on_error` is `false`,
/// validator failures are captured into the returned result's
/// `valid`/`message` fields instead of propagating; a faulty schema is
/// still reported (in `schema.valid`/`schema.errors`) either way, but only
/// raises when `raise_on_error` is `true`.
pub fn test_all(
    op: &OperationRequest,
    specs: &Specs,
    old: &Entity,
    new: &Entity,
    raise_on_error: bool,
) -> Result<ValidationResult> {
    let mut valid = true;
    let mut message: Option<String> = None;

    let new_data = match new_data_for(op, old) {
        Ok(v) => v,
        Err(e) => {
            if raise_on_error {
                return Err(Error::request(e));
            }
            valid = false;
            message = Some(e);
            serde_json::json!({})
        }
    };

    let needs_schema = op.operation == Operation::Change
        || (op.operation == Operation::Create && matches!(op.entity, Some(EntityPayload::New { .. })));

    let schema_result = if needs_schema {
        let schema_template = specs.schema.clone();
        let old_data = old.data.clone().unwrap_or(serde_json::json!({}));
        let old_perms: Vec<String> = old.perms.clone().unwrap_or_default();
        yac_schema::get(
            op,
            &schema_template,
            &specs.request,
            &old_data,
            &old_perms,
            &new_data,
            &std::collections::HashMap::new(),
        )?
    } else {
        SchemaResult {
            schema: serde_json::json!({}),
            ui_schema: serde_json::json!({}),
            data: serde_json::json!({}),
            valid: true,
            errors: vec![],
        }
    };

    let reg = registry()?;
    let tester_result = (|| -> Result<()> {
        for plug in reg.phase(false) {
            plug.test_always(op, specs)?;
        }
        for plug in reg.phase(true) {
            plug.test_nolist(op, specs, old, new)?;
        }
        Ok(())
    })();

    if let Err(err) = tester_result {
        if raise_on_error {
            return Err(err);
        }
        tracing::debug!("captured validator error instead of raising: {err}");
        if valid {
            valid = false;
            message = Some(err.to_string());
        }
    }

    if raise_on_error && !schema_result.valid {
        let schema_message = schema_result
            .errors
            .first()
            .map(|e| e.message.clone())
            .unwrap_or_default();
        return Err(Error::request(schema_message));
    }

    Ok(ValidationResult {
        operation: op.operation,
        schema: schema_result,
        valid,
        message,
    })
}

/// Runs only the list-safe early testers (no `old`/`new` entity needed),
/// used to validate a type-level `read` (list) request before listing.
pub fn test_ls(op: &OperationRequest, specs: &Specs) -> Result<()> {
    const LIST_REQUIRED: &[&str] = &["names", "operations", "type_spec"];
    let reg = registry()?;
    reg.require("validator", LIST_REQUIRED)?;
    for plug in reg.phase(false) {
        plug.test_always(op, specs)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use yac_core::types::{NameGenerated, RequestContext, Type};

    fn host_type() -> Type {
        Type {
            name: "host".into(),
            title: None,
            name_pattern: "^h[0-9]+$".into(),
            name_example: None,
            name_generated: NameGenerated::Never,
            name_generator: None,
            create: true,
            change: true,
            delete: true,
            options: vec![],
            logs: vec![],
            actions: vec![],
            favorites: vec![],
            details: serde_json::json!({}),
        }
    }

    fn specs() -> Specs {
        Specs {
            version: "1.0".into(),
            request: Default::default(),
            types: vec![host_type()],
            roles: vec![],
            sets: Default::default(),
            schema: serde_json::json!({"type": "object"}),
            r#type: Some(host_type()),
        }
    }

    #[test]
    fn test_ls_passes_for_read_on_known_type() {
        let op = OperationRequest {
            user: None,
            request: RequestContext::default(),
            operation: Operation::Read,
            type_name: "host".into(),
            name: None,
            actions: vec![],
            entity: None,
        };
        assert!(test_ls(&op, &specs()).is_ok());
    }

    #[test]
    fn test_all_captures_error_when_not_raising() {
        let op = OperationRequest {
            user: None,
            request: RequestContext::default(),
            operation: Operation::Delete,
            type_name: "host".into(),
            name: Some("not-a-host-name".into()),
            actions: vec![],
            entity: None,
        };
        let old = Entity { perms: Some(vec!["del".into()]), exists: Some(true), ..Default::default() };
        let new = Entity::default();
        let result = test_all(&op, &specs(), &old, &new, false).unwrap();
        assert!(!result.valid);
        assert!(result.message.is_some());
    }

    #[test]
    fn test_all_raises_on_validation_failure_by_default() {
        let op = OperationRequest {
            user: None,
            request: RequestContext::default(),
            operation: Operation::Delete,
            type_name: "host".into(),
            name: Some("not-a-host-name".into()),
            actions: vec![],
            entity: None,
        };
        let old = Entity { perms: Some(vec!["del".into()]), exists: Some(true), ..Default::default() };
        let new = Entity::default();
        assert!(test_all(&op, &specs(), &old, &new, true).is_err());
    }
}
