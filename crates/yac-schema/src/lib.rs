//! Dynamic JSON Schema generation and validation (§4.8/C8): renders a
//! type's schema template against the current operation, runs it through
//! the json_schema/ui_schema plugin pipeline, collapses trivial results,
//! and validates the candidate data against the result with draft-07
//! semantics. Grounded on `original_source/app/lib/schema.py`.

pub mod formats;
pub mod json_schema;
pub mod ui_schema;

use jsonschema::{Draft, JSONSchema};
use serde_json::{json, Value};
use yac_core::types::{OperationRequest, Permission, RequestSpec, SchemaResult, ValidationError};
use yac_core::Error;
use yac_plugin::Registry;

pub use json_schema::{JsonSchemaPlugin, SchemaContext};
pub use ui_schema::UiSchemaPlugin;

/// Builds the json_schema/ui_schema/draft-07-validation triple for one
/// operation: renders the type's `schema` template, walks the plugin
/// pipeline, collapses a trivial result to a concrete schema, then
/// validates `new_data` against it.
pub fn get(
    op: &OperationRequest,
    schema_template: &Value,
    request_spec: &RequestSpec,
    old_data: &Value,
    old_perms: &[Permission],
    new_data: &Value,
    env: &std::collections::HashMap<String, String>,
) -> Result<SchemaResult, Error> {
    let mut schema_props = yac_core::props::get_schema(op, request_spec, old_data, old_perms, new_data, env);

    // Inject `add` on create so the complete schema (used by the UI) is
    // available even though the caller's actual perms are checked
    // separately, as a whole, in yac-validator's perms tester.
    if schema_props.get("operation").and_then(Value::as_str) == Some("create") {
        if let Some(perms) = schema_props
            .get_mut("old")
            .and_then(|o| o.get_mut("perms"))
            .and_then(Value::as_array_mut)
        {
            if !perms.iter().any(|p| p.as_str() == Some("add")) {
                perms.push(json!("add"));
            }
        }
    }

    let json_schema = yac_template::render(schema_template, &schema_props, true)
        .map_err(|e| Error::schema_specs(format!("{}: {}", e.loc, e)))?;

    let json_plugins = json_schema::registry(formats::names());
    let ui_plugins = ui_schema::registry();
    let mut ctx = SchemaContext::default();
    let (json_schema, ui_schema) = handle_schema(
        "#",
        json_schema,
        json!({}),
        &mut ctx,
        &schema_props,
        &json_plugins,
        &ui_plugins,
    )?;

    let json_schema = match json_schema {
        None => json!({"not": {}}),
        Some(Value::Bool(false)) => json!({"not": {}}),
        Some(Value::Bool(true)) => json!({}),
        Some(other) => other,
    };

    validate(json_schema, ui_schema, new_data.clone())
}

fn validate(json_schema: Value, ui_schema: Value, new_data: Value) -> Result<SchemaResult, Error> {
    let options = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .with_format("ssh_key", |s: &str| formats::ssh_key(s))
        .with_format("unix_password_hash", |s: &str| formats::unix_password_hash(s));

    let compiled = options
        .compile(&json_schema)
        .map_err(|e| Error::schema_specs(e.to_string()))?;

    match compiled.validate(&new_data) {
        Ok(()) => Ok(SchemaResult {
            schema: json_schema,
            ui_schema,
            data: new_data,
            valid: true,
            errors: vec![],
        }),
        Err(errors) => {
            let loc = |pointer: &str| {
                let trimmed = pointer.trim_start_matches('/');
                if trimmed.is_empty() {
                    "#".to_string()
                } else {
                    format!("#/{trimmed}")
                }
            };
            let errors: Vec<ValidationError> = errors
                .map(|e| {
                    let schema_path = e.schema_path.to_string();
                    ValidationError {
                        validator: schema_path.rsplit('/').next().unwrap_or_default().to_string(),
                        message: e.to_string(),
                        schema_loc: loc(&schema_path),
                        data_loc: loc(&e.instance_path.to_string()),
                    }
                })
                .collect();
            Ok(SchemaResult {
                schema: json_schema,
                ui_schema,
                data: new_data,
                valid: false,
                errors,
            })
        }
    }
}

/// Recursively walks `json_schema`: early json_schema plugins, early
/// ui_schema plugins, then each subschema position (singleton/object/array
/// keywords per `yac_locs::{SUBSCHEMAS,SUBSCHEMA_OBJECTS,SUBSCHEMA_ARRAYS}`),
/// then late json_schema plugins, then late ui_schema plugins. Any plugin
/// may collapse the node to a bool or drop it (`None`) to short-circuit
/// the rest of the walk at that node.
pub fn handle_schema(
    loc: &str,
    json_schema: Value,
    mut ui_schema: Value,
    ctx: &mut SchemaContext,
    props: &Value,
    json_plugins: &Registry<dyn JsonSchemaPlugin>,
    ui_plugins: &Registry<dyn UiSchemaPlugin>,
) -> Result<(Option<Value>, Value), Error> {
    if let Value::Bool(b) = json_schema {
        return Ok((Some(Value::Bool(b)), ui_schema));
    }
    let mut json = match json_schema {
        Value::Object(m) => m,
        _ => return Err(Error::schema_specs(format!("{loc} is not a schema (object or bool)"))),
    };

    for plug in json_plugins.phase(false) {
        match plug.process(loc, Value::Object(std::mem::take(&mut json)), ctx, props)? {
            Some(Value::Object(m)) => json = m,
            Some(other) => return Ok((Some(other), ui_schema)),
            None => return Ok((None, ui_schema)),
        }
    }

    for plug in ui_plugins.phase(false) {
        let (j, u) = plug.process(loc, Value::Object(std::mem::take(&mut json)), ui_schema, props)?;
        ui_schema = u;
        match j {
            Some(Value::Object(m)) => json = m,
            Some(other) => return Ok((Some(other), ui_schema)),
            None => return Ok((None, ui_schema)),
        }
    }

    for k in yac_locs::SUBSCHEMAS {
        if let Some(sub) = json.remove(*k) {
            let (s, u) = handle_schema(&format!("{loc}/{k}"), sub, ui_schema, ctx, props, json_plugins, ui_plugins)?;
            ui_schema = u;
            if let Some(v) = s {
                json.insert((*k).to_string(), v);
            }
        }
    }

    for k in yac_locs::SUBSCHEMA_OBJECTS {
        if let Some(Value::Object(mut obj_map)) = json.remove(*k) {
            for key in obj_map.keys().cloned().collect::<Vec<_>>() {
                let sub = obj_map.remove(&key).unwrap();
                let (s, u) = handle_schema(
                    &format!("{loc}/{k}/{key}"),
                    sub,
                    ui_schema,
                    ctx,
                    props,
                    json_plugins,
                    ui_plugins,
                )?;
                ui_schema = u;
                if let Some(v) = s {
                    obj_map.insert(key, v);
                }
            }
            json.insert((*k).to_string(), Value::Object(obj_map));
        } else if json.get(*k).is_some() {
            return Err(Error::schema_specs(format!("{loc}/{k} is not an object (of schemas)")));
        }
    }

    for k in yac_locs::SUBSCHEMA_ARRAYS {
        if let Some(Value::Array(items)) = json.remove(*k) {
            let mut out = Vec::with_capacity(items.len());
            for (i, val) in items.into_iter().enumerate() {
                let (s, u) = handle_schema(
                    &format!("{loc}/{k}/{i}"),
                    val,
                    ui_schema,
                    ctx,
                    props,
                    json_plugins,
                    ui_plugins,
                )?;
                ui_schema = u;
                if let Some(v) = s {
                    out.push(v);
                }
            }
            json.insert((*k).to_string(), Value::Array(out));
        } else if json.get(*k).is_some() {
            return Err(Error::schema_specs(format!("{loc}/{k} is not an array (of schemas)")));
        }
    }

    for plug in json_plugins.phase(true) {
        match plug.process(loc, Value::Object(std::mem::take(&mut json)), ctx, props)? {
            Some(Value::Object(m)) => json = m,
            Some(other) => return Ok((Some(other), ui_schema)),
            None => return Ok((None, ui_schema)),
        }
    }

    for plug in ui_plugins.phase(true) {
        let (j, u) = plug.process(loc, Value::Object(std::mem::take(&mut json)), ui_schema, props)?;
        ui_schema = u;
        match j {
            Some(Value::Object(m)) => json = m,
            Some(other) => return Ok((Some(other), ui_schema)),
            None => return Ok((None, ui_schema)),
        }
    }

    Ok((Some(Value::Object(json)), ui_schema))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use yac_core::types::{Operation, RequestContext};

    fn base_op() -> OperationRequest {
        OperationRequest {
            user: None,
            request: RequestContext::default(),
            operation: Operation::Create,
            type_name: "host".into(),
            name: None,
            actions: vec![],
            entity: None,
        }
    }

    #[test]
    fn trivial_object_schema_round_trips() {
        let op = base_op();
        let schema_template = json!({"type": "object", "properties": {"name": {"type": "string"}}});
        let result = get(
            &op,
            &schema_template,
            &RequestSpec::default(),
            &Value::Null,
            &[],
            &json!({"name": "abc"}),
            &HashMap::new(),
        )
        .unwrap();
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn yac_if_false_drops_subschema() {
        let op = base_op();
        let schema_template = json!({
            "type": "object",
            "properties": {
                "gated": {"type": "string", "yac_if": "false"}
            }
        });
        let result = get(
            &op,
            &schema_template,
            &RequestSpec::default(),
            &Value::Null,
            &[],
            &json!({}),
            &HashMap::new(),
        )
        .unwrap();
        assert!(result.schema["properties"].get("gated").is_none());
    }

    #[test]
    fn non_object_top_level_is_rejected() {
        let op = base_op();
        let schema_template = json!({"type": "string"});
        let err = get(
            &op,
            &schema_template,
            &RequestSpec::default(),
            &Value::Null,
            &[],
            &json!("x"),
            &HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(err.code(), 500);
    }
}
