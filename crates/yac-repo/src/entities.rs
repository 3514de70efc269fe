//! Entity-loading glue (§4.8, grounded on `original_source/app/lib/repo.py`):
//! collects whatever is known about the old/new entity referenced by an
//! operation, and resolves a generated name from a type's
//! `name_generator` template.

use std::collections::HashMap;

use yac_core::error::{Error, Result};
use yac_core::types::{Entity, EntityPayload, Operation, OperationRequest, Specs};

use crate::gate::FileOps;

/// Collects whatever is known about the old/new entity referenced by
/// `op`. Never fails on account of the entity itself being absent or
/// malformed — only a git/filesystem error propagates.
pub async fn get_entities(files: &FileOps<'_>, op: &OperationRequest, specs: &Specs, env: &HashMap<String, String>) -> Result<(Entity, Entity)> {
    let mut old = Entity::default();
    let mut new = Entity::default();

    match op.operation {
        Operation::Create => {
            new.name = op.entity.as_ref().and_then(|e| e.name()).map(str::to_string);
            match &op.entity {
                Some(EntityPayload::Copy { copy, .. }) => old.name = Some(copy.clone()),
                Some(EntityPayload::Link { link, .. }) => old.name = Some(link.clone()),
                _ => {}
            }
        }
        Operation::Change => {
            old.name = op.name.clone();
            new.name = op.entity.as_ref().and_then(|e| e.name()).map(str::to_string);
        }
        Operation::Read | Operation::Delete | Operation::Arbitrary => {
            old.name = op.name.clone();
        }
    }

    if specs.r#type.is_some() {
        if let Some(name) = &old.name {
            if files.exists(name).await {
                old.exists = Some(true);
                let is_link = files.is_link(name).await?;
                old.is_link = Some(is_link);
                old.link = if is_link { Some(files.get_link(name).await?) } else { None };
                old.yaml = Some(files.get(name).await?);
            }
        }
        if let Some(name) = &new.name {
            if files.exists(name).await {
                new.exists = Some(true);
                new.is_link = Some(files.is_link(name).await?);
            }
        }
    }

    if let Some(yaml) = &old.yaml {
        old.data = Some(serde_json::Value::Object(yac_yaml::load_as_dict(yaml, false)));
    }

    let empty = serde_json::json!({});
    let old_data = old.data.as_ref().unwrap_or(&empty);
    old.perms = Some(yac_perms::get_from_roles(op, &specs.request, &specs.roles, &specs.sets, old_data, env, false));
    new.perms = Some(yac_perms::get_from_roles(op, &specs.request, &specs.roles, &specs.sets, old_data, env, true));

    Ok((old, new))
}

/// Resolves a generated entity name from `type.name_generator` (a raw
/// Jinja expression, not a `{{ }}`-wrapped template).
pub fn gen_name(op: &OperationRequest, specs: &Specs, old_list: &[String], new_data: &serde_json::Value, env: &HashMap<String, String>) -> Result<String> {
    let ty = specs.r#type.as_ref().ok_or_else(|| Error::repo_client("Type is not defined"))?;
    let generator = ty
        .name_generator
        .as_deref()
        .ok_or_else(|| Error::repo_specs("In types: name_generator is not defined"))?;

    let props = yac_core::props::get_namegen(op, &specs.request, old_list, new_data, env);
    let wrapped = format!("{{{{ {generator} }}}}");
    match yac_template::render_str(&wrapped, &props, false, true) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Ok(other.to_string()),
        Err(e) => Err(Error::repo_specs(format!("In types name_generator: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yac_core::types::{NameGenerated, RequestContext, RequestSpec, Sets, Type};

    fn specs_with_generator(gen: &str) -> Specs {
        let ty = Type {
            name: "host".into(),
            title: None,
            name_pattern: "^h[0-9]+$".into(),
            name_example: None,
            name_generated: NameGenerated::Enforced,
            name_generator: Some(gen.to_string()),
            create: true,
            change: false,
            delete: false,
            options: vec![],
            logs: vec![],
            actions: vec![],
            favorites: vec![],
            details: serde_json::json!({}),
        };
        Specs {
            version: "1.0".into(),
            request: RequestSpec::default(),
            types: vec![ty.clone()],
            roles: vec![],
            sets: Sets::default(),
            schema: serde_json::json!({}),
            r#type: Some(ty),
        }
    }

    fn op() -> OperationRequest {
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
    fn gen_name_renders_generator_expression() {
        let specs = specs_with_generator("'h' ~ (old.list | length + 1)");
        let name = gen_name(&op(), &specs, &["h1".into()], &serde_json::json!({}), &HashMap::new()).unwrap();
        assert_eq!(name, "h2");
    }

    #[test]
    fn gen_name_fails_without_type() {
        let mut specs = specs_with_generator("'x'");
        specs.r#type = None;
        let err = gen_name(&op(), &specs, &[], &serde_json::json!({}), &HashMap::new()).unwrap_err();
        assert_eq!(err.code(), 400);
    }
}
