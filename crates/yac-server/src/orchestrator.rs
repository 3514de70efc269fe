//! Per-operation orchestration (§4.11/C11), grounded on
//! `original_source/app/router/{create,change,delete,read,arbitrary,validate,status}.py`:
//! the canonical reader→specs→entities→validate→(writer)→actions sequence
//! shared by every HTTP handler, independent of axum/HTTP concerns.

use std::collections::HashMap;

use serde_json::json;
use yac_core::error::{Error, Result};
use yac_core::types::{
    Diff, Entity, EntityPayload, Log, NameGenerated, OperationRequest, Specs, Status, Type,
    ValidationResult,
};

use crate::state::AppState;

/// Steps 1-4 of the canonical sequence, common to create/change/delete/
/// arbitrary: open a reader, load specs, load `old`/`new`, and validate —
/// then release the reader before the caller fires `*_BEFORE` hooks.
async fn load_and_validate(state: &AppState, op: &OperationRequest) -> Result<(Specs, Entity, Entity, ValidationResult)> {
    let reader = state.repo.reader(op.user.as_ref(), false).await?;
    let specs = yac_repo::specs::read(op, &state.repo, &state.config).await?;
    let files = state.repo.files();
    let (old, new) = yac_repo::get_entities(&files, op, &specs, &state.config.env).await?;
    let result = yac_validator::test_all(op, &specs, &old, &new, true);
    reader.release().await;
    let result = result?;
    Ok((specs, old, new, result))
}

/// Checked by every narrow (single-entity) read path — detail, raw YAML,
/// logs — which skip the full validator pipeline (it would also demand a
/// matching `name_pattern`; the names tester explicitly skips that check
/// for `read`, per §4.9) in favor of just the existence/`see` gate.
fn check_readable(old: &Entity) -> Result<()> {
    if old.exists != Some(true) {
        return Err(Error::request_not_found("The entity does not exist"));
    }
    if !old.has_perm("see") {
        return Err(Error::request_forbidden("You need the \"see\" permission to execute this operation."));
    }
    Ok(())
}

/// GET /entity/{type} — list entities of a type, filtered to those the
/// caller may `see`, with `options` populated per `type.options`.
pub async fn list(
    state: &AppState,
    op: OperationRequest,
    search: Option<&str>,
    skip: usize,
    limit: usize,
) -> Result<yac_core::types::EntityList> {
    use yac_core::types::{EntityList, ListedEntity};

    let reader = state.repo.reader(op.user.as_ref(), true).await?;
    let specs = yac_repo::specs::read(&op, &state.repo, &state.config).await?;
    yac_validator::test_ls(&op, &specs)?;

    let files = state.repo.files();
    let names = files.list().await?;

    let mut listed = Vec::new();
    for name in names {
        if let Some(s) = search {
            if !s.is_empty() && !name.contains(s) {
                continue;
            }
        }

        let is_link = files.is_link(&name).await?;
        let link = if is_link { Some(files.get_link(&name).await?) } else { None };
        let yaml = files.get(&name).await?;
        let data = serde_json::Value::Object(yac_yaml::load_as_dict(&yaml, false));

        let mut entity_op = op.clone();
        entity_op.name = Some(name.clone());
        let perms = yac_perms::get_from_roles(&entity_op, &specs.request, &specs.roles, &specs.sets, &data, &state.config.env, false);
        if !perms.iter().any(|p| p == "see") {
            continue;
        }

        let mut options = HashMap::new();
        if let Some(ty) = &specs.r#type {
            for opt in &ty.options {
                let present = data.get(&opt.name).cloned();
                if present.is_some() || !opt.default.is_null() {
                    options.insert(opt.name.clone(), present.unwrap_or_else(|| opt.default.clone()));
                }
            }
        }

        listed.push(ListedEntity { name, is_link, link, perms, options });
    }

    let hash = state.repo.get_hash(op.user.as_ref()).await?;
    reader.release().await;

    let list = listed.into_iter().skip(skip).take(limit).collect();
    Ok(EntityList { hash, list })
}

/// GET /entity — the types visible to the caller (per-user filtering
/// already applied by the spec's `types` template at load time).
pub async fn types(state: &AppState, op: OperationRequest) -> Result<Vec<Type>> {
    let reader = state.repo.reader(op.user.as_ref(), true).await?;
    let specs = yac_repo::specs::read(&op, &state.repo, &state.config).await?;
    reader.release().await;
    Ok(specs.types)
}

/// GET /entity/{type}/{name} — schema-annotated detail view.
pub async fn detail(state: &AppState, op: OperationRequest) -> Result<yac_core::types::DetailedEntity> {
    use yac_core::types::DetailedEntity;

    let reader = state.repo.reader(op.user.as_ref(), true).await?;
    let specs = yac_repo::specs::read(&op, &state.repo, &state.config).await?;
    let files = state.repo.files();
    let (old, _new) = yac_repo::get_entities(&files, &op, &specs, &state.config.env).await?;

    if let Err(e) = check_readable(&old) {
        reader.release().await;
        return Err(e);
    }

    let old_data = old.data.clone().unwrap_or_else(|| json!({}));
    let old_perms = old.perms.clone().unwrap_or_default();
    let schema = yac_schema::get(&op, &specs.schema, &specs.request, &old_data, &old_perms, &old_data, &state.config.env);
    let hash = state.repo.get_hash(op.user.as_ref()).await;
    reader.release().await;

    Ok(DetailedEntity {
        name: old.name.unwrap_or_default(),
        hash: hash?,
        is_link: old.is_link.unwrap_or(false),
        link: old.link,
        perms: old_perms,
        schema: schema?,
    })
}

/// GET /entity/{type}/{name}/yaml — raw stored YAML document.
pub async fn raw_yaml(state: &AppState, op: OperationRequest) -> Result<String> {
    let reader = state.repo.reader(op.user.as_ref(), true).await?;
    let specs = yac_repo::specs::read(&op, &state.repo, &state.config).await?;
    let files = state.repo.files();
    let (old, _new) = yac_repo::get_entities(&files, &op, &specs, &state.config.env).await?;
    let result = check_readable(&old);
    reader.release().await;
    result?;
    Ok(old.yaml.unwrap_or_default())
}

/// GET /entity/{type}/{name}/logs — collected log entries.
pub async fn logs(state: &AppState, op: OperationRequest) -> Result<Vec<Log>> {
    let reader = state.repo.reader(op.user.as_ref(), true).await?;
    let specs = yac_repo::specs::read(&op, &state.repo, &state.config).await?;
    let files = state.repo.files();
    let (old, _new) = yac_repo::get_entities(&files, &op, &specs, &state.config.env).await?;
    let result = check_readable(&old);
    reader.release().await;
    result?;
    Ok(crate::log::get(&op, &specs, &state.logs).await)
}

/// POST /entity/{type} — create (`NewEntity`/`CopyEntity`/`LinkEntity`).
pub async fn create(state: &AppState, op: OperationRequest, msg: &str) -> Result<Diff> {
    let (specs, _old, _new, result) = load_and_validate(state, &op).await?;
    yac_action::run_hook(yac_core::types::TypeActionHook::CreateBefore, &op, &specs, &state.actions).await?;

    let writer = state.repo.writer(op.user.as_ref()).await?;
    let files = state.repo.files();

    let name = match op.entity.as_ref().and_then(EntityPayload::name) {
        Some(n) => n.to_string(),
        None => {
            let ty = specs.r#type.as_ref().expect("validated by type_spec tester");
            if ty.name_generated == NameGenerated::Never {
                writer.release().await;
                return Err(Error::server("name_generated is \"never\" but no name was given"));
            }
            let old_list = files.list().await?;
            yac_repo::gen_name(&op, &specs, &old_list, &result.schema.data, &state.config.env)?
        }
    };

    let outcome = match &op.entity {
        Some(EntityPayload::New { yaml, .. }) => files.write(&writer, &name, "", yaml, msg).await,
        Some(EntityPayload::Copy { copy, .. }) => files.copy(&writer, &name, copy, msg).await,
        Some(EntityPayload::Link { link, .. }) => files.link(&writer, &name, link, msg).await,
        _ => unreachable!("validated by operations tester"),
    };
    writer.release().await;
    let (hash, patch) = outcome?;

    yac_action::run_hook(yac_core::types::TypeActionHook::CreateAfter, &op, &specs, &state.actions).await?;

    Ok(Diff { name, hash, patch })
}

/// PUT/PATCH /entity/{type}/{name} — change (`ReplaceEntity`/`UpdateEntity`).
pub async fn change(state: &AppState, op: OperationRequest, msg: &str) -> Result<Diff> {
    let (specs, old, _new, _result) = load_and_validate(state, &op).await?;
    yac_action::run_hook(yac_core::types::TypeActionHook::ChangeBefore, &op, &specs, &state.actions).await?;

    let writer = state.repo.writer(op.user.as_ref()).await?;
    let files = state.repo.files();

    let name_old = op.name.clone().expect("validated by names tester");
    let name_new = op.entity.as_ref().and_then(EntityPayload::name).map(str::to_string).unwrap_or_else(|| name_old.clone());
    let stored_yaml = old.yaml.clone().unwrap_or_default();

    let content_pair = match &op.entity {
        Some(EntityPayload::Replace { yaml_old, yaml_new, .. }) => Ok((yaml_old.clone(), yaml_new.clone())),
        Some(EntityPayload::Update { data, .. }) => yac_yaml::update(&stored_yaml, data).map(|merged| (stored_yaml.clone(), merged)),
        _ => unreachable!("validated by operations tester"),
    };
    let (content_old, content_new) = match content_pair {
        Ok(pair) => pair,
        Err(e) => {
            writer.release().await;
            return Err(e);
        }
    };

    let outcome = if name_new != name_old {
        files.write_rename(&writer, &name_old, &name_new, &content_old, &content_new, msg).await
    } else {
        files.write(&writer, &name_old, &content_old, &content_new, msg).await
    };
    writer.release().await;
    let (hash, patch) = outcome?;

    yac_action::run_hook(yac_core::types::TypeActionHook::ChangeAfter, &op, &specs, &state.actions).await?;

    Ok(Diff { name: name_new, hash, patch })
}

/// DELETE /entity/{type}/{name}.
pub async fn delete(state: &AppState, op: OperationRequest, msg: &str) -> Result<()> {
    let (specs, _old, _new, _result) = load_and_validate(state, &op).await?;
    yac_action::run_hook(yac_core::types::TypeActionHook::DeleteBefore, &op, &specs, &state.actions).await?;

    let writer = state.repo.writer(op.user.as_ref()).await?;
    let files = state.repo.files();
    let name = op.name.clone().expect("validated by names tester");
    let outcome = files.delete(&writer, &name, msg).await;
    writer.release().await;
    outcome?;

    yac_action::run_hook(yac_core::types::TypeActionHook::DeleteAfter, &op, &specs, &state.actions).await
}

/// POST /entity/{type}/{name}/run/{action} — an explicitly invoked action,
/// not tied to create/change/delete.
pub async fn run_action(state: &AppState, op: OperationRequest) -> Result<()> {
    let (specs, _old, _new, _result) = load_and_validate(state, &op).await?;
    yac_action::run_hook(yac_core::types::TypeActionHook::Arbitrary, &op, &specs, &state.actions).await
}

/// POST /validate — dry-run validation; schema/tester failures are
/// captured in the result instead of raised.
pub async fn validate(state: &AppState, op: OperationRequest) -> Result<ValidationResult> {
    let reader = state.repo.reader(op.user.as_ref(), true).await?;
    let specs = yac_repo::specs::read(&op, &state.repo, &state.config).await?;
    let files = state.repo.files();
    let (old, new) = yac_repo::get_entities(&files, &op, &specs, &state.config.env).await?;
    let result = yac_validator::test_all(&op, &specs, &old, &new, false);
    reader.release().await;
    result
}

/// GET /status — forces a fresh pull, then reports the repo hash.
pub async fn status(state: &AppState) -> Result<Status> {
    let reader = state.repo.reader(None, false).await?;
    let hash = state.repo.get_hash(None).await;
    reader.release().await;
    Ok(Status { hash: hash? })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_readable_rejects_missing_entity() {
        let old = Entity::default();
        let err = check_readable(&old).unwrap_err();
        assert_eq!(err.code(), 404);
    }

    #[test]
    fn check_readable_rejects_without_see_perm() {
        let old = Entity { exists: Some(true), perms: Some(vec!["edt".into()]), ..Default::default() };
        let err = check_readable(&old).unwrap_err();
        assert_eq!(err.code(), 403);
    }

    #[test]
    fn check_readable_passes_with_see_perm() {
        let old = Entity { exists: Some(true), perms: Some(vec!["see".into()]), ..Default::default() };
        assert!(check_readable(&old).is_ok());
    }
}
