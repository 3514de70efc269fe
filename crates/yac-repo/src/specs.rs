//! Specification loader (§4.6/C6), grounded on
//! `original_source/app/lib/specs.py`: reads the spec file (from the repo
//! or from a local path), renders its `request`/`types` templates, and
//! selects the type matching the current operation.

use tokio::sync::OnceCell;
use yac_core::config::Config;
use yac_core::error::{Error, Result};
use yac_core::types::{OperationRequest, RequestSpec, Specs, Type};

use crate::gate::GitRepo;

pub fn in_repo(cfg: &Config) -> bool {
    cfg.in_repo_specs()
}

/// Memoizes the file-source spec for the process lifetime: an on-disk
/// edit does not propagate until restart.
static FILE_SPEC_CACHE: OnceCell<String> = OnceCell::const_new();

pub async fn read(op: &OperationRequest, rpo: &GitRepo, cfg: &Config) -> Result<Specs> {
    let raw = if in_repo(cfg) {
        read_from_repo(rpo, cfg).await?
    } else {
        read_from_file(cfg).await?
    };

    let specs = parse(&raw, op, cfg)?;

    if let Some(t) = &specs.r#type {
        let file = t.details.get("file").and_then(|v| v.as_str()).unwrap_or_default();
        rpo.update_details(file)?;
    }

    Ok(specs)
}

async fn read_from_repo(rpo: &GitRepo, cfg: &Config) -> Result<String> {
    rpo.files()
        .get_specs(cfg.specs.trim_start_matches("./"))
        .await
        .map_err(|e| Error::repo_specs(format!("Could not read specs from repo at {}: {e}", cfg.specs)))
}

async fn read_from_file(cfg: &Config) -> Result<String> {
    FILE_SPEC_CACHE
        .get_or_try_init(|| async {
            tracing::debug!("Reading file {}", cfg.specs);
            tokio::fs::read_to_string(&cfg.specs)
                .await
                .map_err(|e| Error::specs(format!("Could not read specs from file at {}: {e}", cfg.specs)))
        })
        .await
        .cloned()
}

fn parse(raw: &str, op: &OperationRequest, cfg: &Config) -> Result<Specs> {
    let loaded = yac_yaml::load(raw, false).map_err(|e| Error::specs(format!("In YAML syntax: {e}")))?;
    let mut data = match yac_yaml::to_json(loaded) {
        Some(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };

    let request_value = data.get("request").cloned().unwrap_or_else(|| serde_json::json!({"headers": {}}));
    let rendered_request = yac_template::render(&request_value, &yac_core::props::get_request(&cfg.env), true)
        .map_err(|e| Error::specs(format!("In request at {e}")))?;
    let request: RequestSpec =
        serde_json::from_value(rendered_request.clone()).map_err(|e| Error::specs(format!("In request: {e}")))?;
    data.insert("request".to_string(), rendered_request);

    let types_value = data.get("types").cloned().unwrap_or_else(|| serde_json::json!([]));
    let rendered_types = yac_template::render(&types_value, &yac_core::props::get_types(op, &request, &cfg.env), true)
        .map_err(|e| Error::specs(format!("In types at {e}")))?;

    let selected_type: Option<Type> = rendered_types
        .as_array()
        .into_iter()
        .flatten()
        .find(|t| t.get("name").and_then(|n| n.as_str()) == Some(op.type_name.as_str()))
        .map(|t| serde_json::from_value(t.clone()))
        .transpose()
        .map_err(|e| Error::specs(format!("In types: {e}")))?;

    data.insert("types".to_string(), rendered_types);

    let version = data
        .get("version")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::specs("In version: missing version field"))?
        .to_string();
    let types: Vec<Type> = serde_json::from_value(data.get("types").cloned().unwrap_or_default())
        .map_err(|e| Error::specs(format!("In types: {e}")))?;
    let roles = data
        .get("roles")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| Error::specs(format!("In roles: {e}")))?
        .unwrap_or_default();
    let sets = data
        .get("sets")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| Error::specs(format!("In sets: {e}")))?
        .unwrap_or_default();
    let schema = data.get("schema").cloned().unwrap_or_else(|| serde_json::json!({}));

    check_version_compat(&version)?;

    Ok(Specs { version, request, types, roles, sets, schema, r#type: selected_type })
}

fn check_version_compat(spec_version: &str) -> Result<()> {
    let pattern = regex::Regex::new(&format!(r"^{}\.[0-9]+(rc[0-9]+)?$", regex::escape(spec_version)))
        .map_err(|e| Error::specs(e.to_string()))?;
    if !pattern.is_match(yac_core::consts::VERSION) {
        return Err(Error::specs(format!(
            "In version: {spec_version} is not compatible with YAC {}",
            yac_core::consts::VERSION
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use yac_core::types::{Operation, RequestContext};

    fn op() -> OperationRequest {
        OperationRequest {
            user: None,
            request: RequestContext::default(),
            operation: Operation::Read,
            type_name: "host".into(),
            name: None,
            actions: vec![],
            entity: None,
        }
    }

    #[test]
    fn parse_selects_matching_type_and_checks_version() {
        let cfg = Config::from_env();
        let major_minor: String = yac_core::consts::VERSION.splitn(3, '.').take(2).collect::<Vec<_>>().join(".");
        let yaml = format!(
            "version: \"{major_minor}\"\nrequest:\n  headers: {{}}\ntypes:\n  - name: host\n    title: Host\n    name_pattern: \"^h[0-9]+$\"\nschema: {{}}\n"
        );
        let specs = parse(&yaml, &op(), &cfg).unwrap();
        assert!(specs.r#type.is_some());
        assert_eq!(specs.r#type.unwrap().name, "host");
    }

    #[test]
    fn parse_rejects_incompatible_version() {
        let cfg = Config::from_env();
        let yaml = "version: \"999.999\"\ntypes: []\nschema: {}\n";
        let err = parse(yaml, &op(), &cfg).unwrap_err();
        assert_eq!(err.code(), 500);
    }
}
