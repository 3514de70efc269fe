//! `json_schema` plugin pipeline: each plugin inspects/rewrites one subschema
//! node during the recursive walk in `handle_schema`. Mirrors
//! `original_source/app/plugin/json_schema/*.py` one file per plugin.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use yac_core::Error;
use yac_plugin::{Plugin, Registry};
use yac_template::render_test;

/// State threaded through the whole `handle_schema` recursion for one
/// `schema::get()` call — not per-node, per-request.
#[derive(Default, Debug)]
pub struct SchemaContext {
    /// `loc` → permissions required at that loc or below, nearest-ancestor
    /// wins (`yac_perms.py`). Seeded with `{"#": ["add", "edt"]}` the first
    /// time the root is visited.
    pub yac_perms: HashMap<String, Vec<String>>,
    /// Memoized object-valued data locations under `old.data`, computed
    /// once on first use by `add_consts.py`.
    pub add_consts_locs: Option<Vec<String>>,
}

pub trait JsonSchemaPlugin: Plugin {
    /// `schema` is always `Value::Object` on entry. Returns:
    /// - `Some(Value::Object(_))` to continue the walk with the rewritten schema
    /// - `Some(Value::Bool(_))` to collapse the subschema to a trivial bool
    /// - `None` to drop the subschema entirely
    fn process(
        &self,
        loc: &str,
        schema: Value,
        ctx: &mut SchemaContext,
        props: &Value,
    ) -> Result<Option<Value>, Error>;
}

fn as_map(schema: Value) -> Map<String, Value> {
    match schema {
        Value::Object(m) => m,
        _ => Map::new(),
    }
}

/// Only allows top-level `type: object` schemas, and strips the
/// `$schema` keyword (warning if it names anything but draft-07).
pub struct ToplevelObject;
impl Plugin for ToplevelObject {
    fn name(&self) -> &str {
        "toplevel_object"
    }
}
impl JsonSchemaPlugin for ToplevelObject {
    fn process(
        &self,
        loc: &str,
        schema: Value,
        _ctx: &mut SchemaContext,
        _props: &Value,
    ) -> Result<Option<Value>, Error> {
        let mut json = as_map(schema);
        if loc == "#" {
            if json.get("type").and_then(Value::as_str) != Some("object") {
                return Err(Error::schema_specs(
                    "json_schema at # (top-level) must be of type object",
                ));
            }
            if let Some(v) = json.get("$schema") {
                if v.as_str() != Some("https://json-schema.org/draft-07/schema") {
                    tracing::warn!("#/$schema has an invalid value, only draft-07 is supported");
                }
                json.remove("$schema");
            }
        }
        Ok(Some(Value::Object(json)))
    }
}

/// Defaults `additionalProperties` to `false` for object schemas.
pub struct AdditionalProperties;
impl Plugin for AdditionalProperties {
    fn name(&self) -> &str {
        "additional_properties"
    }
}
impl JsonSchemaPlugin for AdditionalProperties {
    fn process(
        &self,
        _loc: &str,
        schema: Value,
        _ctx: &mut SchemaContext,
        _props: &Value,
    ) -> Result<Option<Value>, Error> {
        let mut json = as_map(schema);
        if json.get("type").and_then(Value::as_str) == Some("object")
            && !json.contains_key("additionalProperties")
        {
            json.insert("additionalProperties".into(), Value::Bool(false));
        }
        Ok(Some(Value::Object(json)))
    }
}

const BUILTIN_FORMATS: &[&str] = &[
    "date-time",
    "date",
    "time",
    "duration",
    "email",
    "idn-email",
    "hostname",
    "idn-hostname",
    "ipv4",
    "ipv6",
    "uri",
    "uri-reference",
    "iri",
    "iri-reference",
    "uuid",
    "uri-template",
    "json-pointer",
    "relative-json-pointer",
    "regex",
];

/// Only allows format validators that draft-07 defines natively or that a
/// `schema_formats` plugin provides — an unknown `format` keyword is
/// silently valid in JSON Schema by default, which would be an insecure
/// footgun here.
pub struct Formats {
    pub custom_formats: Vec<String>,
}
impl Plugin for Formats {
    fn name(&self) -> &str {
        "formats"
    }
}
impl JsonSchemaPlugin for Formats {
    fn process(
        &self,
        loc: &str,
        schema: Value,
        _ctx: &mut SchemaContext,
        _props: &Value,
    ) -> Result<Option<Value>, Error> {
        let json = as_map(schema);
        if let Some(fmt) = json.get("format").and_then(Value::as_str) {
            if !BUILTIN_FORMATS.contains(&fmt) && !self.custom_formats.iter().any(|f| f == fmt) {
                return Err(Error::schema_specs(format!(
                    "{loc}/format validator \"{fmt}\" is not defined"
                )));
            }
        }
        Ok(Some(Value::Object(json)))
    }
}

/// Drops a subschema whose `yac_if` template predicate evaluates false.
pub struct YacIf;
impl Plugin for YacIf {
    fn name(&self) -> &str {
        "yac_if"
    }
}
impl JsonSchemaPlugin for YacIf {
    fn process(
        &self,
        loc: &str,
        schema: Value,
        _ctx: &mut SchemaContext,
        props: &Value,
    ) -> Result<Option<Value>, Error> {
        let mut json = as_map(schema);
        let Some(expr) = json.get("yac_if") else {
            return Ok(Some(Value::Object(json)));
        };
        let expr = expr
            .as_str()
            .ok_or_else(|| Error::schema_specs(format!("{loc}/yac_if is not a string")))?
            .to_string();
        let matched = render_test(&expr, props)
            .map_err(|e| Error::schema_specs(format!("{loc}/yac_if: {e}")))?;
        if !matched {
            return Ok(None);
        }
        json.remove("yac_if");
        Ok(Some(Value::Object(json)))
    }
}

/// Drops a `yac_changable: false` subschema when the operation is `change`.
pub struct YacChangable;
impl Plugin for YacChangable {
    fn name(&self) -> &str {
        "yac_changable"
    }
}
impl JsonSchemaPlugin for YacChangable {
    fn process(
        &self,
        loc: &str,
        schema: Value,
        _ctx: &mut SchemaContext,
        props: &Value,
    ) -> Result<Option<Value>, Error> {
        let mut json = as_map(schema);
        if !json.contains_key("yac_changable") {
            return Ok(Some(Value::Object(json)));
        }
        if props.get("operation").and_then(Value::as_str) != Some("change") {
            json.remove("yac_changable");
            return Ok(Some(Value::Object(json)));
        }
        let changable = json
            .get("yac_changable")
            .and_then(Value::as_bool)
            .ok_or_else(|| Error::schema_specs(format!("{loc}/yac_changable is not a boolean")))?;
        if !changable {
            return Ok(None);
        }
        json.remove("yac_changable");
        Ok(Some(Value::Object(json)))
    }
}

/// Drops a subschema whose `yac_types` allowlist excludes the current type.
pub struct YacTypes;
impl Plugin for YacTypes {
    fn name(&self) -> &str {
        "yac_types"
    }
}
impl JsonSchemaPlugin for YacTypes {
    fn process(
        &self,
        loc: &str,
        schema: Value,
        _ctx: &mut SchemaContext,
        props: &Value,
    ) -> Result<Option<Value>, Error> {
        let mut json = as_map(schema);
        let Some(types) = json.get("yac_types") else {
            return Ok(Some(Value::Object(json)));
        };
        let types = types
            .as_array()
            .filter(|a| !a.is_empty() && a.iter().all(Value::is_string))
            .ok_or_else(|| Error::schema_specs(format!("{loc}/yac_types is not an array of strings")))?;
        let current = props.get("type").and_then(Value::as_str).unwrap_or("");
        let allowed = types.iter().any(|t| t.as_str() == Some(current));
        if !allowed {
            return Ok(None);
        }
        json.remove("yac_types");
        Ok(Some(Value::Object(json)))
    }
}

/// Drops a subschema unless the caller holds at least one of the
/// permissions required at its location (inherited from the nearest
/// ancestor `yac_perms`, defaulting to `["add", "edt"]` at the root).
pub struct YacPerms;
impl Plugin for YacPerms {
    fn name(&self) -> &str {
        "yac_perms"
    }
}
impl JsonSchemaPlugin for YacPerms {
    fn process(
        &self,
        loc: &str,
        schema: Value,
        ctx: &mut SchemaContext,
        props: &Value,
    ) -> Result<Option<Value>, Error> {
        let mut json = as_map(schema);

        if loc == "#" {
            ctx.yac_perms
                .insert("#".to_string(), vec!["add".to_string(), "edt".to_string()]);
        }

        if let Some(perms) = json.get("yac_perms") {
            let perms = perms
                .as_array()
                .filter(|a| !a.is_empty() && a.iter().all(Value::is_string))
                .ok_or_else(|| Error::schema_specs(format!("{loc}/yac_perms is not an array of strings")))?;
            let perms: Vec<String> = perms.iter().map(|p| p.as_str().unwrap().to_string()).collect();
            ctx.yac_perms.insert(loc.to_string(), perms);
            json.remove("yac_perms");
        }

        let keys: Vec<String> = ctx.yac_perms.keys().cloned().collect();
        let perms_loc = match yac_locs::get_most_specific(loc, &keys) {
            Some(l) => l,
            None => {
                tracing::warn!("removed {loc} from schema due to undefined perms");
                return Ok(None);
            }
        };
        let required = &ctx.yac_perms[&perms_loc];
        let held: Vec<&str> = props
            .get("old")
            .and_then(|o| o.get("perms"))
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let has_one = required.iter().any(|p| held.contains(&p.as_str()));
        if !has_one {
            tracing::info!(
                "removed {loc} from schema due to missing perms (requires one of: {:?})",
                required
            );
            return Ok(None);
        }

        Ok(Some(Value::Object(json)))
    }
}

/// Adds existing `old.data` values back into the schema as `const`s where
/// the schema doesn't already specify that key, so a `change` request can
/// round-trip unmodified data without re-stating it. Runs before
/// `yac_optional` so the added keys land in `required` too. List-valued
/// data is treated as a single opaque const (nested reduction is not
/// attempted), matching the Open Question decision in `DESIGN.md`.
pub struct AddConsts;
impl Plugin for AddConsts {
    fn name(&self) -> &str {
        "add_consts"
    }
    fn order(&self) -> (bool, i32) {
        (true, 90)
    }
}
impl JsonSchemaPlugin for AddConsts {
    fn process(
        &self,
        loc: &str,
        schema: Value,
        ctx: &mut SchemaContext,
        props: &Value,
    ) -> Result<Option<Value>, Error> {
        let mut json = as_map(schema);
        if props.get("operation").and_then(Value::as_str) != Some("change")
            || json.get("type").and_then(Value::as_str) != Some("object")
        {
            return Ok(Some(Value::Object(json)));
        }

        let old_data = props
            .get("old")
            .and_then(|o| o.get("data"))
            .cloned()
            .unwrap_or(Value::Null);
        let old_perms: Vec<&str> = props
            .get("old")
            .and_then(|o| o.get("perms"))
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        if ctx.add_consts_locs.is_none() {
            let mut locs = Vec::new();
            yac_locs::get(&old_data, &|v| v.is_object(), "#", &mut locs);
            ctx.add_consts_locs = Some(locs);
        }
        let locs = ctx.add_consts_locs.clone().unwrap_or_default();

        for data_loc in yac_locs::reduce(loc, &locs, false) {
            let Some(Value::Object(data)) = yac_locs::extract(&data_loc, &old_data).cloned() else {
                continue;
            };
            for (key, value) in data {
                if yac_locs::is_specified(&key, &Value::Object(json.clone())) {
                    tracing::debug!(
                        "Not adding data {data_loc}/{key} to schema {loc}/properties/{key} due to existing subschema"
                    );
                    continue;
                }
                let properties = json
                    .entry("properties")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(props_map) = properties {
                    props_map.insert(
                        key,
                        serde_json::json!({
                            "const": value,
                            "yac_optional": old_perms.contains(&"cln"),
                        }),
                    );
                }
            }
        }

        Ok(Some(Value::Object(json)))
    }
}

/// Builds `required` for object schemas from their `properties`, honoring
/// each property's `yac_optional` (defaulting to required/`false`). Warns
/// if `required` was already explicit — it gets overwritten either way.
pub struct YacOptional;
impl Plugin for YacOptional {
    fn name(&self) -> &str {
        "yac_optional"
    }
    fn order(&self) -> (bool, i32) {
        (true, 100)
    }
}
impl JsonSchemaPlugin for YacOptional {
    fn process(
        &self,
        loc: &str,
        schema: Value,
        _ctx: &mut SchemaContext,
        _props: &Value,
    ) -> Result<Option<Value>, Error> {
        let mut json = as_map(schema);
        if json.get("type").and_then(Value::as_str) != Some("object") {
            return Ok(Some(Value::Object(json)));
        }

        if json.contains_key("required") {
            tracing::warn!("Explicit definition of {loc}/required, better use yac_optional instead");
        } else {
            json.insert("required".into(), Value::Array(Vec::new()));
        }

        let keys: Vec<String> = json
            .get("properties")
            .and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();

        for key in keys {
            let mut optional = false;
            if let Value::Object(props_map) = json.get_mut("properties").unwrap() {
                if let Some(prop_schema) = props_map.get_mut(&key) {
                    if let Value::Object(prop_map) = prop_schema {
                        if let Some(v) = prop_map.remove("yac_optional") {
                            optional = v.as_bool().ok_or_else(|| {
                                Error::schema_specs(format!(
                                    "{loc}/properties/{key}/yac_optional is not a boolean"
                                ))
                            })?;
                        }
                    }
                }
            }

            let required = json.get_mut("required").and_then(Value::as_array_mut).unwrap();
            let already = required.iter().any(|r| r.as_str() == Some(key.as_str()));
            if !already && !optional {
                required.push(Value::String(key.clone()));
            }
            if already && optional {
                required.retain(|r| r.as_str() != Some(key.as_str()));
            }
        }

        Ok(Some(Value::Object(json)))
    }
}

/// Gives required booleans/consts without an explicit `default` one, so
/// the UI always has a complete, valid data object to start from.
pub struct RequiredDefaults;
impl Plugin for RequiredDefaults {
    fn name(&self) -> &str {
        "required_defaults"
    }
    fn order(&self) -> (bool, i32) {
        (true, 110)
    }
}
impl JsonSchemaPlugin for RequiredDefaults {
    fn process(
        &self,
        loc: &str,
        schema: Value,
        _ctx: &mut SchemaContext,
        _props: &Value,
    ) -> Result<Option<Value>, Error> {
        let mut json = as_map(schema);
        if json.get("type").and_then(Value::as_str) != Some("object") {
            return Ok(Some(Value::Object(json)));
        }

        let required: Vec<String> = json
            .get("required")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        if let Some(Value::Object(props_map)) = json.get_mut("properties") {
            for key in &required {
                let Some(prop_schema) = props_map.get_mut(key) else { continue };
                let Value::Object(prop_map) = prop_schema else { continue };
                if prop_map.contains_key("default") {
                    continue;
                }
                if prop_map.get("type").and_then(Value::as_str) == Some("boolean") {
                    prop_map.insert("default".into(), Value::Bool(false));
                    tracing::debug!("Added required {loc}/properties/{key}/default = false to schema");
                } else if let Some(cnst) = prop_map.get("const").cloned() {
                    prop_map.insert("default".into(), cnst);
                    tracing::debug!("Added required {loc}/properties/{key}/default = const value to schema");
                }
            }
        }

        Ok(Some(Value::Object(json)))
    }
}

pub fn registry(custom_formats: Vec<String>) -> Registry<dyn JsonSchemaPlugin> {
    Registry::new(vec![
        Arc::new(AdditionalProperties) as Arc<dyn JsonSchemaPlugin>,
        Arc::new(Formats { custom_formats }),
        Arc::new(ToplevelObject),
        Arc::new(YacChangable),
        Arc::new(YacIf),
        Arc::new(YacPerms),
        Arc::new(YacTypes),
        Arc::new(AddConsts),
        Arc::new(YacOptional),
        Arc::new(RequiredDefaults),
    ])
}
