//! `ui_schema` plugin pipeline (the VAYS renderer's form layout tree) and
//! the `vays_category` plugin that populates it. Mirrors
//! `original_source/app/plugin/ui_schema/vays_category.py` and
//! `app/lib/uischema.py`.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use yac_core::Error;
use yac_plugin::{Plugin, Registry};

pub trait UiSchemaPlugin: Plugin {
    /// Returns the (possibly rewritten/dropped) json schema and the
    /// (possibly appended-to) ui schema, mirroring the json_schema plugin's
    /// drop semantics for the json side.
    fn process(
        &self,
        loc: &str,
        json_schema: Value,
        ui_schema: Value,
        props: &Value,
    ) -> Result<(Option<Value>, Value), Error>;
}

fn ensure_categorization(schema: Value) -> Map<String, Value> {
    match schema {
        Value::Object(m) if !m.is_empty() => m,
        _ => {
            let mut m = Map::new();
            m.insert("type".into(), Value::String("Categorization".into()));
            m.insert("elements".into(), Value::Array(Vec::new()));
            m
        }
    }
}

/// Finds (or appends) the child of kind/label `kind`/`label` inside
/// `schema.elements`, applies `f` to its owned value, and writes the result
/// back in place.
fn with_subschema(
    schema: &mut Map<String, Value>,
    kind: &str,
    label: &str,
    f: impl FnOnce(Value) -> Value,
) {
    let elements = schema
        .entry("elements")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .expect("elements is always an array");
    let index = elements
        .iter()
        .position(|e| {
            e.get("type").and_then(Value::as_str) == Some(kind)
                && e.get("label").and_then(Value::as_str) == Some(label)
        })
        .unwrap_or_else(|| {
            elements.push(json!({"type": kind, "label": label, "elements": []}));
            elements.len() - 1
        });
    let taken = elements[index].take();
    elements[index] = f(taken);
}

fn add_control(loc: &str, opt: &Value, mut schema: Value) -> Value {
    if let Some(elements) = schema.get_mut("elements").and_then(Value::as_array_mut) {
        elements.push(json!({"type": "Control", "scope": loc, "options": opt}));
    }
    schema
}

/// Builds the `Categorization/Category[/Group]/Control` tree, creating
/// each level on first use.
pub fn add_element(loc: &str, opt: &Value, category: &str, group: Option<&str>, schema: Value) -> Value {
    let mut root = ensure_categorization(schema);
    with_subschema(&mut root, "Category", category, |cat_value| {
        let mut cat_map = match cat_value {
            Value::Object(m) => m,
            other => return other,
        };
        match group {
            Some(group) => {
                with_subschema(&mut cat_map, "Group", group, |grp_value| {
                    add_control(loc, opt, grp_value)
                });
                Value::Object(cat_map)
            }
            None => add_control(loc, opt, Value::Object(cat_map)),
        }
    });
    Value::Object(root)
}

/// Populates the ui_schema from a schema node's `vays_category` (required,
/// once present), `vays_group` (optional) and `vays_options` (optional),
/// then strips all three from the json schema.
pub struct VaysCategory;
impl Plugin for VaysCategory {
    fn name(&self) -> &str {
        "vays_category"
    }
    fn order(&self) -> (bool, i32) {
        (true, 20)
    }
}
impl UiSchemaPlugin for VaysCategory {
    fn process(
        &self,
        loc: &str,
        json_schema: Value,
        ui_schema: Value,
        _props: &Value,
    ) -> Result<(Option<Value>, Value), Error> {
        let mut json = match json_schema {
            Value::Object(m) => m,
            other => return Ok((Some(other), ui_schema)),
        };

        let Some(cat) = json.get("vays_category") else {
            return Ok((Some(Value::Object(json)), ui_schema));
        };
        let cat = cat
            .as_str()
            .ok_or_else(|| Error::schema_specs(format!("{loc}/vays_category is not a string")))?
            .to_string();
        let group = match json.get("vays_group") {
            Some(Value::Null) | None => None,
            Some(v) => Some(
                v.as_str()
                    .ok_or_else(|| Error::schema_specs(format!("{loc}/vays_group is not a string")))?
                    .to_string(),
            ),
        };
        let opt = json.get("vays_options").cloned().unwrap_or_else(|| json!({}));
        if !opt.is_object() {
            return Err(Error::schema_specs(format!("{loc}/vays_options is not an object")));
        }

        let ui_schema = add_element(loc, &opt, &cat, group.as_deref(), ui_schema);

        json.remove("vays_category");
        json.remove("vays_group");
        json.remove("vays_options");
        Ok((Some(Value::Object(json)), ui_schema))
    }
}

pub fn registry() -> Registry<dyn UiSchemaPlugin> {
    Registry::new(vec![Arc::new(VaysCategory) as Arc<dyn UiSchemaPlugin>])
}
