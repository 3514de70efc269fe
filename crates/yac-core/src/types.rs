//! Data model (§3): specification shapes, the per-request operation model,
//! the internal entity representation, and the client-facing view models.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A permission is a short code (`see`, `add`, …, `adm`); kept as a plain
/// `String` rather than a closed enum since role definitions and the
/// aggregate-expansion table (yac-perms) both treat it as free text that
/// happens to come from a fixed vocabulary.
pub type Permission = String;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub full_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub token: String,
}

/// A resolved header, per `request.headers.<K>` in the spec file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeaderSpec {
    pub pattern: Option<String>,
    pub default: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct RequestSpec {
    #[serde(default)]
    pub headers: HashMap<String, HeaderSpec>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NameGenerated {
    Never,
    Optional,
    Enforced,
}

impl Default for NameGenerated {
    fn default() -> Self {
        NameGenerated::Never
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct TypeOption {
    pub name: String,
    pub title: Option<String>,
    #[serde(default)]
    pub default: Value,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeLog {
    pub name: String,
    pub plugin: String,
    #[serde(default)]
    pub problem: Option<String>,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub details: Value,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TypeActionHook {
    Arbitrary,
    #[serde(rename = "create:before")]
    CreateBefore,
    #[serde(rename = "create:after")]
    CreateAfter,
    #[serde(rename = "change:before")]
    ChangeBefore,
    #[serde(rename = "change:after")]
    ChangeAfter,
    #[serde(rename = "delete:before")]
    DeleteBefore,
    #[serde(rename = "delete:after")]
    DeleteAfter,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeAction {
    pub name: String,
    #[serde(default = "default_action_perms")]
    pub perms: Vec<Permission>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub hooks: Vec<TypeActionHook>,
    pub plugin: String,
    #[serde(default)]
    pub details: Value,
}

fn default_action_perms() -> Vec<Permission> {
    vec!["act".to_string()]
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeFavoriteOperation {
    pub operation: String,
    #[serde(default)]
    pub actions: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeFavorite {
    pub name: String,
    pub title: Option<String>,
    pub operations: Vec<TypeFavoriteOperation>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Type {
    pub name: String,
    pub title: Option<String>,
    pub name_pattern: String,
    #[serde(default)]
    pub name_example: Option<String>,
    #[serde(default)]
    pub name_generated: NameGenerated,
    #[serde(default, skip_serializing)]
    pub name_generator: Option<String>,
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub change: bool,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub options: Vec<TypeOption>,
    #[serde(default)]
    pub logs: Vec<TypeLog>,
    #[serde(default)]
    pub actions: Vec<TypeAction>,
    #[serde(default)]
    pub favorites: Vec<TypeFavorite>,
    #[serde(default, skip_serializing)]
    pub details: Value,
}

/// A single role entry: a map of role-definition-key → template predicate.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Role(pub HashMap<String, String>);

/// `sets.<TypeName>.<SetName>` → template predicate.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Sets(pub HashMap<String, HashMap<String, String>>);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Specs {
    pub version: String,
    #[serde(default)]
    pub request: RequestSpec,
    pub types: Vec<Type>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub sets: Sets,
    pub schema: Value,
    /// The type selected for the current operation's `type_name`, if any.
    #[serde(skip)]
    pub r#type: Option<Type>,
}

// --- per-request operation model -------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Create,
    Change,
    Delete,
    Arbitrary,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityPayload {
    New {
        #[serde(default)]
        name: Option<String>,
        yaml: String,
    },
    Copy {
        #[serde(default)]
        name: Option<String>,
        copy: String,
    },
    Link {
        #[serde(default)]
        name: Option<String>,
        link: String,
    },
    Replace {
        name: String,
        yaml_old: String,
        yaml_new: String,
    },
    Update {
        name: String,
        data: Value,
    },
}

impl EntityPayload {
    pub fn name(&self) -> Option<&str> {
        match self {
            EntityPayload::New { name, .. } => name.as_deref(),
            EntityPayload::Copy { name, .. } => name.as_deref(),
            EntityPayload::Link { name, .. } => name.as_deref(),
            EntityPayload::Replace { name, .. } => Some(name),
            EntityPayload::Update { name, .. } => Some(name),
        }
    }
}

/// Raw per-request context needed to resolve `request.headers` (§4.6/props):
/// the client IP and every incoming `yac-*` header, keyed by its lowercased
/// wire name (e.g. `"yac-env"`), before pattern/default resolution.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub ip: String,
    pub headers: HashMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct OperationRequest {
    pub user: Option<User>,
    pub request: RequestContext,
    pub operation: Operation,
    pub type_name: String,
    pub name: Option<String>,
    pub actions: Vec<String>,
    pub entity: Option<EntityPayload>,
}

// --- internal entity representation -----------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Entity {
    pub name: Option<String>,
    pub exists: Option<bool>,
    pub is_link: Option<bool>,
    pub link: Option<String>,
    pub yaml: Option<String>,
    pub data: Option<Value>,
    pub perms: Option<Vec<Permission>>,
}

impl Entity {
    pub fn has_perm(&self, perm: &str) -> bool {
        self.perms
            .as_ref()
            .map(|p| p.iter().any(|x| x == perm))
            .unwrap_or(false)
    }
}

// --- output / view models ----------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Meta {
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Status {
    pub hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Diff {
    pub name: String,
    pub hash: String,
    pub patch: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Log {
    pub name: String,
    #[serde(default)]
    pub problem: bool,
    #[serde(default)]
    pub progress: Option<f64>,
    pub timestamp: String,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListedEntity {
    pub name: String,
    pub is_link: bool,
    pub link: Option<String>,
    pub perms: Vec<Permission>,
    pub options: HashMap<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityList {
    pub hash: String,
    pub list: Vec<ListedEntity>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationError {
    pub validator: String,
    pub message: String,
    pub schema_loc: String,
    pub data_loc: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaResult {
    pub schema: Value,
    pub ui_schema: Value,
    pub data: Value,
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<ValidationError>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetailedEntity {
    pub name: String,
    pub hash: String,
    pub is_link: bool,
    pub link: Option<String>,
    pub perms: Vec<Permission>,
    pub schema: SchemaResult,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationResult {
    pub operation: Operation,
    pub schema: SchemaResult,
    /// Whether the operation itself (names/permissions/conflicts/...) is
    /// valid, independent of the schema's own `valid` flag. `false` only
    /// when `raise_on_error=false` captured a validator failure instead of
    /// raising it.
    pub valid: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_payload_name_extraction() {
        let p = EntityPayload::Replace {
            name: "h1".into(),
            yaml_old: "a: 1\n".into(),
            yaml_new: "a: 2\n".into(),
        };
        assert_eq!(p.name(), Some("h1"));

        let p = EntityPayload::New { name: None, yaml: "---\n{}".into() };
        assert_eq!(p.name(), None);
        let p = EntityPayload::New { name: Some("h1".into()), yaml: "---\n{}".into() };
        assert_eq!(p.name(), Some("h1"));
    }

    #[test]
    fn entity_has_perm() {
        let e = Entity {
            perms: Some(vec!["see".into(), "edt".into()]),
            ..Default::default()
        };
        assert!(e.has_perm("edt"));
        assert!(!e.has_perm("del"));
    }
}
