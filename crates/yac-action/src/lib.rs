//! Action dispatch (§4.10/C10), grounded on `original_source/app/lib/action.py`:
//! for a given hook, runs every requested (or force-bound) action defined on
//! the resolved type through its configured plugin.

mod format;
pub mod http;
pub mod shell;

use std::sync::Arc;

use yac_core::error::{Error, Result};
use yac_core::types::{OperationRequest, Specs, TypeActionHook};
use yac_plugin::{Plugin, Registry};

/// An action plugin runs one configured action against the props built for
/// the current operation. `details` is the action's own free-form config
/// (`type.actions[].details`); `props` is `yac_core::props::get_action`'s
/// output.
#[async_trait::async_trait]
pub trait ActionPlugin: Plugin {
    async fn run(&self, details: &serde_json::Value, props: &serde_json::Value) -> Result<()>;
}

pub fn registry() -> Result<Registry<dyn ActionPlugin>> {
    let plugins: Vec<Arc<dyn ActionPlugin>> = vec![Arc::new(http::HttpAction), Arc::new(shell::ShellAction)];
    let reg = Registry::new(plugins);
    reg.require("action", &["http", "shell"])?;
    Ok(reg)
}

/// Runs every action on the resolved type that is hooked to `hook` and
/// either was explicitly requested in `op.actions` or is `force`d (force is
/// bypassed on the `arbitrary` hook, which only ever runs explicitly
/// requested actions — that gate is enforced upstream by yac-validator's
/// actions tester, not re-checked here).
pub async fn run_hook(hook: TypeActionHook, op: &OperationRequest, specs: &Specs, registry: &Registry<dyn ActionPlugin>) -> Result<()> {
    let action_props = yac_core::props::get_action(op, &specs.request);
    let actions = specs.r#type.as_ref().map(|t| t.actions.as_slice()).unwrap_or(&[]);

    for action in actions {
        let requested = op.actions.iter().any(|a| a == &action.name);
        if !requested && (!action.force || hook == TypeActionHook::Arbitrary) {
            continue;
        }
        if !action.hooks.contains(&hook) {
            continue;
        }

        let plugin = registry
            .get(&action.plugin)
            .ok_or_else(|| Error::action_specs(format!("Action plugin {} is not defined", action.plugin)))?;

        tracing::debug!("running action {} via plugin {}", action.name, action.plugin);
        match plugin.run(&action.details, &action_props).await {
            Ok(()) => {}
            Err(Error::ActionClient(msg)) => return Err(Error::action_client(msg)),
            Err(Error::Action(msg)) => {
                let entity_name = op.name.as_deref().unwrap_or("(unknown name)");
                return Err(Error::action(format!(
                    "Action {} for {} \"{entity_name}\" failed with: {msg}",
                    action.name, op.type_name
                )));
            }
            Err(other) => return Err(other),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use yac_core::types::{RequestContext, RequestSpec, Type, TypeAction, NameGenerated};

    fn make_specs(action: TypeAction) -> Specs {
        let ty = Type {
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
            actions: vec![action],
            favorites: vec![],
            details: serde_json::json!({}),
        };
        Specs {
            version: "1.0".into(),
            request: RequestSpec::default(),
            types: vec![ty.clone()],
            roles: vec![],
            sets: Default::default(),
            schema: serde_json::json!({}),
            r#type: Some(ty),
        }
    }

    fn op_with_actions(actions: Vec<String>) -> OperationRequest {
        OperationRequest {
            user: None,
            request: RequestContext::default(),
            operation: yac_core::types::Operation::Arbitrary,
            type_name: "host".into(),
            name: Some("h1".into()),
            actions,
            entity: None,
        }
    }

    #[tokio::test]
    async fn unrequested_non_forced_action_is_skipped() {
        let action = TypeAction {
            name: "install".into(),
            perms: vec!["act".into()],
            force: false,
            hooks: vec![TypeActionHook::Arbitrary],
            plugin: "shell".into(),
            details: serde_json::json!({"command": "exit 1"}),
        };
        let specs = make_specs(action);
        let op = op_with_actions(vec![]);
        let reg = registry().unwrap();
        assert!(run_hook(TypeActionHook::Arbitrary, &op, &specs, &reg).await.is_ok());
    }

    #[tokio::test]
    async fn requested_action_runs_and_reports_failure() {
        let action = TypeAction {
            name: "install".into(),
            perms: vec!["act".into()],
            force: false,
            hooks: vec![TypeActionHook::Arbitrary],
            plugin: "shell".into(),
            details: serde_json::json!({"command": "exit 1"}),
        };
        let specs = make_specs(action);
        let op = op_with_actions(vec!["install".into()]);
        let reg = registry().unwrap();
        let err = run_hook(TypeActionHook::Arbitrary, &op, &specs, &reg).await.unwrap_err();
        assert_eq!(err.code(), 500);
        assert!(err.to_string().contains("install"));
    }

    #[tokio::test]
    async fn missing_plugin_is_a_specs_error() {
        let action = TypeAction {
            name: "install".into(),
            perms: vec!["act".into()],
            force: false,
            hooks: vec![TypeActionHook::Arbitrary],
            plugin: "nonexistent".into(),
            details: serde_json::json!({}),
        };
        let specs = make_specs(action);
        let op = op_with_actions(vec!["install".into()]);
        let reg = registry().unwrap();
        let err = run_hook(TypeActionHook::Arbitrary, &op, &specs, &reg).await.unwrap_err();
        assert_eq!(err.code(), 500);
    }
}
