//! Log retrieval dispatch (§4.11, supplemented), grounded on
//! `original_source/app/lib/log.py`: resolves each of a type's configured
//! `logs` entries to its plugin and collects the entries it reports.
//!
//! The retrieval plugins themselves (`file`, `elastic`) read from systems
//! outside this repo's scope, so no built-in plugin is registered; a
//! deployment wires its own `LogPlugin` implementations in before starting
//! the server.

use std::sync::Arc;

use yac_core::error::Result;
use yac_core::types::{Log, OperationRequest, Specs};
use yac_plugin::{Plugin, Registry};

#[async_trait::async_trait]
pub trait LogPlugin: Plugin {
    async fn get(&self, name: &str, problem: Option<&str>, progress: Option<&str>, details: &serde_json::Value, props: &serde_json::Value) -> Result<Vec<Log>>;
}

pub fn registry() -> Registry<dyn LogPlugin> {
    let plugins: Vec<Arc<dyn LogPlugin>> = vec![];
    Registry::new(plugins)
}

/// Collects every log entry reported by the resolved type's `logs` list.
/// A single misconfigured or unreachable log plugin is logged and skipped,
/// matching the original's `except LogError` behavior — one bad log source
/// should not sink the whole request.
pub async fn get(op: &OperationRequest, specs: &Specs, registry: &Registry<dyn LogPlugin>) -> Vec<Log> {
    let log_props = yac_core::props::get_log(op, &specs.request);
    let mut out = Vec::new();

    let Some(ty) = specs.r#type.as_ref() else { return out };
    for log_spec in &ty.logs {
        let plugin = match registry.get(&log_spec.plugin) {
            Some(p) => p,
            None => {
                tracing::error!("log plugin {} is not registered", log_spec.plugin);
                continue;
            }
        };
        match plugin
            .get(&log_spec.name, log_spec.problem.as_deref(), log_spec.progress.as_deref(), &log_spec.details, &log_props)
            .await
        {
            Ok(entries) => out.extend(entries),
            Err(e) => tracing::error!("log {} could not be loaded: {e}", log_spec.name),
        }
    }

    out
}
