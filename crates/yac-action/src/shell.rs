//! Shell action plugin. Grounded on `original_source/app/plugin/action/shell.py`.
//!
//! `details`: `command` (required, format-string), `success` (default
//! `[0]`), `error` (default `[]`) exit-code lists. Every prop is also
//! flattened into `YAC__...` environment variables, same convention as
//! `yac_template::builtins::to_consts`.

use serde_json::Value;
use std::collections::HashMap;
use tokio::process::Command;
use yac_core::error::{Error, Result};

use crate::{format::format_string, ActionPlugin};
use yac_plugin::Plugin;

const PASSTHROUGH_ENV: &[&str] = &["PATH", "HOME", "HOSTNAME", "PWD", "LANG"];

pub struct ShellAction;

impl Plugin for ShellAction {
    fn name(&self) -> &str {
        "shell"
    }
}

#[async_trait::async_trait]
impl ActionPlugin for ShellAction {
    async fn run(&self, details: &Value, props: &Value) -> Result<()> {
        let command_template = details
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::action_specs("In shell action plugin details.command: required field is missing"))?;
        let command = format_string(command_template, props)
            .map_err(|e| Error::action_specs(format!("In shell action plugin details.command: {e}")))?;

        let env = build_env(props);

        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .env_clear()
            .envs(env)
            .output()
            .await
            .map_err(|e| Error::action(format!("Shell command failed with: {e}")))?;

        let code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        let success: Vec<i64> = details
            .get("success")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_else(|| vec![0]);
        if success.contains(&(code as i64)) {
            return Ok(());
        }

        let error_codes: Vec<i64> = details
            .get("error")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();
        if error_codes.contains(&(code as i64)) {
            return Err(Error::action_client(stdout));
        }
        Err(Error::action(stdout))
    }
}

fn build_env(props: &Value) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for key in PASSTHROUGH_ENV {
        if let Ok(v) = std::env::var(key) {
            env.insert(key.to_string(), v);
        }
    }
    dict_to_env(props, "YAC", &mut env);
    env
}

fn dict_to_env(value: &Value, prefix: &str, out: &mut HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                dict_to_env(v, &format!("{prefix}__{}", to_shell_var(k)), out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                dict_to_env(v, &format!("{prefix}__{}", to_shell_var(&i.to_string())), out);
            }
        }
        Value::Bool(b) => {
            out.insert(prefix.to_string(), if *b { "true".into() } else { "false".into() });
        }
        Value::Null => {
            out.insert(prefix.to_string(), String::new());
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

fn to_shell_var(s: &str) -> String {
    s.chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn runs_successful_command() {
        let result = ShellAction.run(&json!({"command": "exit 0"}), &json!({})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn nonzero_exit_not_in_success_or_error_is_server_error() {
        let err = ShellAction.run(&json!({"command": "exit 7"}), &json!({})).await.unwrap_err();
        assert_eq!(err.code(), 500);
    }

    #[tokio::test]
    async fn exit_code_in_error_list_is_client_error() {
        let err = ShellAction
            .run(&json!({"command": "exit 3", "error": [3]}), &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn dict_to_env_flattens_nested_values() {
        let mut out = HashMap::new();
        dict_to_env(&json!({"old": {"name": "h1"}}), "YAC", &mut out);
        assert_eq!(out.get("YAC__OLD__NAME"), Some(&"h1".to_string()));
    }
}
