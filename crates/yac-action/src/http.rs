//! HTTP(S) action plugin. Grounded on `original_source/app/plugin/action/http.py`.
//!
//! `details`: `method` (default `GET`), `url` (required, format-string),
//! `body` (jinja2 string, default `""`), `headers`, `timeout` (seconds,
//! default 5), `ssl_verify` (default true), `success`/`error` status-code
//! lists (default `[200..=226 success subset]`/`[]`).

use std::time::Duration;

use serde_json::Value;
use yac_core::error::{Error, Result};

use crate::{format::format_string, ActionPlugin};
use yac_plugin::Plugin;

const DEFAULT_SUCCESS: &[u16] = &[200, 201, 202, 203, 204, 205, 206, 207, 208, 226];

pub struct HttpAction;

impl Plugin for HttpAction {
    fn name(&self) -> &str {
        "http"
    }
}

#[async_trait::async_trait]
impl ActionPlugin for HttpAction {
    async fn run(&self, details: &Value, props: &Value) -> Result<()> {
        let url_template = details
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::action_specs("In HTTP action plugin details.url: required field is missing"))?;
        let url = format_string(url_template, props)
            .map_err(|e| Error::action_specs(format!("In HTTP action plugin details.url: {e}")))?;

        let body_template = details.get("body").and_then(Value::as_str).unwrap_or("\"\"");
        let body = yac_template::render_print(body_template, props, false)
            .map_err(|e| Error::action_specs(format!("In HTTP action plugin details.body: {e}")))?;

        let method = details.get("method").and_then(Value::as_str).unwrap_or("GET");
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| Error::action_specs(format!("In HTTP action plugin details.method: invalid method {method}")))?;

        let timeout_secs = details.get("timeout").and_then(Value::as_u64).unwrap_or(5);
        let ssl_verify = details.get("ssl_verify").and_then(Value::as_bool).unwrap_or(true);

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .danger_accept_invalid_certs(!ssl_verify);

        if let Some(headers) = details.get("headers").and_then(Value::as_object) {
            let mut header_map = reqwest::header::HeaderMap::new();
            for (k, v) in headers {
                if let (Ok(name), Some(val)) = (
                    reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                    v.as_str().and_then(|s| reqwest::header::HeaderValue::from_str(s).ok()),
                ) {
                    header_map.insert(name, val);
                }
            }
            builder = builder.default_headers(header_map);
        }

        let client = builder
            .build()
            .map_err(|e| Error::action(format!("Could not build HTTP client: {e}")))?;

        let response = client
            .request(method, &url)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::action(format!("Could not run HTTP request: {e}")))?;

        let status = response.status().as_u16();
        let success: Vec<u16> = details
            .get("success")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_u64()).map(|n| n as u16).collect())
            .unwrap_or_else(|| DEFAULT_SUCCESS.to_vec());
        if success.contains(&status) {
            return Ok(());
        }

        let error_codes: Vec<u16> = details
            .get("error")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_u64()).map(|n| n as u16).collect())
            .unwrap_or_default();
        let text = response.text().await.unwrap_or_default();
        if error_codes.contains(&status) {
            return Err(Error::action_client(text));
        }
        Err(Error::action(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn rejects_missing_url() {
        let err = HttpAction.run(&json!({}), &json!({})).await.unwrap_err();
        assert_eq!(err.code(), 500);
    }

    #[tokio::test]
    async fn rejects_unresolved_url_placeholder() {
        let err = HttpAction
            .run(&json!({"url": "http://{missing.field}"}), &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), 500);
    }
}
