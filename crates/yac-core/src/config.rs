//! Environment configuration (§6.2). No layered config-file support beyond
//! the `specs` key itself — the teacher has no settings crate in its
//! dependency graph, so this follows its `std::env::var` + fallback-chain
//! convention directly instead of pulling in one.

use std::collections::HashMap;
use std::env;

fn env_var(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Clone, Debug)]
pub struct RepoConfig {
    pub url: String,
    pub branch: String,
    pub ssh_key_file: String,
    pub ssh_known_hosts_file: String,
    pub dirty_max_age_minutes: u64,
}

impl RepoConfig {
    fn from_env() -> Self {
        Self {
            url: env_var("YAC_REPO__URL", ""),
            branch: env_var("YAC_REPO__BRANCH", "main"),
            ssh_key_file: env_var("YAC_REPO__SSH_KEY_FILE", "/root/.ssh/id_rsa"),
            ssh_known_hosts_file: env_var(
                "YAC_REPO__SSH_KNOWN_HOSTS_FILE",
                "/root/.ssh/known_hosts",
            ),
            dirty_max_age_minutes: env_var("YAC_REPO__DIRTY_MAX_AGE", "0")
                .parse()
                .unwrap_or(0),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OidcConfig {
    pub url: String,
    pub client_ids: Vec<String>,
    pub jwt_name: String,
    pub jwt_full_name: String,
    pub jwt_full_name_fallback: String,
    pub jwt_email: String,
    pub jwt_email_fallback: String,
}

impl OidcConfig {
    fn from_env() -> Self {
        let client_ids = env_var("YAC_OIDC_CLIENT_IDS", "")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self {
            url: env_var(
                "YAC_OIDC_URL",
                "https://localhost/.well-known/openid-configuration",
            ),
            client_ids,
            jwt_name: env_var("YAC_OIDC_JWT_NAME", "{name}"),
            jwt_full_name: env_var("YAC_OIDC_JWT_FULL_NAME", "{givenName} {surname}"),
            jwt_full_name_fallback: env_var("YAC_OIDC_JWT_FULL_NAME_FALLBACK", "{name}"),
            jwt_email: env_var("YAC_OIDC_JWT_EMAIL", "{mail}"),
            jwt_email_fallback: env_var("YAC_OIDC_JWT_EMAIL_FALLBACK", "{name}@localhost"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub root_path: String,
    pub cors_origins: Vec<String>,
    pub log_level: String,
    pub debug_mode: bool,
    pub repo_plugin: String,
    pub repo: RepoConfig,
    pub oidc: OidcConfig,
    /// `.`-prefixed means inside the repo; otherwise a local file path.
    pub specs: String,
    /// Custom pass-through variables, available in templates as `env`.
    pub env: HashMap<String, String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            root_path: env_var("YAC_ROOT_PATH", "/"),
            cors_origins: env_var("YAC_CORS_ORIGINS", "https://localhost")
                .split(',')
                .map(|s| s.to_string())
                .collect(),
            log_level: env_var("YAC_LOG_LEVEL", "info"),
            debug_mode: env_var("YAC_DEBUG_MODE", "false") == "true",
            repo_plugin: env_var("YAC_REPO_PLUGIN", "git_direct"),
            repo: RepoConfig::from_env(),
            oidc: OidcConfig::from_env(),
            specs: env_var("YAC_SPECS", "./yac.yml"),
            env: Self::custom_env(),
        }
    }

    /// `YAC_ENV__<KEY>` variables are collected into the `env` pass-through
    /// map, lowercased, available to templates as `env.<key>`.
    fn custom_env() -> HashMap<String, String> {
        env::vars()
            .filter_map(|(k, v)| {
                k.strip_prefix("YAC_ENV__")
                    .map(|rest| (rest.to_lowercase(), v))
            })
            .collect()
    }

    pub fn in_repo_specs(&self) -> bool {
        self.specs.starts_with('.')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_repo_detection() {
        let mut cfg = Config::from_env();
        cfg.specs = "./yac.yml".into();
        assert!(cfg.in_repo_specs());
        cfg.specs = "/etc/yac.yml".into();
        assert!(!cfg.in_repo_specs());
    }
}
