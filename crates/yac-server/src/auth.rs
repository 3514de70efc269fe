//! Bearer-ID-token authentication (§6.3/C11 boundary), grounded on
//! `original_source/app/lib/auth.py`: the signature-verification step against
//! a live OIDC discovery document is the genuinely external collaborator
//! (§1 Out of scope), isolated behind the `Verifier` trait; claim extraction
//! and the `oidc_jwt_*` format-string/fallback logic are this service's own
//! and implemented in full.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use yac_core::config::OidcConfig;
use yac_core::error::{Error, Result};
use yac_core::types::User;

use crate::state::AppState;

/// Verifies a raw bearer token and returns its claims as a flat JSON object.
/// The concrete `OidcVerifier` below resolves the signing key from the
/// provider's discovery document; tests substitute a stub.
#[async_trait::async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<serde_json::Map<String, Value>>;
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
    #[serde(default)]
    issuer: String,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

struct CachedJwks {
    fetched_at: Instant,
    keys: HashMap<String, Jwk>,
    #[allow(dead_code)]
    issuer: String,
}

const JWKS_CACHE_TTL: Duration = Duration::from_secs(600);

/// Fetches and caches the provider's discovery document + JSON Web Key
/// Set, and verifies RS256-signed ID tokens against it.
pub struct OidcVerifier {
    discovery_url: String,
    client: reqwest::Client,
    cache: RwLock<Option<CachedJwks>>,
}

impl OidcVerifier {
    pub fn new(discovery_url: impl Into<String>) -> Self {
        Self {
            discovery_url: discovery_url.into(),
            client: reqwest::Client::new(),
            cache: RwLock::new(None),
        }
    }

    async fn fetch_jwks(&self) -> Result<HashMap<String, Jwk>> {
        let doc: DiscoveryDocument = self
            .client
            .get(&self.discovery_url)
            .send()
            .await
            .map_err(|e| Error::auth(format!("could not reach OIDC discovery endpoint: {e}")))?
            .json()
            .await
            .map_err(|e| Error::auth(format!("invalid OIDC discovery document: {e}")))?;

        let jwks: JwkSet = self
            .client
            .get(&doc.jwks_uri)
            .send()
            .await
            .map_err(|e| Error::auth(format!("could not fetch JWKS: {e}")))?
            .json()
            .await
            .map_err(|e| Error::auth(format!("invalid JWKS document: {e}")))?;

        let keys = jwks.keys.into_iter().map(|k| (k.kid.clone(), k)).collect();

        let mut guard = self.cache.write().await;
        *guard = Some(CachedJwks { fetched_at: Instant::now(), keys: HashMap::new(), issuer: doc.issuer.clone() });
        // Re-borrow to set keys after construction (avoids cloning Jwk twice).
        if let Some(cached) = guard.as_mut() {
            cached.keys = keys.clone();
        }
        Ok(keys)
    }

    async fn keys(&self) -> Result<HashMap<String, Jwk>> {
        {
            let guard = self.cache.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed() < JWKS_CACHE_TTL {
                    return Ok(cached.keys.iter().map(|(k, v)| (k.clone(), Jwk { kid: v.kid.clone(), n: v.n.clone(), e: v.e.clone() })).collect());
                }
            }
        }
        self.fetch_jwks().await
    }
}

#[async_trait::async_trait]
impl Verifier for OidcVerifier {
    async fn verify(&self, token: &str) -> Result<serde_json::Map<String, Value>> {
        let header = decode_header(token).map_err(|e| Error::auth(format!("malformed token: {e}")))?;
        let kid = header.kid.ok_or_else(|| Error::auth("token header is missing a key id"))?;

        let keys = self.keys().await?;
        let jwk = keys.get(&kid).ok_or_else(|| Error::auth("token key id is not known to the provider"))?;

        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| Error::auth(format!("invalid signing key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;

        let token_data = decode::<serde_json::Map<String, Value>>(token, &decoding_key, &validation)
            .map_err(|e| Error::auth(format!("token could not be validated: {e}")))?;

        Ok(token_data.claims)
    }
}

fn claim_string(claims: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    claims.get(key).map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([a-zA-Z0-9_]+)\}").unwrap());

/// `str.format(**claims)`-alike: every `{key}` must resolve to a non-empty
/// claim or the whole format fails (triggering the caller's fallback),
/// mirroring the original's `KeyError`-on-missing-or-empty semantics.
fn format_claims(fmt: &str, claims: &serde_json::Map<String, Value>) -> std::result::Result<String, ()> {
    let mut missing = false;
    let result = PLACEHOLDER.replace_all(fmt, |caps: &regex::Captures| match claim_string(claims, &caps[1]) {
        Some(v) => v,
        None => {
            missing = true;
            String::new()
        }
    });
    if missing || result.is_empty() {
        Err(())
    } else {
        Ok(result.into_owned())
    }
}

fn format_with_fallback(primary: &str, fallback: &str, claims: &serde_json::Map<String, Value>) -> Result<String> {
    format_claims(primary, claims)
        .or_else(|_| format_claims(fallback, claims))
        .map_err(|_| Error::auth("required claims for user identity are missing"))
}

/// Builds a `User` from validated claims per `oidc_jwt_*`/`*_fallback`.
pub fn user_from_claims(cfg: &OidcConfig, claims: &serde_json::Map<String, Value>) -> Result<User> {
    if let Some(aud) = claims.get("aud") {
        let matches = match aud {
            Value::String(s) => cfg.client_ids.iter().any(|id| id == s),
            Value::Array(items) => items.iter().any(|v| v.as_str().map(|s| cfg.client_ids.iter().any(|id| id == s)).unwrap_or(false)),
            _ => false,
        };
        if !matches {
            return Err(Error::auth(format!("\"{aud}\" is not an accepted client_id")));
        }
    } else {
        return Err(Error::auth("token has no aud claim"));
    }

    let name = format_claims(&cfg.jwt_name, claims).map_err(|_| Error::auth("token has no usable name claim"))?;
    let full_name = format_with_fallback(&cfg.jwt_full_name, &cfg.jwt_full_name_fallback, claims)?;
    let email = format_with_fallback(&cfg.jwt_email, &cfg.jwt_email_fallback, claims)?;

    Ok(User { name, full_name, email, token: serde_json::to_string(claims).unwrap_or_default() })
}

/// An authenticated caller, extracted from the `Authorization` header.
pub struct AuthUser(pub User);

fn strip_bearer(raw: &str) -> &str {
    raw.strip_prefix("Bearer ").unwrap_or(raw)
}

#[async_trait::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = crate::error_response::ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> std::result::Result<Self, Self::Rejection> {
        let debug_mode = state.config.debug_mode;
        let wrap = |e: Error| crate::error_response::ApiError::new(e, debug_mode);

        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| wrap(Error::auth("no Authorization header supplied")))?;

        let token = strip_bearer(header);
        let claims = state.verifier.verify(token).await.map_err(wrap)?;
        let user = user_from_claims(&state.config.oidc, &claims).map_err(wrap)?;
        Ok(AuthUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(pairs: &[(&str, &str)]) -> serde_json::Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), Value::String(v.to_string()))).collect()
    }

    #[test]
    fn format_claims_substitutes_and_rejects_missing() {
        let c = claims(&[("name", "bob")]);
        assert_eq!(format_claims("{name}", &c).unwrap(), "bob");
        assert!(format_claims("{surname}", &c).is_err());
    }

    #[test]
    fn user_from_claims_uses_fallback_on_missing_fullname() {
        let cfg = OidcConfig {
            url: String::new(),
            client_ids: vec!["yac".to_string()],
            jwt_name: "{name}".to_string(),
            jwt_full_name: "{givenName} {surname}".to_string(),
            jwt_full_name_fallback: "{name}".to_string(),
            jwt_email: "{mail}".to_string(),
            jwt_email_fallback: "{name}@localhost".to_string(),
        };
        let mut c = claims(&[("name", "bob"), ("aud", "yac")]);
        c.insert("aud".to_string(), Value::String("yac".to_string()));
        let user = user_from_claims(&cfg, &c).unwrap();
        assert_eq!(user.full_name, "bob");
        assert_eq!(user.email, "bob@localhost");
    }

    #[test]
    fn user_from_claims_rejects_unknown_audience() {
        let cfg = OidcConfig {
            url: String::new(),
            client_ids: vec!["yac".to_string()],
            jwt_name: "{name}".to_string(),
            jwt_full_name: "{name}".to_string(),
            jwt_full_name_fallback: "{name}".to_string(),
            jwt_email: "{name}@localhost".to_string(),
            jwt_email_fallback: "{name}@localhost".to_string(),
        };
        let c = claims(&[("name", "bob"), ("aud", "someone-else")]);
        let err = user_from_claims(&cfg, &c).unwrap_err();
        assert_eq!(err.code(), 401);
    }
}
