//! HTTP handlers (§6.1), grounded on `agenticlaw-gateway/src/server.rs`'s
//! axum handler shape: thin glue between the wire and `orchestrator`,
//! responsible only for request extraction and status-code/content-type
//! framing.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::Query as QueryExtra;
use serde::Deserialize;

use yac_core::error::Error;
use yac_core::types::{EntityPayload, Meta, Operation, OperationRequest, RequestContext};

use crate::auth::AuthUser;
use crate::error_response::ApiError;
use crate::orchestrator;
use crate::state::AppState;

fn wrap(state: &AppState, e: Error) -> ApiError {
    ApiError::new(e, state.config.debug_mode)
}

/// Collects the caller's IP (from `ConnectInfo`, falling back to the
/// `X-Forwarded-For` head when present behind a proxy) and every
/// incoming header, keyed by its lowercased wire name, per §4.6.
fn request_context(addr: std::net::SocketAddr, headers: &HeaderMap) -> RequestContext {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string());

    let mut map = HashMap::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            map.insert(name.as_str().to_lowercase(), v.to_string());
        }
    }
    RequestContext { ip, headers: map }
}

fn check_type_name(type_name: &str) -> Result<(), Error> {
    if !yac_core::consts::TYPE_PATTERN.is_match(type_name) {
        return Err(Error::request("The given type is invalid"));
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), Error> {
    if !yac_core::consts::NAME_PATTERN.is_match(name) {
        return Err(Error::request("The given name is invalid"));
    }
    Ok(())
}

fn check_action(action: &str) -> Result<(), Error> {
    if !yac_core::consts::ACTION_PATTERN.is_match(action) {
        return Err(Error::request("The given action is invalid"));
    }
    Ok(())
}

/// `?msg=`/`?run=` query parameters shared by create/change/delete (§6.1):
/// `msg` becomes the commit message (defaulting per-operation), `run` is
/// threaded into `op.actions` so a caller can request non-`force` actions
/// alongside the mutation. `run` repeats as `?run=a&run=b`, matching the
/// original's `list[str]` query param; plain `axum::extract::Query` can't
/// deserialize repeated keys into a `Vec`, so this is extracted with
/// `axum_extra::extract::Query` below.
#[derive(Deserialize)]
pub struct MutationQuery {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    run: Vec<String>,
}

impl MutationQuery {
    fn resolve(self, default_msg: &str) -> Result<(String, Vec<String>), Error> {
        let msg = self.msg.unwrap_or_else(|| default_msg.to_string());
        if !yac_core::consts::MSG_PATTERN.is_match(&msg) {
            return Err(Error::request("The given msg is invalid"));
        }
        for action in &self.run {
            check_action(action)?;
        }
        Ok((msg, self.run))
    }
}

// --- §6.1 routes needing no authentication ----------------------------------------

pub async fn meta() -> impl IntoResponse {
    Json(Meta { version: yac_core::consts::VERSION.to_string() })
}

pub async fn health() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

// --- authenticated, type-independent routes ---------------------------------------

pub async fn me(AuthUser(user): AuthUser) -> impl IntoResponse {
    Json(user)
}

pub async fn status(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    orchestrator::status(&state).await.map(Json).map_err(|e| wrap(&state, e))
}

pub async fn list_types(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let op = OperationRequest {
        user: Some(user),
        request: request_context(addr, &headers),
        operation: Operation::Read,
        type_name: String::new(),
        name: None,
        actions: vec![],
        entity: None,
    };
    orchestrator::types(&state, op).await.map(Json).map_err(|e| wrap(&state, e))
}

// --- entity-list route --------------------------------------------------------------

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    skip: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn list_entities(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Path(type_name): Path<String>,
    Query(q): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    check_type_name(&type_name).map_err(|e| wrap(&state, e))?;
    if let Some(s) = &q.search {
        if !yac_core::consts::SEARCH_PATTERN.is_match(s) {
            return Err(wrap(&state, Error::request("The given search term is invalid")));
        }
    }
    let skip = q.skip.unwrap_or(0);
    let limit = match q.limit.unwrap_or(10000) {
        0 => return Err(wrap(&state, Error::request("limit must be greater than 0"))),
        n if n > 10000 => 10000,
        n => n,
    };

    let op = OperationRequest {
        user: Some(user),
        request: request_context(addr, &headers),
        operation: Operation::Read,
        type_name,
        name: None,
        actions: vec![],
        entity: None,
    };
    orchestrator::list(&state, op, q.search.as_deref(), skip, limit)
        .await
        .map(Json)
        .map_err(|e| wrap(&state, e))
}

// --- single-entity reads -------------------------------------------------------------

fn read_op(user: yac_core::types::User, request: RequestContext, type_name: String, name: String) -> Result<OperationRequest, Error> {
    check_type_name(&type_name)?;
    check_name(&name)?;
    Ok(OperationRequest {
        user: Some(user),
        request,
        operation: Operation::Read,
        type_name,
        name: Some(name),
        actions: vec![],
        entity: None,
    })
}

pub async fn detail(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Path((type_name, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let op = read_op(user, request_context(addr, &headers), type_name, name).map_err(|e| wrap(&state, e))?;
    orchestrator::detail(&state, op).await.map(Json).map_err(|e| wrap(&state, e))
}

pub async fn raw_yaml(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Path((type_name, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let op = read_op(user, request_context(addr, &headers), type_name, name).map_err(|e| wrap(&state, e))?;
    let yaml = orchestrator::raw_yaml(&state, op).await.map_err(|e| wrap(&state, e))?;
    Ok(([(axum::http::header::CONTENT_TYPE, "text/yaml")], yaml).into_response())
}

pub async fn logs(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Path((type_name, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let op = read_op(user, request_context(addr, &headers), type_name, name).map_err(|e| wrap(&state, e))?;
    orchestrator::logs(&state, op).await.map(Json).map_err(|e| wrap(&state, e))
}

// --- mutations ------------------------------------------------------------------------

pub async fn create(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Path(type_name): Path<String>,
    QueryExtra(q): QueryExtra<MutationQuery>,
    headers: HeaderMap,
    Json(entity): Json<EntityPayload>,
) -> Result<impl IntoResponse, ApiError> {
    check_type_name(&type_name).map_err(|e| wrap(&state, e))?;
    if let Some(n) = entity.name() {
        check_name(n).map_err(|e| wrap(&state, e))?;
    }
    let (msg, run) = q.resolve("Create").map_err(|e| wrap(&state, e))?;
    let op = OperationRequest {
        user: Some(user),
        request: request_context(addr, &headers),
        operation: Operation::Create,
        type_name,
        name: None,
        actions: run,
        entity: Some(entity),
    };
    let diff = orchestrator::create(&state, op, &msg).await.map_err(|e| wrap(&state, e))?;
    Ok((StatusCode::CREATED, Json(diff)))
}

pub async fn replace(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Path((type_name, name)): Path<(String, String)>,
    QueryExtra(q): QueryExtra<MutationQuery>,
    headers: HeaderMap,
    Json(entity): Json<EntityPayload>,
) -> Result<impl IntoResponse, ApiError> {
    change(state, user, addr, type_name, name, q, headers, entity).await
}

pub async fn patch(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Path((type_name, name)): Path<(String, String)>,
    QueryExtra(q): QueryExtra<MutationQuery>,
    headers: HeaderMap,
    Json(entity): Json<EntityPayload>,
) -> Result<impl IntoResponse, ApiError> {
    change(state, user, addr, type_name, name, q, headers, entity).await
}

async fn change(
    state: Arc<AppState>,
    user: yac_core::types::User,
    addr: std::net::SocketAddr,
    type_name: String,
    name: String,
    q: MutationQuery,
    headers: HeaderMap,
    entity: EntityPayload,
) -> Result<(StatusCode, Json<yac_core::types::Diff>), ApiError> {
    check_type_name(&type_name).map_err(|e| wrap(&state, e))?;
    check_name(&name).map_err(|e| wrap(&state, e))?;
    let (msg, run) = q.resolve("Change").map_err(|e| wrap(&state, e))?;
    let op = OperationRequest {
        user: Some(user),
        request: request_context(addr, &headers),
        operation: Operation::Change,
        type_name,
        name: Some(name),
        actions: run,
        entity: Some(entity),
    };
    let diff = orchestrator::change(&state, op, &msg).await.map_err(|e| wrap(&state, e))?;
    Ok((StatusCode::OK, Json(diff)))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Path((type_name, name)): Path<(String, String)>,
    QueryExtra(q): QueryExtra<MutationQuery>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    check_type_name(&type_name).map_err(|e| wrap(&state, e))?;
    check_name(&name).map_err(|e| wrap(&state, e))?;
    let (msg, run) = q.resolve("Delete").map_err(|e| wrap(&state, e))?;
    let op = OperationRequest {
        user: Some(user),
        request: request_context(addr, &headers),
        operation: Operation::Delete,
        type_name,
        name: Some(name),
        actions: run,
        entity: None,
    };
    orchestrator::delete(&state, op, &msg).await.map_err(|e| wrap(&state, e))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn run_action(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Path((type_name, name, action)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    check_type_name(&type_name).map_err(|e| wrap(&state, e))?;
    check_name(&name).map_err(|e| wrap(&state, e))?;
    check_action(&action).map_err(|e| wrap(&state, e))?;
    let op = OperationRequest {
        user: Some(user),
        request: request_context(addr, &headers),
        operation: Operation::Arbitrary,
        type_name,
        name: Some(name),
        actions: vec![action],
        entity: None,
    };
    orchestrator::run_action(&state, op).await.map_err(|e| wrap(&state, e))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ValidateBody {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    entity: Option<EntityPayload>,
}

pub async fn validate(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ValidateBody>,
) -> Result<impl IntoResponse, ApiError> {
    check_type_name(&body.type_name).map_err(|e| wrap(&state, e))?;
    if let Some(n) = &body.name {
        check_name(n).map_err(|e| wrap(&state, e))?;
    }
    let operation = match &body.entity {
        None => Operation::Read,
        Some(EntityPayload::Replace { .. }) | Some(EntityPayload::Update { .. }) => Operation::Change,
        Some(_) => Operation::Create,
    };
    let op = OperationRequest {
        user: Some(user),
        request: request_context(addr, &headers),
        operation,
        type_name: body.type_name,
        name: body.name,
        actions: vec![],
        entity: body.entity,
    };
    orchestrator::validate(&state, op).await.map(Json).map_err(|e| wrap(&state, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_type_name_with_slash() {
        assert!(check_type_name("a/b").is_err());
        assert!(check_type_name("host").is_ok());
    }

    #[test]
    fn rejects_action_with_invalid_chars() {
        assert!(check_action("re;boot").is_err());
        assert!(check_action("reboot").is_ok());
    }

    #[test]
    fn validate_body_infers_operation_from_payload_shape() {
        let body = ValidateBody { type_name: "host".into(), name: None, entity: None };
        assert!(body.entity.is_none());
    }
}
