//! Provisioning surface behind `Authorization: Bearer <TDB_ADMIN_TOKEN>`.
//! Disabled (always 401) when no admin token is configured.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tdb_kernel::{validate_tenant_name, CatalogConflict, TenantRecord};
use tdb_migrate::{MigrateError, MigrationDir};
use tdb_protocol::RpcError;
use tdb_token::constant_time_eq;
use tracing::{info, warn};

use crate::responses;
use crate::AppState;

pub(crate) async fn healthz() -> impl IntoResponse {
    Json(json!({"ok": true}))
}

fn admin_ok(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.admin_token() else {
        return false;
    };
    let Some(presented) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };
    constant_time_eq(presented.trim().as_bytes(), expected.as_bytes())
}

/// Empty bodies decode as `T::default()`.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        responses::problem(StatusCode::BAD_REQUEST, "invalid_body", e.to_string())
    })
}

/// Live (not soft-deleted) tenant or a 404 response.
async fn live_tenant(state: &AppState, name: &str) -> Result<TenantRecord, Response> {
    match state.catalog().get_async(name).await {
        Ok(Some(rec)) if rec.deleted_at.is_none() => Ok(rec),
        Ok(_) => Err(responses::not_found(format!("tenant {name:?} not found"))),
        Err(err) => Err(responses::internal(err)),
    }
}

/// Lifecycle conflicts become 409; anything else is internal.
fn catalog_failure(err: anyhow::Error) -> Response {
    match err.downcast_ref::<CatalogConflict>() {
        Some(conflict @ CatalogConflict::Deleted(_)) => {
            responses::problem(StatusCode::CONFLICT, "tenant_deleted", conflict.to_string())
        }
        Some(conflict @ CatalogConflict::Inactive(_)) => {
            responses::problem(StatusCode::CONFLICT, "tenant_inactive", conflict.to_string())
        }
        None => responses::internal(err),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CreateTenant {
    #[serde(default)]
    name: String,
    #[serde(default)]
    label: Option<String>,
}

pub(crate) async fn create_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !admin_ok(&state, &headers) {
        return responses::unauthorized();
    }
    let req: CreateTenant = match parse_body(&body) {
        Ok(req) => req,
        Err(res) => return res,
    };
    if let Err(err) = validate_tenant_name(&req.name) {
        return responses::problem(StatusCode::BAD_REQUEST, "invalid_tenant", err.to_string());
    }
    let (mut tenant, created) = match state.catalog().ensure_tenant_async(&req.name).await {
        Ok(found) => found,
        Err(err) => return catalog_failure(err),
    };
    if let Some(label) = req.label.as_deref().filter(|l| !l.trim().is_empty()) {
        tenant = match state.catalog().rename_async(&req.name, label).await {
            Ok(tenant) => tenant,
            Err(err) => return responses::internal(err),
        };
    }
    let token = match state
        .catalog()
        .issue_token_async(&req.name, state.secret(), state.token_ttl())
        .await
    {
        Ok(token) => token,
        Err(err) => return catalog_failure(err),
    };
    info!(target: "tdb::admin", tenant = %tenant.name, actor = %tenant.actor_id, created, "tenant provisioned");
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (status, Json(json!({"tenant": tenant, "token": token}))).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListParams {
    #[serde(default)]
    include_deleted: bool,
}

pub(crate) async fn list_tenants(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Response {
    if !admin_ok(&state, &headers) {
        return responses::unauthorized();
    }
    match state.catalog().list_async(params.include_deleted).await {
        Ok(items) => Json(json!({"items": items})).into_response(),
        Err(err) => responses::internal(err),
    }
}

pub(crate) async fn get_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if !admin_ok(&state, &headers) {
        return responses::unauthorized();
    }
    let tenant = match state.catalog().get_async(&name).await {
        Ok(Some(tenant)) => tenant,
        Ok(None) => return responses::not_found(format!("tenant {name:?} not found")),
        Err(err) => return responses::internal(err),
    };
    match state.catalog().active_token_async(&name).await {
        Ok(active) => Json(json!({"tenant": tenant, "active_token": active})).into_response(),
        Err(err) => responses::internal(err),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct IssueToken {
    #[serde(default)]
    ttl_secs: Option<u64>,
}

pub(crate) async fn issue_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    if !admin_ok(&state, &headers) {
        return responses::unauthorized();
    }
    let req: IssueToken = match parse_body(&body) {
        Ok(req) => req,
        Err(res) => return res,
    };
    if let Err(res) = live_tenant(&state, &name).await {
        return res;
    }
    let ttl = req
        .ttl_secs
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| state.token_ttl());
    match state
        .catalog()
        .issue_token_async(&name, state.secret(), ttl)
        .await
    {
        Ok(token) => {
            info!(target: "tdb::admin", tenant = %name, token_id = %token.id, "token issued");
            (StatusCode::CREATED, Json(json!({"token": token}))).into_response()
        }
        Err(err) => catalog_failure(err),
    }
}

pub(crate) async fn revoke_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !admin_ok(&state, &headers) {
        return responses::unauthorized();
    }
    match state.catalog().revoke_token_async(&id).await {
        Ok(true) => {
            info!(target: "tdb::admin", token_id = %id, "token revoked");
            Json(json!({"id": id, "revoked": true})).into_response()
        }
        Ok(false) => responses::not_found(format!("no active token {id:?}")),
        Err(err) => responses::internal(err),
    }
}

pub(crate) async fn delete_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if !admin_ok(&state, &headers) {
        return responses::unauthorized();
    }
    if let Err(res) = live_tenant(&state, &name).await {
        return res;
    }
    match state.catalog().soft_delete_async(&name).await {
        Ok(tenant) => {
            info!(target: "tdb::admin", tenant = %name, "tenant soft-deleted");
            Json(json!({"tenant": tenant})).into_response()
        }
        Err(err) => responses::internal(err),
    }
}

/// Apply the configured journal to one tenant and record the outcome in
/// the catalog.
pub(crate) async fn migrate_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if !admin_ok(&state, &headers) {
        return responses::unauthorized();
    }
    let Some(root) = state.migrations_dir().cloned() else {
        return responses::problem(
            StatusCode::NOT_IMPLEMENTED,
            "migrations_unconfigured",
            "Operation requires TDB_MIGRATIONS_DIR",
        );
    };
    if let Err(res) = live_tenant(&state, &name).await {
        return res;
    }
    let loaded = tokio::task::spawn_blocking(move || MigrationDir::new(root).load_migrations()).await;
    let migrations = match loaded {
        Ok(Ok(migrations)) => migrations,
        Ok(Err(err)) => return responses::internal(err),
        Err(err) => return responses::internal(format!("join error: {err}")),
    };

    let client = state.stub().tenant(name.clone());
    let now_ms = state.clock().now_ms() as i64;
    match tdb_migrate::apply(&client, &migrations, now_ms).await {
        Ok(report) => {
            let tenant = match state
                .catalog()
                .set_schema_version_async(&name, report.schema_version)
                .await
            {
                Ok(tenant) => tenant,
                Err(err) => return responses::internal(err),
            };
            info!(
                target: "tdb::admin",
                tenant = %name,
                applied = report.applied.len(),
                skipped = report.skipped,
                schema_version = report.schema_version,
                "migrations applied"
            );
            responses::with_bookmark(
                Json(json!({
                    "tenant": tenant,
                    "applied": report.applied,
                    "skipped": report.skipped,
                    "schema_version": report.schema_version,
                }))
                .into_response(),
                client.bookmark().as_deref(),
            )
        }
        Err(err) => {
            if let Err(flag_err) = state.catalog().mark_needs_update_async(&name, true).await {
                warn!(target: "tdb::admin", tenant = %name, error = %flag_err, "failed to flag tenant for update");
            }
            warn!(target: "tdb::admin", tenant = %name, failed_tag = ?err.failed_tag(), error = %err, "migration run failed");
            let status = match &err {
                MigrateError::Apply {
                    source: RpcError::Transient(_),
                    ..
                } => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::CONFLICT,
            };
            responses::problem(status, "migration_failed", err.to_string())
        }
    }
}
