use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use tdb_protocol::Verb;

use crate::{admin, api, AppState};

pub(crate) mod paths {
    pub const HEALTHZ: &str = "/healthz";
    pub const ADMIN_TENANTS: &str = "/admin/tenants";
    pub const ADMIN_TENANT: &str = "/admin/tenants/{name}";
    pub const ADMIN_TENANT_TOKENS: &str = "/admin/tenants/{name}/tokens";
    pub const ADMIN_TENANT_MIGRATE: &str = "/admin/tenants/{name}/migrate";
    pub const ADMIN_TOKEN_REVOKE: &str = "/admin/tokens/{id}/revoke";
}

pub(crate) fn build_router() -> Router<AppState> {
    let mut router = Router::new().route(paths::HEALTHZ, get(admin::healthz));
    for verb in Verb::ALL {
        router = router.route(
            verb.path(),
            post(
                move |State(state): State<AppState>, headers: HeaderMap, body: Bytes| async move {
                    api::rpc(state, verb, headers, body).await
                },
            ),
        );
    }
    router
        .route(
            paths::ADMIN_TENANTS,
            get(admin::list_tenants).post(admin::create_tenant),
        )
        .route(
            paths::ADMIN_TENANT,
            get(admin::get_tenant).delete(admin::delete_tenant),
        )
        .route(paths::ADMIN_TENANT_TOKENS, post(admin::issue_token))
        .route(paths::ADMIN_TENANT_MIGRATE, post(admin::migrate_tenant))
        .route(paths::ADMIN_TOKEN_REVOKE, post(admin::revoke_token))
}
