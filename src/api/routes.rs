use axum::{
    routing::{get, patch, post, put},
    Router,
};

use crate::api::handlers::{self, AppState};
use crate::store::DefinitionStore;

pub fn create_router<S: DefinitionStore + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Universal dynamic dispatch
        .route(
            "/api/*path",
            get(handlers::dispatch_dynamic::<S>)
                .post(handlers::dispatch_dynamic::<S>)
                .put(handlers::dispatch_dynamic::<S>)
                .delete(handlers::dispatch_dynamic::<S>)
                .patch(handlers::dispatch_dynamic::<S>),
        )
        // Definition management
        .route(
            "/admin/routes",
            post(handlers::create_route::<S>).get(handlers::list_routes::<S>),
        )
        .route(
            "/admin/routes/:route_id",
            get(handlers::get_route::<S>).delete(handlers::delete_route::<S>),
        )
        .route(
            "/admin/routes/:route_id/status",
            patch(handlers::update_route_status::<S>),
        )
        .route(
            "/admin/routes/:route_id/versions",
            post(handlers::create_version::<S>).get(handlers::list_versions::<S>),
        )
        .route(
            "/admin/routes/:route_id/versions/:version_no",
            put(handlers::update_version::<S>).delete(handlers::delete_version::<S>),
        )
        .route(
            "/admin/routes/:route_id/versions/:version_no/activate",
            post(handlers::activate_version::<S>),
        )
        .route(
            "/admin/routes/:route_id/rollback/:version_no",
            post(handlers::rollback_version::<S>),
        )
        // Audit trail
        .route("/admin/audit", get(handlers::list_audit::<S>))
}
