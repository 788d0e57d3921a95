//! HTTP API (spec.md §6). Grounded on `gateway/src/api/mod.rs`'s router
//! assembly: routes, shared state, and a body-size ceiling on every endpoint
//! that isn't itself a content upload.

pub mod auth;
pub mod authz;
pub mod handlers;
pub mod model;
pub mod tls;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::registry::SiteRegistry;
use auth::BasicAuth;
use authz::Authorizer;

/// Request bodies above this size are rejected before a handler ever sees
/// them, for every route except the three that stream deployment content.
const SMALL_BODY_LIMIT: usize = 1024;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SiteRegistry>,
    pub authn: Arc<BasicAuth>,
    pub authz: Arc<Authorizer>,
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    let small_body = RequestBodyLimitLayer::new(SMALL_BODY_LIMIT);

    let small_body_routes = Router::new()
        .route(
            "/sites/:site/live",
            get(handlers::read_live).put(handlers::update_live),
        )
        .route(
            "/sites/:site/deployments",
            get(handlers::list_deployments).post(handlers::create_deployment),
        )
        .route(
            "/sites/:site/deployments/:id",
            get(handlers::read_deployment).delete(handlers::delete_deployment),
        )
        .route(
            "/sites/:site/deployments/:id/finish",
            post(handlers::finish_deployment),
        )
        .route_layer(small_body);

    let upload_routes = Router::new()
        .route("/sites/:site/deployments/:id/upload", post(handlers::upload))
        .route(
            "/sites/:site/deployments/:id/uploadTar",
            post(handlers::upload_tar),
        );

    Router::new()
        .merge(small_body_routes)
        .merge(upload_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
