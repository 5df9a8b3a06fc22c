//! HTTP surface of an Orb node: CAS retrieval, Sidetree operation intake
//! and resolution, the ActivityPub service endpoints, witness-log
//! administration and the node healthcheck.

mod handlers;
mod state;

pub use state::{AppState, HttpConfig};

use axum::routing::{get, post};
use axum::Router;
use orb_db::Store;
use orb_op_decorator::OriginResolver;
use orb_op_queue::PubSub;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the node's router.
pub fn router<DB, P, R>(state: Arc<AppState<DB, P, R>>) -> Router
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    Router::new()
        .route("/cas/:hash", get(handlers::get_cas))
        .route("/sidetree/operations", post(handlers::post_operation))
        .route("/sidetree/identifiers/:did", get(handlers::resolve_did))
        .route("/services/:actor", get(handlers::get_actor))
        .route(
            "/services/:actor/inbox",
            get(handlers::get_inbox).post(handlers::post_inbox),
        )
        .route("/services/:actor/outbox", get(handlers::get_outbox))
        .route(
            "/services/:actor/:collection",
            get(handlers::get_collection),
        )
        .route("/log", get(handlers::get_log).post(handlers::post_log))
        .route(
            "/log-monitor",
            get(handlers::get_log_monitor).post(handlers::post_log_monitor),
        )
        .route("/healthcheck", get(handlers::healthcheck))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
