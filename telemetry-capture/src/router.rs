use std::future::ready;
use std::sync::Arc;

use axum::http::Method;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::endpoints;
use crate::prometheus::{setup_metrics_recorder, track_metrics};
use crate::reconcile::Reconciler;
use crate::store::{DynEventStore, EventStore};
use crate::time::TimeSource;

#[derive(Clone)]
pub struct State {
    pub reconciler: Arc<Reconciler>,
    pub store: DynEventStore,
}

async fn index() -> &'static str {
    "telemetry-capture"
}

pub fn router<TZ, S>(timesource: TZ, store: S, max_attempts: u32, metrics: bool) -> Router
where
    TZ: TimeSource + Send + Sync + 'static,
    S: EventStore + Send + Sync + 'static,
{
    let store: DynEventStore = Arc::new(store);
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        Arc::new(timesource),
        max_attempts,
    ));
    let state = State { reconciler, store };

    // Permissive CORS policy; reverse proxies in the factories send funky
    // headers.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .allow_origin(AllowOrigin::mirror_request());

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(index))
        .route("/events/batch", post(endpoints::ingest_batch))
        .route("/stats", get(endpoints::machine_stats))
        .route("/stats/top-defect-lines", get(endpoints::top_defect_lines))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Installing a global recorder when the crate is used as a library
    // (during tests etc) does not work well.
    if metrics {
        let recorder_handle = setup_metrics_recorder();
        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}
