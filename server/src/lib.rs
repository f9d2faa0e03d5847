pub mod config;
pub mod error;
pub mod gate;
pub mod handler;
pub mod metrics;
pub mod scratch;
pub mod stream;
pub mod validation;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tts_core::Synthesizer;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::gate::SynthesisGate;
use crate::handler::tts_endpoint;
use crate::metrics::{AppMetrics, DetailedMetricsResponse, SystemMetrics};
use crate::scratch::ScratchManager;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub synthesizer: Arc<dyn Synthesizer>,
    pub gate: Arc<SynthesisGate>,
    pub scratch: Arc<ScratchManager>,
    pub metrics: Arc<AppMetrics>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig, synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self {
            synthesizer,
            gate: Arc::new(SynthesisGate::new(
                config.synth_slots,
                config.admission_timeout(),
            )),
            scratch: Arc::new(ScratchManager::new(config.scratch_dir.clone())),
            metrics: Arc::new(AppMetrics::new()),
            config,
        }
    }
}

/// The full router, minus rate limiting which only the binary installs.
pub fn app(state: AppState) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes();
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(cors_layer(&state.config))
        .into_inner();

    let public_api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/tts", post(tts_endpoint));

    // Metrics endpoint - consider adding authentication in production
    let metrics_api = Router::new().route("/metrics", get(metrics_endpoint));

    let api = Router::new().merge(public_api).merge(metrics_api);

    Router::new()
        .merge(api.clone()) // root paths
        .nest("/api", api) // /api prefix
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let Some(allowed_origins) = config.cors_allowed_origins.as_ref() else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        return base.allow_origin(Any);
    };

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

/// Tag every request with a UUID, keeping a well-formed one from the client.
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::new_v4);

    let Ok(value) = HeaderValue::from_str(&request_id.to_string()) else {
        return next.run(request).await;
    };
    request
        .headers_mut()
        .insert(REQUEST_ID_HEADER, value.clone());
    let mut response = next.run(request).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, value);
    response
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<DetailedMetricsResponse> {
    Json(DetailedMetricsResponse {
        timestamp: chrono::Utc::now(),
        engine: state.synthesizer.name(),
        system: SystemMetrics::collect(),
        tts: state.metrics.tts.stats(),
        streams: state.metrics.streams.stats(),
        gate: state.gate.snapshot(),
    })
}
