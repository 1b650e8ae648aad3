use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use scan_resolve_common::config::{Config, RateConfig};
use scan_resolve_engine::{
    build_adapter, key_extraction, open_store, ContentResolver, EngineError, EngineOptions,
    ScanEngine, ScanEvent,
};
use scan_resolve_sources::ConfiguredSource;
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    engine: ScanEngine,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Config(_) => StatusCode::BAD_REQUEST,
        EngineError::InvalidCommand { .. } => StatusCode::CONFLICT,
        EngineError::Source(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(err: EngineError) -> Response {
    let status = status_for(&err);
    warn!(status = status.as_u16(), error = %err, "scan command rejected");
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

/// Any body that does not deserialize into the target type is a 400, the same
/// as a body that deserializes but fails validation.
fn bad_body(rejection: JsonRejection) -> Response {
    warn!(error = %rejection.body_text(), "malformed request body");
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": rejection.body_text() })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health
async fn health() -> &'static str {
    "ok"
}

/// GET /scan: current state, record and counters
async fn get_scan(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.snapshot())
}

/// POST /scan/start
async fn start_scan(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.start().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /scan/stop
async fn stop_scan(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.stop().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /scan/rescan: leave the displayed record and look for the next code
async fn rescan(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.rescan() {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e),
    }
}

/// PUT /scan/config
/// Body: { "sample_every_n_frames": 5, "confidence_threshold": 0.2 }
async fn put_config(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RateConfig>, JsonRejection>,
) -> Response {
    let Json(rate) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    match state.engine.configure(rate) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /scan/events: one SSE message per transition or diagnostic
async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.engine.subscribe();
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match sse_event(&event) {
                    Some(sse) => return Some((Ok::<_, Infallible>(sse), rx)),
                    None => continue,
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagging, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn sse_event(event: &ScanEvent) -> Option<Event> {
    let name = match event {
        ScanEvent::Transition { .. } => "transition",
        ScanEvent::Diagnostic(_) => "diagnostic",
    };
    match Event::default().event(name).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            error!(error = %e, "failed to serialize scan event");
            None
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/scan", get(get_scan))
        .route("/scan/start", post(start_scan))
        .route("/scan/stop", post(stop_scan))
        .route("/scan/rescan", post(rescan))
        .route("/scan/config", put(put_config))
        .route("/scan/events", get(events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let options = match EngineOptions::from_config(&config.scan) {
        Ok(o) => o,
        Err(e) => {
            error!(error = %e, "invalid [scan] settings");
            std::process::exit(1);
        }
    };

    let store = match open_store(&config.store) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open content store");
            std::process::exit(1);
        }
    };

    // Warm the detector once; every session reuses it.
    let adapter = match build_adapter(&config.detector).await {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, kind = %config.detector.kind, "failed to initialise detector");
            std::process::exit(1);
        }
    };

    let resolver = ContentResolver::new(store, key_extraction(&config.store));
    let opener = Arc::new(ConfiguredSource::new(config.source.clone()));
    let state = Arc::new(AppState {
        engine: ScanEngine::new(opener, adapter, resolver, options),
    });

    let app = router(Arc::clone(&state));

    let addr = format!("{}:{}", config.api.bind, config.api.port);
    info!(addr, source = %config.source.mode, "scan-resolve API server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await;
    if let Err(e) = served {
        error!(error = %e, "server error");
    }

    // Release the camera before exiting.
    if let Err(e) = state.engine.stop().await {
        warn!(error = %e, "failed to stop scanning on shutdown");
    }
    info!("scan-resolve API server stopped");
}
