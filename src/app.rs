use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{middleware, Router};
use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tower_http::cors::{Any, CorsLayer};

use crate::payment_handlers::{check_transaction_status, initiate_payment};
use crate::plan_handlers::list_zone_plans;
use crate::webhook_handlers::handle_provider_webhook;
use crate::AppState;

pub static PORTAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static HTTP_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let v = IntCounterVec::new(
        Opts::new("http_errors_total", "Count of HTTP error responses emitted (status >= 400)"),
        &["service", "code", "status"],
    ).unwrap();
    PORTAL_REGISTRY.register(Box::new(v.clone())).ok();
    v
});

pub static PAYMENTS_INITIATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("payments_initiated_total", "Transactions created (ticket reserved)").unwrap();
    PORTAL_REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static WEBHOOKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let v = IntCounterVec::new(
        Opts::new("provider_webhooks_total", "Provider callbacks processed, by outcome"),
        &["outcome"],
    ).unwrap();
    PORTAL_REGISTRY.register(Box::new(v.clone())).ok();
    v
});

pub static SWEEP_TICKETS_RELEASED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("sweep_tickets_released_total", "Stale reservations returned to the pool").unwrap();
    PORTAL_REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SWEEP_TRANSACTIONS_EXPIRED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("sweep_transactions_expired_total", "Stale transactions expired by the sweeper").unwrap();
    PORTAL_REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SWEEP_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    let h = Histogram::with_opts(HistogramOpts::new(
        "sweep_duration_seconds",
        "Duration of reconciliation sweeps",
    )).unwrap();
    PORTAL_REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub async fn http_error_metrics(
    req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp
            .headers()
            .get("X-Error-Code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        HTTP_ERRORS_TOTAL
            .with_label_values(&["portal-service", code, status.as_str()])
            .inc();
    }
    resp
}

pub async fn health() -> &'static str {
    "ok"
}

async fn metrics_endpoint() -> (StatusCode, String) {
    let encoder = TextEncoder::new();
    let families = PORTAL_REGISTRY.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics encode error: {e}"));
    }
    (StatusCode::OK, String::from_utf8_lossy(&buf).to_string())
}

pub fn build_router(state: AppState) -> Router {
    // Captive-portal pages are served from router-local origins that vary per
    // deployment, so the public endpoints stay wide open.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/zones/:zone_id/plans", get(list_zone_plans))
        .route("/payments", post(initiate_payment))
        .route("/payments/:transaction_id", get(check_transaction_status))
        .route("/webhooks/freemopay", post(handle_provider_webhook))
        .with_state(state)
        .layer(middleware::from_fn(http_error_metrics))
        .layer(cors)
}
