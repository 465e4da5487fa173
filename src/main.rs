use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tracing::warn;

use portal_service::app::build_router;
use portal_service::catalog::PlanCatalog;
use portal_service::gateway::FreemopayGateway;
use portal_service::sweeper::spawn_reconciliation_sweeper;
use portal_service::{
    AppState, DEFAULT_FAST_PATH_DELAY_SECS, DEFAULT_PLAN_CACHE_TTL_SECS,
    DEFAULT_RESERVATION_GRACE_SECS, DEFAULT_SWEEP_BATCH, DEFAULT_SWEEP_INTERVAL_SECS,
};

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        env::var(name).ok().and_then(|v| v.parse::<u64>().ok()).unwrap_or(default),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = PgPool::connect(&database_url).await?;

    let provider_base_url = env::var("FREEMOPAY_BASE_URL")
        .unwrap_or_else(|_| "https://api-v2.freemopay.com".to_string());
    let app_key = env::var("FREEMOPAY_APP_KEY").unwrap_or_default();
    let secret_key = env::var("FREEMOPAY_SECRET_KEY").unwrap_or_default();
    if app_key.is_empty() || secret_key.is_empty() {
        warn!("FREEMOPAY_APP_KEY / FREEMOPAY_SECRET_KEY not set; payment initiation will be rejected");
    }
    let provider_timeout = env_secs("PROVIDER_TIMEOUT_SECS", 5);
    let gateway = FreemopayGateway::new(provider_base_url, app_key, secret_key, provider_timeout)?;

    let public_base_url = env::var("PUBLIC_BASE_URL")
        .unwrap_or_else(|_| "http://localhost:8088".to_string());
    let callback_url = format!("{}/webhooks/freemopay", public_base_url.trim_end_matches('/'));

    let plan_cache_ttl = env_secs("PLAN_CACHE_TTL_SECS", DEFAULT_PLAN_CACHE_TTL_SECS);
    let state = AppState {
        db: db.clone(),
        gateway: Arc::new(gateway),
        catalog: Arc::new(PlanCatalog::new(db, plan_cache_ttl)),
        callback_url,
        fast_path_delay: env_secs("FAST_PATH_DELAY_SECS", DEFAULT_FAST_PATH_DELAY_SECS),
        reservation_grace: env_secs("RESERVATION_GRACE_SECS", DEFAULT_RESERVATION_GRACE_SECS),
        sweep_interval: env_secs("SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS),
        sweep_batch: env::var("SWEEP_BATCH").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_SWEEP_BATCH),
    };

    spawn_reconciliation_sweeper(state.clone());

    let app = build_router(state);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8088);
    let ip: std::net::IpAddr = host.parse()?;
    let addr = SocketAddr::from((ip, port));
    println!("starting portal-service on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
