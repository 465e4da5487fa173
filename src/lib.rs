use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::catalog::PlanCatalog;
use crate::gateway::ProviderGateway;

pub mod app;
pub mod catalog;
pub mod gateway;
pub mod http_errors;
pub mod orchestrator;
pub mod payment_handlers;
pub mod phone;
pub mod plan_handlers;
pub mod repo;
pub mod sweeper;
pub mod tickets;
pub mod webhook_handlers;

pub const CURRENCY: &str = "XAF";

pub const DEFAULT_PLAN_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_RESERVATION_GRACE_SECS: u64 = 600;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_SWEEP_BATCH: i64 = 100;
pub const DEFAULT_FAST_PATH_DELAY_SECS: u64 = 2;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub gateway: Arc<dyn ProviderGateway>,
    pub catalog: Arc<PlanCatalog>,
    /// Webhook URL handed to the provider on every initiate-payment call.
    pub callback_url: String,
    pub fast_path_delay: Duration,
    pub reservation_grace: Duration,
    pub sweep_interval: Duration,
    pub sweep_batch: i64,
}
