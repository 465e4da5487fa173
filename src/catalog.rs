use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("plan not found")]
    NotFound,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// The subset of a plan the orchestrator needs on every purchase.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price_xaf: i64,
    pub validity_hours: i32,
    pub is_active: bool,
    pub rate_limit: Option<String>,
}

struct CacheEntry {
    plan: Plan,
    expires_at: Instant,
}

/// In-memory TTL cache for plan rows. Freshness checks take an explicit
/// `Instant` so tests can drive expiry without sleeping.
struct TtlCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
}

impl TtlCache {
    fn new(ttl: Duration) -> Self {
        Self { entries: HashMap::new(), ttl }
    }

    fn get_at(&self, plan_id: &str, now: Instant) -> Option<Plan> {
        self.entries
            .get(plan_id)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.plan.clone())
    }

    fn insert_at(&mut self, plan: Plan, now: Instant) {
        self.entries.insert(
            plan.id.clone(),
            CacheEntry { plan, expires_at: now + self.ttl },
        );
    }
}

/// Read-through plan catalog. Plans change rarely but are read on every
/// purchase, so cache hits skip the database entirely for `ttl`.
pub struct PlanCatalog {
    db: PgPool,
    cache: Mutex<TtlCache>,
}

impl PlanCatalog {
    pub fn new(db: PgPool, ttl: Duration) -> Self {
        Self { db, cache: Mutex::new(TtlCache::new(ttl)) }
    }

    pub async fn get_plan(&self, plan_id: &str) -> Result<Plan, CatalogError> {
        let now = Instant::now();
        if let Ok(cache) = self.cache.lock() {
            if let Some(plan) = cache.get_at(plan_id, now) {
                return Ok(plan);
            }
        }

        let plan = sqlx::query_as::<_, Plan>(
            "SELECT id, name, price_xaf, validity_hours, is_active, rate_limit FROM plans WHERE id = $1",
        )
        .bind(plan_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(CatalogError::NotFound)?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert_at(plan.clone(), Instant::now());
        }
        Ok(plan)
    }
}

/// Renders a validity window in hours as short human-readable text.
pub fn format_validity(hours: i32) -> String {
    if hours < 24 {
        return format!("{hours}h");
    }
    if hours < 168 {
        let days = hours / 24;
        return format!("{days} day{}", if days > 1 { "s" } else { "" });
    }
    if hours < 720 {
        let weeks = hours / 168;
        return format!("{weeks} week{}", if weeks > 1 { "s" } else { "" });
    }
    let months = hours / 720;
    format!("{months} month{}", if months > 1 { "s" } else { "" })
}
