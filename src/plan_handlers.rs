use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::catalog::format_validity;
use crate::http_errors::{ApiError, ApiResult};
use crate::{tickets, AppState};

#[derive(Debug, Deserialize)]
pub struct ListPlansQuery {
    #[serde(rename = "publicKey")]
    pub public_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ZoneView {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    #[serde(rename = "routerType")]
    pub router_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlanView {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    #[serde(rename = "formattedPrice")]
    pub formatted_price: String,
    #[serde(rename = "validityHours")]
    pub validity_hours: i32,
    #[serde(rename = "validityText")]
    pub validity_text: String,
    #[serde(rename = "isAvailable")]
    pub is_available: bool,
    #[serde(rename = "rateLimit")]
    pub rate_limit: Option<String>,
    #[serde(rename = "hasPromotion")]
    pub has_promotion: bool,
    #[serde(rename = "originalPrice")]
    pub original_price: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListPlansResponse {
    pub success: bool,
    pub zone: ZoneView,
    pub plans: Vec<PlanView>,
    #[serde(rename = "totalPlans")]
    pub total_plans: usize,
}

#[derive(sqlx::FromRow)]
struct ZoneRow {
    id: String,
    name: String,
    description: Option<String>,
    location: Option<String>,
    router_type: Option<String>,
    is_active: bool,
    public_access_key: Option<String>,
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: String,
    name: String,
    description: Option<String>,
    price_xaf: i64,
    original_price_xaf: Option<i64>,
    validity_hours: i32,
    rate_limit: Option<String>,
}

fn format_price_xaf(amount: i64) -> String {
    // Thousands separator for display, e.g. 10000 -> "10 000 F".
    let digits = amount.abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 2);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(c);
    }
    if amount < 0 {
        grouped.insert(0, '-');
    }
    format!("{grouped} F")
}

/// Lists purchasable plans for a zone, with an availability flag derived from
/// the ticket pool. Plans with no available ticket are filtered out so the
/// portal never offers something it cannot deliver.
pub async fn list_zone_plans(
    State(state): State<AppState>,
    Path(zone_id): Path<String>,
    Query(query): Query<ListPlansQuery>,
) -> ApiResult<Json<ListPlansResponse>> {
    let zone = sqlx::query_as::<_, ZoneRow>(
        "SELECT id, name, description, location, router_type, is_active, public_access_key FROM zones WHERE id = $1",
    )
    .bind(&zone_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::internal)?
    .ok_or(ApiError::NotFound { code: "zone_not_found" })?;

    if !zone.is_active {
        return Err(ApiError::bad_request("zone_inactive"));
    }
    if let Some(expected) = zone.public_access_key.as_deref() {
        if query.public_key.as_deref() != Some(expected) {
            return Err(ApiError::bad_request("invalid_access_key"));
        }
    }

    let rows = sqlx::query_as::<_, PlanRow>(
        r#"SELECT id, name, description, price_xaf, original_price_xaf, validity_hours, rate_limit
           FROM plans
           WHERE zone_id = $1 AND is_active = TRUE
           ORDER BY price_xaf ASC"#,
    )
    .bind(&zone_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::internal)?;

    let mut plans = Vec::with_capacity(rows.len());
    for row in rows {
        let is_available = tickets::any_available(&state.db, &row.id)
            .await
            .map_err(ApiError::internal)?;
        if !is_available {
            continue;
        }
        let has_promotion = row.original_price_xaf.is_some_and(|orig| orig > row.price_xaf);
        plans.push(PlanView {
            formatted_price: format_price_xaf(row.price_xaf),
            validity_text: format_validity(row.validity_hours),
            is_available,
            has_promotion,
            original_price: row.original_price_xaf,
            id: row.id,
            name: row.name,
            description: row.description,
            price: row.price_xaf,
            validity_hours: row.validity_hours,
            rate_limit: row.rate_limit,
        });
    }

    let total_plans = plans.len();
    Ok(Json(ListPlansResponse {
        success: true,
        zone: ZoneView {
            id: zone.id,
            name: zone.name,
            description: zone.description,
            location: zone.location,
            router_type: zone.router_type,
        },
        plans,
        total_plans,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_formatting() {
        assert_eq!(format_price_xaf(500), "500 F");
        assert_eq!(format_price_xaf(1000), "1 000 F");
        assert_eq!(format_price_xaf(25000), "25 000 F");
        assert_eq!(format_price_xaf(1500000), "1 500 000 F");
    }
}
