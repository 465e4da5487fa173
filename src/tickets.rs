use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgExecutor;
use uuid::Uuid;

/// One sellable access-credential unit.
///
/// Lifecycle: available -> reserved -> sold (or reserved -> available on
/// failure/expiry). `used` is set out-of-band when the voucher is consumed.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub plan_id: String,
    pub username: String,
    pub password: String,
    pub status: String,
    pub reserved_by: Option<Uuid>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub sold_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Atomically claims one available ticket for the plan, stamping the owning
/// transaction and reservation time. `FOR UPDATE SKIP LOCKED` keeps concurrent
/// callers from ever selecting the same row; first-available order, no
/// fairness guarantee.
pub async fn reserve<'e>(
    db: impl PgExecutor<'e>,
    plan_id: &str,
    transaction_id: Uuid,
) -> Result<Option<Ticket>> {
    let ticket = sqlx::query_as::<_, Ticket>(
        r#"UPDATE tickets
           SET status = 'reserved', reserved_by = $2, reserved_at = NOW()
           WHERE id = (
               SELECT id FROM tickets
               WHERE plan_id = $1 AND status = 'available'
               ORDER BY created_at
               LIMIT 1
               FOR UPDATE SKIP LOCKED
           )
           RETURNING id, plan_id, username, password, status, reserved_by, reserved_at, sold_at"#,
    )
    .bind(plan_id)
    .bind(transaction_id)
    .fetch_optional(db)
    .await?;
    Ok(ticket)
}

/// Flips reserved -> sold, guarded on the owning transaction so a ticket
/// reclaimed by the sweeper (or re-reserved) is never sold to a stale buyer.
/// Returns the delivered credentials, or `None` when the guard rejects.
pub async fn sell<'e>(
    db: impl PgExecutor<'e>,
    ticket_id: Uuid,
    transaction_id: Uuid,
) -> Result<Option<Credentials>> {
    let creds = sqlx::query_as::<_, Credentials>(
        r#"UPDATE tickets
           SET status = 'sold', sold_at = NOW()
           WHERE id = $1 AND status = 'reserved' AND reserved_by = $2
           RETURNING username, password"#,
    )
    .bind(ticket_id)
    .bind(transaction_id)
    .fetch_optional(db)
    .await?;
    Ok(creds)
}

/// Returns a reserved ticket to the pool, clearing reservation metadata.
/// Guarded on the owning transaction like [`sell`]: a late failure for a
/// transaction whose ticket was reclaimed and re-reserved must not free the
/// new holder's reservation. Already-available or sold tickets are a no-op so
/// failure and sweeper paths stay idempotent.
pub async fn release<'e>(
    db: impl PgExecutor<'e>,
    ticket_id: Uuid,
    transaction_id: Uuid,
) -> Result<bool> {
    let result = sqlx::query(
        r#"UPDATE tickets
           SET status = 'available', reserved_by = NULL, reserved_at = NULL
           WHERE id = $1 AND status = 'reserved' AND reserved_by = $2"#,
    )
    .bind(ticket_id)
    .bind(transaction_id)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Existence probe used by the public plan listing.
pub async fn any_available<'e>(db: impl PgExecutor<'e>, plan_id: &str) -> Result<bool> {
    let found = sqlx::query_scalar::<_, i32>(
        "SELECT 1 FROM tickets WHERE plan_id = $1 AND status = 'available' LIMIT 1",
    )
    .bind(plan_id)
    .fetch_optional(db)
    .await?;
    Ok(found.is_some())
}

/// Sweeper pass: reservations older than the grace window go back to the
/// pool. Bounded by `batch`; the status guard in the outer UPDATE means a
/// ticket sold between select and update is left untouched.
pub async fn release_stale<'e>(
    db: impl PgExecutor<'e>,
    grace_secs: i64,
    batch: i64,
) -> Result<u64> {
    let result = sqlx::query(
        r#"UPDATE tickets
           SET status = 'available', reserved_by = NULL, reserved_at = NULL
           WHERE id IN (
               SELECT id FROM tickets
               WHERE status = 'reserved' AND reserved_at < NOW() - ($1 * INTERVAL '1 second')
               LIMIT $2
               FOR UPDATE SKIP LOCKED
           )
           AND status = 'reserved'"#,
    )
    .bind(grace_secs)
    .bind(batch)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}
