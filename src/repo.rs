use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnStatus {
    Created,
    Pending,
    Completed,
    Failed,
    Expired,
}

impl TxnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::Created => "created",
            TxnStatus::Pending => "pending",
            TxnStatus::Completed => "completed",
            TxnStatus::Failed => "failed",
            TxnStatus::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<TxnStatus> {
        match s {
            "created" => Some(TxnStatus::Created),
            "pending" => Some(TxnStatus::Pending),
            "completed" => Some(TxnStatus::Completed),
            "failed" => Some(TxnStatus::Failed),
            "expired" => Some(TxnStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnStatus::Completed | TxnStatus::Failed | TxnStatus::Expired)
    }
}

/// Valid transitions:
/// created -> pending | completed | failed | expired
/// pending -> completed | failed | expired
/// Terminal statuses are sticky; nothing moves out of them.
pub fn is_valid_transition(from_status: &str, to: TxnStatus) -> bool {
    match TxnStatus::from_str(from_status) {
        Some(TxnStatus::Created) => !matches!(to, TxnStatus::Created),
        Some(TxnStatus::Pending) => to.is_terminal(),
        Some(TxnStatus::Completed | TxnStatus::Failed | TxnStatus::Expired) => false,
        None => false,
    }
}

/// One purchase attempt. The row id doubles as the provider-facing
/// externalId, which makes it the idempotency key toward the provider.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub plan_id: String,
    pub phone: String,
    pub amount_xaf: i64,
    pub currency: String,
    pub status: String,
    pub provider_ref: Option<String>,
    pub provider_status: Option<String>,
    pub provider_message: Option<String>,
    pub ticket_id: Option<Uuid>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub plan_name: Option<String>,
    pub webhook_received: bool,
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const ALL_COLUMNS: &str = "id, plan_id, phone, amount_xaf, currency, status, provider_ref, \
     provider_status, provider_message, ticket_id, username, password, plan_name, \
     webhook_received, needs_review, created_at, updated_at";

pub async fn create(
    db: &PgPool,
    id: Uuid,
    plan_id: &str,
    phone: &str,
    amount_xaf: i64,
    currency: &str,
    ticket_id: Uuid,
) -> Result<Transaction> {
    let rec = sqlx::query_as::<_, Transaction>(&format!(
        r#"INSERT INTO transactions (id, plan_id, phone, amount_xaf, currency, status, ticket_id)
           VALUES ($1, $2, $3, $4, $5, 'created', $6)
           RETURNING {ALL_COLUMNS}"#,
    ))
    .bind(id)
    .bind(plan_id)
    .bind(phone)
    .bind(amount_xaf)
    .bind(currency)
    .bind(ticket_id)
    .fetch_one(db)
    .await?;
    Ok(rec)
}

pub async fn get(db: &PgPool, id: Uuid) -> Result<Option<Transaction>> {
    let rec = sqlx::query_as::<_, Transaction>(&format!(
        "SELECT {ALL_COLUMNS} FROM transactions WHERE id = $1",
    ))
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(rec)
}

pub async fn find_by_provider_ref(db: &PgPool, provider_ref: &str) -> Result<Option<Transaction>> {
    let rec = sqlx::query_as::<_, Transaction>(&format!(
        "SELECT {ALL_COLUMNS} FROM transactions WHERE provider_ref = $1 LIMIT 1",
    ))
    .bind(provider_ref)
    .fetch_optional(db)
    .await?;
    Ok(rec)
}

/// created -> pending once the provider accepted the initiate call. The
/// status guard makes a late transition after sweeper expiry a no-op.
pub async fn mark_pending(
    db: &PgPool,
    id: Uuid,
    provider_ref: Option<&str>,
    init_response: &serde_json::Value,
) -> Result<Option<Transaction>> {
    let rec = sqlx::query_as::<_, Transaction>(&format!(
        r#"UPDATE transactions
           SET status = 'pending', provider_ref = COALESCE($2, provider_ref),
               init_response = $3, updated_at = NOW()
           WHERE id = $1 AND status = 'created'
           RETURNING {ALL_COLUMNS}"#,
    ))
    .bind(id)
    .bind(provider_ref)
    .bind(init_response)
    .fetch_optional(db)
    .await?;
    Ok(rec)
}

/// Idempotent acknowledgment for replayed webhooks on terminal transactions.
pub async fn mark_webhook_received(db: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE transactions SET webhook_received = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// Records an unrecognized provider status verbatim without touching the
/// transaction's own status. Guarded on a non-terminal status so a callback
/// racing a concurrent settlement cannot overwrite the final provider_status.
pub async fn record_provider_status(
    db: &PgPool,
    id: Uuid,
    provider_status: &str,
    message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"UPDATE transactions
           SET provider_status = $2, provider_message = $3, webhook_received = TRUE, updated_at = NOW()
           WHERE id = $1 AND status IN ('created', 'pending')"#,
    )
    .bind(id)
    .bind(provider_status)
    .bind(message)
    .execute(db)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for s in ["created", "pending", "completed", "failed", "expired"] {
            assert_eq!(TxnStatus::from_str(s).unwrap().as_str(), s);
        }
        assert!(TxnStatus::from_str("authorized").is_none());
    }

    #[test]
    fn terminal_statuses_are_sticky() {
        for terminal in ["completed", "failed", "expired"] {
            for to in [TxnStatus::Created, TxnStatus::Pending, TxnStatus::Completed, TxnStatus::Failed, TxnStatus::Expired] {
                assert!(!is_valid_transition(terminal, to), "{terminal} -> {to:?}");
            }
        }
    }

    #[test]
    fn forward_transitions_allowed() {
        assert!(is_valid_transition("created", TxnStatus::Pending));
        assert!(is_valid_transition("created", TxnStatus::Failed));
        assert!(is_valid_transition("created", TxnStatus::Expired));
        assert!(is_valid_transition("pending", TxnStatus::Completed));
        assert!(is_valid_transition("pending", TxnStatus::Failed));
        assert!(!is_valid_transition("pending", TxnStatus::Created));
        assert!(!is_valid_transition("pending", TxnStatus::Pending));
    }
}
