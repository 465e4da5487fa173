use anyhow::{Context, Result};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::CatalogError;
use crate::gateway::{CallbackStatus, GatewayError};
use crate::http_errors::ApiError;
use crate::repo::{self, Transaction, TxnStatus};
use crate::{tickets, AppState, CURRENCY};

/// A provider settlement signal, whether delivered by the real webhook or
/// synthesized from a status query. Both paths feed
/// [`process_provider_callback`] so the settlement logic cannot diverge.
#[derive(Debug, Clone)]
pub struct ProviderCallback {
    pub status: CallbackStatus,
    pub reference: Option<String>,
    pub external_id: Option<Uuid>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// No transaction matches the callback.
    NotFound,
    /// Transaction already terminal; replay acknowledged without mutation.
    AlreadySettled,
    /// Ticket sold, credentials attached, transaction completed.
    Completed,
    /// Payment succeeded but the reserved ticket was gone; flagged for
    /// manual review instead of fabricating credentials.
    TicketLost,
    Failed,
    Expired,
    /// Unknown provider status recorded verbatim, no transition.
    Recorded,
}

/// Reserves a ticket and records the purchase attempt. Returns as soon as the
/// transaction row is persisted; the provider call happens asynchronously so
/// the portal page can start polling immediately.
pub async fn initiate(state: &AppState, plan_id: &str, phone_raw: &str) -> Result<Transaction, ApiError> {
    let phone = crate::phone::normalize(phone_raw)
        .map_err(|e| ApiError::BadRequest { code: "invalid_phone", message: Some(e.to_string()) })?;

    state
        .gateway
        .ensure_configured()
        .map_err(|_| ApiError::ServiceUnavailable { code: "provider_misconfigured" })?;

    let plan = state.catalog.get_plan(plan_id).await.map_err(|e| match e {
        CatalogError::NotFound => ApiError::NotFound { code: "plan_not_found" },
        CatalogError::Db(err) => ApiError::internal(err),
    })?;
    if !plan.is_active {
        return Err(ApiError::bad_request("plan_inactive"));
    }
    if plan.price_xaf <= 0 {
        return Err(ApiError::bad_request("invalid_price"));
    }

    let txn_id = Uuid::new_v4();
    let Some(ticket) = tickets::reserve(&state.db, plan_id, txn_id)
        .await
        .map_err(ApiError::internal)?
    else {
        return Err(ApiError::Conflict {
            code: "sold_out",
            message: Some("No ticket available for this plan".into()),
        });
    };

    let txn = match repo::create(&state.db, txn_id, plan_id, &phone, plan.price_xaf, CURRENCY, ticket.id).await {
        Ok(txn) => txn,
        Err(err) => {
            // The reservation must not outlive a transaction row that never
            // existed; put the ticket back before reporting the failure.
            if let Err(release_err) = tickets::release(&state.db, ticket.id, txn_id).await {
                error!(ticket_id = %ticket.id, error = %release_err, "failed to release ticket after create error");
            }
            return Err(ApiError::internal(err));
        }
    };

    info!(txn_id = %txn.id, plan_id, ticket_id = %ticket.id, "transaction created, ticket reserved");
    crate::app::PAYMENTS_INITIATED_TOTAL.inc();

    let state = state.clone();
    let spawned = txn.clone();
    tokio::spawn(async move {
        start_provider_payment(&state, spawned).await;
    });

    Ok(txn)
}

/// Deferred follow-up to transaction creation: fires the provider
/// initiate-payment call, then (fast path) polls once for an early terminal
/// status and settles through the normal callback path.
pub async fn start_provider_payment(state: &AppState, txn: Transaction) {
    match state
        .gateway
        .initiate_payment(txn.amount_xaf, txn.id, &state.callback_url, &txn.phone)
        .await
    {
        Ok(init) => {
            match repo::mark_pending(&state.db, txn.id, init.reference.as_deref(), &init.raw).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    // Already moved on (sweeper expiry or an early webhook);
                    // the guarded update keeps us from rolling status back.
                    warn!(txn_id = %txn.id, "transaction no longer in created state after provider init");
                    return;
                }
                Err(err) => {
                    error!(txn_id = %txn.id, error = %err, "failed to mark transaction pending");
                    return;
                }
            }

            let Some(reference) = init.reference else { return };
            tokio::time::sleep(state.fast_path_delay).await;
            match state.gateway.query_status(&reference).await {
                Ok(st) if st.status.is_terminal() => {
                    let cb = ProviderCallback {
                        status: st.status,
                        reference: Some(reference),
                        external_id: Some(txn.id),
                        message: st.message,
                    };
                    if let Err(err) = process_provider_callback(state, cb).await {
                        error!(txn_id = %txn.id, error = %err, "fast-path settlement failed");
                    }
                }
                Ok(_) => {} // still pending, the webhook will finish the job
                Err(err) => {
                    warn!(txn_id = %txn.id, error = %err, "fast-path status query failed");
                }
            }
        }
        Err(err) => {
            warn!(txn_id = %txn.id, error = %err, "provider initiate call failed");
            if let Err(err) = fail_unstarted(state, &txn, &err).await {
                error!(txn_id = %txn.id, error = %err, "failed to record provider init failure");
            }
        }
    }
}

/// Marks a transaction failed before the payment ever went out and frees its
/// ticket, as one atomic step.
async fn fail_unstarted(state: &AppState, txn: &Transaction, cause: &GatewayError) -> Result<()> {
    let mut tx = state.db.begin().await.context("begin init-failure transaction")?;
    let ticket_id: Option<Option<Uuid>> = sqlx::query_scalar(
        r#"UPDATE transactions
           SET status = 'failed', provider_status = 'INIT_FAILED', provider_message = $2,
               updated_at = NOW()
           WHERE id = $1 AND status IN ('created', 'pending')
           RETURNING ticket_id"#,
    )
    .bind(txn.id)
    .bind(cause.to_string())
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(Some(ticket_id)) = ticket_id {
        tickets::release(&mut *tx, ticket_id, txn.id).await?;
    }
    tx.commit().await.context("commit init-failure transaction")?;
    Ok(())
}

/// Idempotent settlement. The single code path behind the provider webhook,
/// the fast-path status poll, and manual reconciliation.
pub async fn process_provider_callback(state: &AppState, cb: ProviderCallback) -> Result<CallbackOutcome> {
    let txn = match lookup(state, &cb).await? {
        Some(txn) => txn,
        None => return Ok(CallbackOutcome::NotFound),
    };

    if TxnStatus::from_str(&txn.status).is_some_and(|s| s.is_terminal()) {
        repo::mark_webhook_received(&state.db, txn.id).await?;
        return Ok(CallbackOutcome::AlreadySettled);
    }

    match &cb.status {
        CallbackStatus::Success => settle_success(state, &txn, &cb).await,
        CallbackStatus::Failed => settle_failure(state, &txn, &cb, TxnStatus::Failed).await,
        CallbackStatus::Expired => settle_failure(state, &txn, &cb, TxnStatus::Expired).await,
        CallbackStatus::Pending => {
            repo::record_provider_status(&state.db, txn.id, "PENDING", cb.message.as_deref()).await?;
            Ok(CallbackOutcome::Recorded)
        }
        CallbackStatus::Other(raw) => {
            warn!(txn_id = %txn.id, provider_status = %raw, "unknown provider status recorded");
            repo::record_provider_status(&state.db, txn.id, raw, cb.message.as_deref()).await?;
            Ok(CallbackOutcome::Recorded)
        }
    }
}

/// externalId is our transaction id; the stored provider reference is the
/// legacy fallback for callbacks that omit it.
async fn lookup(state: &AppState, cb: &ProviderCallback) -> Result<Option<Transaction>> {
    if let Some(id) = cb.external_id {
        if let Some(txn) = repo::get(&state.db, id).await? {
            return Ok(Some(txn));
        }
    }
    if let Some(reference) = cb.reference.as_deref() {
        if let Some(txn) = repo::find_by_provider_ref(&state.db, reference).await? {
            return Ok(Some(txn));
        }
    }
    Ok(None)
}

async fn settle_success(state: &AppState, txn: &Transaction, cb: &ProviderCallback) -> Result<CallbackOutcome> {
    // Plan name is display metadata; a catalog miss must not block settlement.
    let plan_name = state.catalog.get_plan(&txn.plan_id).await.ok().map(|p| p.name);

    let mut tx = state.db.begin().await.context("begin settlement transaction")?;

    let creds = match txn.ticket_id {
        Some(ticket_id) => tickets::sell(&mut *tx, ticket_id, txn.id).await?,
        None => None,
    };

    match creds {
        Some(creds) => {
            let claimed: Option<Uuid> = sqlx::query_scalar(
                r#"UPDATE transactions
                   SET status = 'completed', username = $2, password = $3, plan_name = $4,
                       provider_status = 'SUCCESS', provider_message = $5,
                       provider_ref = COALESCE($6, provider_ref),
                       webhook_received = TRUE, updated_at = NOW()
                   WHERE id = $1 AND status IN ('created', 'pending')
                   RETURNING id"#,
            )
            .bind(txn.id)
            .bind(&creds.username)
            .bind(&creds.password)
            .bind(plan_name)
            .bind(cb.message.as_deref())
            .bind(cb.reference.as_deref())
            .fetch_optional(&mut *tx)
            .await?;

            if claimed.is_none() {
                // Finalized concurrently between our terminal check and here;
                // rolling back reverts the ticket sale with it.
                tx.rollback().await.ok();
                repo::mark_webhook_received(&state.db, txn.id).await?;
                return Ok(CallbackOutcome::AlreadySettled);
            }
            tx.commit().await.context("commit settlement transaction")?;
            info!(txn_id = %txn.id, "payment settled, ticket sold");
            Ok(CallbackOutcome::Completed)
        }
        None => {
            // Money was received but the reservation is gone (sweeper reclaim
            // or data anomaly). Never fabricate credentials.
            let result = sqlx::query(
                r#"UPDATE transactions
                   SET status = 'failed', provider_status = 'TICKET_LOST', provider_message = $2,
                       needs_review = TRUE, webhook_received = TRUE, updated_at = NOW()
                   WHERE id = $1 AND status IN ('created', 'pending')"#,
            )
            .bind(txn.id)
            .bind(cb.message.as_deref())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                tx.rollback().await.ok();
                repo::mark_webhook_received(&state.db, txn.id).await?;
                return Ok(CallbackOutcome::AlreadySettled);
            }
            tx.commit().await.context("commit ticket-lost transaction")?;
            error!(txn_id = %txn.id, ticket_id = ?txn.ticket_id, "ticket lost between reservation and settlement");
            Ok(CallbackOutcome::TicketLost)
        }
    }
}

async fn settle_failure(
    state: &AppState,
    txn: &Transaction,
    cb: &ProviderCallback,
    to: TxnStatus,
) -> Result<CallbackOutcome> {
    let provider_status = match to {
        TxnStatus::Expired => "EXPIRED",
        _ => "FAILED",
    };

    let mut tx = state.db.begin().await.context("begin failure transaction")?;
    let ticket_id: Option<Option<Uuid>> = sqlx::query_scalar(
        r#"UPDATE transactions
           SET status = $2, provider_status = $3, provider_message = $4,
               provider_ref = COALESCE($5, provider_ref),
               webhook_received = TRUE, updated_at = NOW()
           WHERE id = $1 AND status IN ('created', 'pending')
           RETURNING ticket_id"#,
    )
    .bind(txn.id)
    .bind(to.as_str())
    .bind(provider_status)
    .bind(cb.message.as_deref())
    .bind(cb.reference.as_deref())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(ticket_id) = ticket_id else {
        tx.rollback().await.ok();
        repo::mark_webhook_received(&state.db, txn.id).await?;
        return Ok(CallbackOutcome::AlreadySettled);
    };
    if let Some(ticket_id) = ticket_id {
        tickets::release(&mut *tx, ticket_id, txn.id).await?;
    }
    tx.commit().await.context("commit failure transaction")?;

    info!(txn_id = %txn.id, status = to.as_str(), "payment declined, ticket released");
    Ok(match to {
        TxnStatus::Expired => CallbackOutcome::Expired,
        _ => CallbackOutcome::Failed,
    })
}
