use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::http_errors::{ApiError, ApiResult};
use crate::orchestrator;
use crate::repo::{self, Transaction};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    #[serde(rename = "planId")]
    pub plan_id: String,
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub success: bool,
    #[serde(rename = "transactionId")]
    pub transaction_id: Uuid,
    pub amount: i64,
    pub status: String,
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(payload): Json<InitiatePaymentRequest>,
) -> ApiResult<Json<InitiatePaymentResponse>> {
    let txn = orchestrator::initiate(&state, &payload.plan_id, &payload.phone_number).await?;
    Ok(Json(InitiatePaymentResponse {
        success: true,
        transaction_id: txn.id,
        amount: txn.amount_xaf,
        status: txn.status,
    }))
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CredentialsView {
    pub username: String,
    pub password: String,
}

/// Public-safe projection of a transaction. Internal fields (phone, provider
/// payloads, review flags) never leave the server.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub id: Uuid,
    pub status: String,
    pub amount: i64,
    #[serde(rename = "providerReference")]
    pub provider_reference: Option<String>,
    pub credentials: Option<CredentialsView>,
    #[serde(rename = "planName")]
    pub plan_name: Option<String>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CheckStatusResponse {
    pub success: bool,
    pub transaction: TransactionView,
}

/// Credentials are exposed only for a completed transaction with both fields
/// present and non-empty, even if stale values exist in storage.
pub fn public_view(txn: &Transaction) -> TransactionView {
    let credentials = match (txn.status.as_str(), &txn.username, &txn.password) {
        ("completed", Some(username), Some(password))
            if !username.is_empty() && !password.is_empty() =>
        {
            Some(CredentialsView { username: username.clone(), password: password.clone() })
        }
        _ => None,
    };

    TransactionView {
        id: txn.id,
        status: txn.status.clone(),
        amount: txn.amount_xaf,
        provider_reference: txn.provider_ref.clone(),
        credentials,
        plan_name: txn.plan_name.clone(),
        updated_at: txn.updated_at,
    }
}

pub async fn check_transaction_status(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> ApiResult<Json<CheckStatusResponse>> {
    let txn = repo::get(&state.db, transaction_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound { code: "transaction_not_found" })?;

    Ok(Json(CheckStatusResponse { success: true, transaction: public_view(&txn) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn txn(status: &str, username: Option<&str>, password: Option<&str>) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            plan_id: "P1".into(),
            phone: "237699123456".into(),
            amount_xaf: 500,
            currency: "XAF".into(),
            status: status.into(),
            provider_ref: Some("ref-1".into()),
            provider_status: None,
            provider_message: None,
            ticket_id: None,
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            plan_name: Some("Day Pass".into()),
            webhook_received: false,
            needs_review: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn credentials_only_for_completed() {
        let view = public_view(&txn("completed", Some("user"), Some("pw")));
        assert_eq!(
            view.credentials,
            Some(CredentialsView { username: "user".into(), password: "pw".into() })
        );

        // Stale partial writes must never leak.
        for status in ["created", "pending", "failed", "expired"] {
            let view = public_view(&txn(status, Some("user"), Some("pw")));
            assert!(view.credentials.is_none(), "status={status}");
        }
    }

    #[test]
    fn empty_credentials_are_withheld() {
        assert!(public_view(&txn("completed", Some(""), Some("pw"))).credentials.is_none());
        assert!(public_view(&txn("completed", Some("user"), Some(""))).credentials.is_none());
        assert!(public_view(&txn("completed", None, Some("pw"))).credentials.is_none());
        assert!(public_view(&txn("completed", Some("user"), None)).credentials.is_none());
    }
}
