use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Provider-reported terminal/interim statuses, normalized at the gateway
/// boundary. Anything unrecognized is carried verbatim and never drives a
/// state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackStatus {
    Success,
    Failed,
    Expired,
    Pending,
    Other(String),
}

impl CallbackStatus {
    pub fn from_raw(raw: &str) -> CallbackStatus {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => CallbackStatus::Success,
            "FAILED" => CallbackStatus::Failed,
            "EXPIRED" => CallbackStatus::Expired,
            "PENDING" => CallbackStatus::Pending,
            _ => CallbackStatus::Other(raw.trim().to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallbackStatus::Success | CallbackStatus::Failed | CallbackStatus::Expired)
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("provider credentials not configured")]
    Configuration,
    #[error("provider rejected request: {0}")]
    Rejected(String),
    #[error("provider unavailable: {0}")]
    Transient(String),
}

/// Response to an initiate-payment call. `raw` keeps the untouched provider
/// body for the transaction's audit trail.
#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub reference: Option<String>,
    pub status: Option<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct PaymentStatus {
    pub status: CallbackStatus,
    pub message: Option<String>,
}

#[async_trait::async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Cheap credential-presence check backing the synchronous
    /// "provider misconfigured" initiate error.
    fn ensure_configured(&self) -> Result<(), GatewayError>;

    async fn initiate_payment(
        &self,
        amount_xaf: i64,
        external_id: Uuid,
        callback_url: &str,
        payer: &str,
    ) -> Result<InitiatedPayment, GatewayError>;

    async fn query_status(&self, reference: &str) -> Result<PaymentStatus, GatewayError>;
}

const RETRY_AFTER_CAP_SECS: u64 = 5;

/// Thin client over the Freemopay mobile-money HTTP API. Static pre-shared
/// credential pair sent as Basic Auth; no session or token lifecycle.
pub struct FreemopayGateway {
    client: reqwest::Client,
    base_url: String,
    app_key: String,
    secret_key: String,
}

impl FreemopayGateway {
    pub fn new(base_url: String, app_key: String, secret_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), app_key, secret_key })
    }

    fn classify_status(status: reqwest::StatusCode, body: String) -> GatewayError {
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            GatewayError::Configuration
        } else if status.is_client_error() {
            GatewayError::Rejected(format!("{status}: {body}"))
        } else {
            GatewayError::Transient(format!("{status}: {body}"))
        }
    }
}

#[derive(Deserialize)]
struct StatusBody {
    status: Option<String>,
    message: Option<String>,
}

#[async_trait::async_trait]
impl ProviderGateway for FreemopayGateway {
    fn ensure_configured(&self) -> Result<(), GatewayError> {
        if self.app_key.is_empty() || self.secret_key.is_empty() {
            return Err(GatewayError::Configuration);
        }
        Ok(())
    }

    async fn initiate_payment(
        &self,
        amount_xaf: i64,
        external_id: Uuid,
        callback_url: &str,
        payer: &str,
    ) -> Result<InitiatedPayment, GatewayError> {
        self.ensure_configured()?;
        let url = format!("{}/api/v2/payment", self.base_url);
        let payload = json!({
            "amount": amount_xaf,
            "externalId": external_id.to_string(),
            "callback": callback_url,
            "payer": payer,
        });
        tracing::info!(%external_id, amount_xaf, "initiating provider payment");

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.app_key, Some(&self.secret_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let raw: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("invalid provider response: {e}")))?;
        let reference = raw.get("reference").and_then(|v| v.as_str()).map(str::to_string);
        let init_status = raw.get("status").and_then(|v| v.as_str()).map(str::to_string);
        tracing::info!(%external_id, reference = reference.as_deref().unwrap_or("-"), "provider accepted payment");
        Ok(InitiatedPayment { reference, status: init_status, raw })
    }

    async fn query_status(&self, reference: &str) -> Result<PaymentStatus, GatewayError> {
        self.ensure_configured()?;
        let url = format!("{}/api/v2/payment/{}", self.base_url, reference);

        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.app_key, Some(&self.secret_key))
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            // Honor Retry-After (capped) before the caller's own retry policy.
            let pause = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1)
                .min(RETRY_AFTER_CAP_SECS);
            tokio::time::sleep(Duration::from_secs(pause)).await;
            return Err(GatewayError::Transient("rate limited".into()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let body: StatusBody = resp
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("invalid provider response: {e}")))?;
        let raw_status = body.status.unwrap_or_default();
        Ok(PaymentStatus { status: CallbackStatus::from_raw(&raw_status), message: body.message })
    }
}

/// Deterministic gateway for tests: accepts every initiate call with a fixed
/// reference and reports PENDING on status queries, so the fast path never
/// settles a transaction on its own.
pub struct StubGateway;

impl StubGateway {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ProviderGateway for StubGateway {
    fn ensure_configured(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn initiate_payment(
        &self,
        _amount_xaf: i64,
        external_id: Uuid,
        _callback_url: &str,
        _payer: &str,
    ) -> Result<InitiatedPayment, GatewayError> {
        let reference = format!("stub-{external_id}");
        Ok(InitiatedPayment {
            reference: Some(reference.clone()),
            status: Some("PENDING".into()),
            raw: json!({ "reference": reference, "status": "PENDING" }),
        })
    }

    async fn query_status(&self, _reference: &str) -> Result<PaymentStatus, GatewayError> {
        Ok(PaymentStatus { status: CallbackStatus::Pending, message: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_normalization() {
        assert_eq!(CallbackStatus::from_raw("SUCCESS"), CallbackStatus::Success);
        assert_eq!(CallbackStatus::from_raw("success"), CallbackStatus::Success);
        assert_eq!(CallbackStatus::from_raw(" failed "), CallbackStatus::Failed);
        assert_eq!(CallbackStatus::from_raw("EXPIRED"), CallbackStatus::Expired);
        assert_eq!(CallbackStatus::from_raw("PENDING"), CallbackStatus::Pending);
        assert_eq!(
            CallbackStatus::from_raw("ON_HOLD"),
            CallbackStatus::Other("ON_HOLD".into())
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(CallbackStatus::Success.is_terminal());
        assert!(CallbackStatus::Failed.is_terminal());
        assert!(CallbackStatus::Expired.is_terminal());
        assert!(!CallbackStatus::Pending.is_terminal());
        assert!(!CallbackStatus::Other("X".into()).is_terminal());
    }
}
