use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::gateway::CallbackStatus;
use crate::orchestrator::{self, CallbackOutcome, ProviderCallback};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    pub status: Option<String>,
    pub reference: Option<String>,
    #[serde(rename = "externalId")]
    pub external_id: Option<String>,
    pub message: Option<String>,
}

/// Validates the webhook body shape. Malformed means: no status, or neither a
/// reference nor an externalId to resolve the transaction by.
pub fn parse_callback(body: &WebhookBody) -> Result<ProviderCallback, &'static str> {
    let raw_status = match body.status.as_deref() {
        Some(s) if !s.trim().is_empty() => s,
        _ => return Err("missing status"),
    };
    if body.reference.as_deref().map_or(true, str::is_empty)
        && body.external_id.as_deref().map_or(true, str::is_empty)
    {
        return Err("missing reference and externalId");
    }

    Ok(ProviderCallback {
        status: CallbackStatus::from_raw(raw_status),
        reference: body.reference.clone().filter(|r| !r.is_empty()),
        // A non-UUID externalId cannot be one of our transaction ids; the
        // reference fallback still gets a chance to resolve it.
        external_id: body.external_id.as_deref().and_then(|s| Uuid::parse_str(s).ok()),
        message: body.message.clone(),
    })
}

/// Provider webhook endpoint. Responds 2xx even on internal settlement errors
/// so the provider does not enter a retry storm; those transactions are left
/// for the sweeper or manual reconciliation.
pub async fn handle_provider_webhook(
    State(state): State<AppState>,
    Json(body): Json<WebhookBody>,
) -> (StatusCode, &'static str) {
    let cb = match parse_callback(&body) {
        Ok(cb) => cb,
        Err(reason) => return (StatusCode::BAD_REQUEST, reason),
    };

    match orchestrator::process_provider_callback(&state, cb).await {
        Ok(CallbackOutcome::NotFound) => {
            crate::app::WEBHOOKS_TOTAL.with_label_values(&["not_found"]).inc();
            (StatusCode::NOT_FOUND, "transaction not found")
        }
        Ok(outcome) => {
            let label = match outcome {
                CallbackOutcome::Completed => "completed",
                CallbackOutcome::AlreadySettled => "replay",
                CallbackOutcome::TicketLost => "ticket_lost",
                CallbackOutcome::Failed => "failed",
                CallbackOutcome::Expired => "expired",
                CallbackOutcome::Recorded => "recorded",
                CallbackOutcome::NotFound => unreachable!(),
            };
            crate::app::WEBHOOKS_TOTAL.with_label_values(&[label]).inc();
            (StatusCode::OK, "")
        }
        Err(err) => {
            error!(error = %err, "webhook settlement error");
            crate::app::WEBHOOKS_TOTAL.with_label_values(&["error"]).inc();
            (StatusCode::OK, "")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(status: Option<&str>, reference: Option<&str>, external_id: Option<&str>) -> WebhookBody {
        WebhookBody {
            status: status.map(str::to_string),
            reference: reference.map(str::to_string),
            external_id: external_id.map(str::to_string),
            message: None,
        }
    }

    #[test]
    fn rejects_missing_status() {
        assert!(parse_callback(&body(None, Some("ref"), None)).is_err());
        assert!(parse_callback(&body(Some("  "), Some("ref"), None)).is_err());
    }

    #[test]
    fn rejects_missing_identifiers() {
        assert!(parse_callback(&body(Some("SUCCESS"), None, None)).is_err());
        assert!(parse_callback(&body(Some("SUCCESS"), Some(""), Some(""))).is_err());
    }

    #[test]
    fn parses_well_formed_callbacks() {
        let id = Uuid::new_v4();
        let cb = parse_callback(&body(Some("success"), Some("ref-1"), Some(&id.to_string()))).unwrap();
        assert_eq!(cb.status, CallbackStatus::Success);
        assert_eq!(cb.reference.as_deref(), Some("ref-1"));
        assert_eq!(cb.external_id, Some(id));
    }

    #[test]
    fn non_uuid_external_id_falls_back_to_reference() {
        let cb = parse_callback(&body(Some("FAILED"), Some("ref-1"), Some("legacy-42"))).unwrap();
        assert_eq!(cb.external_id, None);
        assert_eq!(cb.reference.as_deref(), Some("ref-1"));
    }

    #[test]
    fn unknown_status_is_carried_verbatim() {
        let cb = parse_callback(&body(Some("ON_HOLD"), Some("ref-1"), None)).unwrap();
        assert_eq!(cb.status, CallbackStatus::Other("ON_HOLD".into()));
    }
}
