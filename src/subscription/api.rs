use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::shared::state::AppState;
use crate::subscription::{verify_signature, PaymentWebhookEvent, WebhookOutcome};

pub const SIGNATURE_HEADER: &str = "x-payments-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct WebhookFailure {
    pub error: String,
}

/// Provider deliveries are acknowledged with 200 for every handled,
/// duplicate, or ignorable case; 500 is reserved for internal failures so
/// retries only happen when a retry can help.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookAck>, (StatusCode, Json<WebhookFailure>)> {
    if let Some(secret) = state.config.payments.webhook_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if let Err(e) = verify_signature(&body, signature, secret) {
            warn!("rejected webhook delivery: {e}");
            return Err((
                StatusCode::BAD_REQUEST,
                Json(WebhookFailure {
                    error: "invalid signature".to_string(),
                }),
            ));
        }
    }

    let event: PaymentWebhookEvent = match serde_json::from_str(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("unparseable webhook payload: {e}");
            return Err((
                StatusCode::BAD_REQUEST,
                Json(WebhookFailure {
                    error: "invalid payload".to_string(),
                }),
            ));
        }
    };

    match state.subscriptions.handle_event(&event).await {
        Ok(WebhookOutcome::AlreadyProcessed) => Ok(Json(WebhookAck {
            received: true,
            status: Some("already_processed"),
        })),
        Ok(_) => Ok(Json(WebhookAck {
            received: true,
            status: None,
        })),
        Err(e) => {
            error!(
                event_type = %event.event_type,
                ticket = %event.data.ticket_number,
                "webhook handling failed: {e}"
            );
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookFailure {
                    error: "internal error".to_string(),
                }),
            ))
        }
    }
}
