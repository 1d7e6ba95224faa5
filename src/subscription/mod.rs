use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::gateway::{DataGateway, GatewayError};
use crate::shared::models::{Payment, PaymentMethod, PaymentStatus, SubscriptionStatus};

pub mod api;

const BILLING_PERIOD_DAYS: i64 = 30;
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug)]
pub enum SubscriptionError {
    Gateway(GatewayError),
}

impl std::fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gateway(e) => write!(f, "Gateway error: {e}"),
        }
    }
}

impl std::error::Error for SubscriptionError {}

impl From<GatewayError> for SubscriptionError {
    fn from(err: GatewayError) -> Self {
        Self::Gateway(err)
    }
}

#[derive(Debug, Clone)]
pub enum SignatureError {
    Malformed(String),
    Mismatch,
    Expired,
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(m) => write!(f, "Malformed signature header: {m}"),
            Self::Mismatch => write!(f, "Signature mismatch"),
            Self::Expired => write!(f, "Signature timestamp outside tolerance"),
        }
    }
}

impl std::error::Error for SignatureError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentWebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PaymentWebhookData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentWebhookData {
    #[serde(rename = "ticketNumber")]
    pub ticket_number: String,
    #[serde(default)]
    pub amount: Option<WebhookAmount>,
    #[serde(default)]
    pub metadata: WebhookMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAmount {
    pub total: BigDecimal,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookMetadata {
    #[serde(rename = "clinicId")]
    pub clinic_id: Option<String>,
}

/// How a delivery was absorbed. All three variants acknowledge to the
/// provider; only an internal failure may produce a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    AlreadyProcessed,
    Ignored(&'static str),
}

pub struct SubscriptionService {
    gateway: Arc<dyn DataGateway>,
}

impl SubscriptionService {
    pub fn new(gateway: Arc<dyn DataGateway>) -> Self {
        Self { gateway }
    }

    /// Applies one provider delivery. Safe under at-least-once delivery:
    /// the ledger's unique transaction id makes duplicates detectable, and
    /// the ledger row is written before the clinic's subscription columns
    /// so a failed ledger write never leaves a clinic falsely active.
    pub async fn handle_event(
        &self,
        event: &PaymentWebhookEvent,
    ) -> Result<WebhookOutcome, SubscriptionError> {
        let new_status = match event.event_type.as_str() {
            "charge.succeeded" => SubscriptionStatus::Active,
            "charge.failed" => SubscriptionStatus::PastDue,
            other => {
                debug!(event_type = %other, "ignoring unrecognized provider event");
                return Ok(WebhookOutcome::Ignored("unknown event type"));
            }
        };

        let Some(raw_clinic_id) = event.data.metadata.clinic_id.as_deref() else {
            warn!(
                ticket = %event.data.ticket_number,
                "provider event carries no clinic id"
            );
            return Ok(WebhookOutcome::Ignored("missing clinic id"));
        };
        let Ok(clinic_id) = Uuid::parse_str(raw_clinic_id) else {
            warn!(
                ticket = %event.data.ticket_number,
                clinic_id = %raw_clinic_id,
                "provider event carries an unparseable clinic id"
            );
            return Ok(WebhookOutcome::Ignored("invalid clinic id"));
        };
        if self.gateway.get_clinic(clinic_id).await?.is_none() {
            warn!(clinic_id = %clinic_id, "provider event for unknown clinic");
            return Ok(WebhookOutcome::Ignored("unknown clinic"));
        }

        let payment_status = match new_status {
            SubscriptionStatus::Active => PaymentStatus::Succeeded,
            _ => PaymentStatus::Failed,
        };
        let payment = Payment {
            id: Uuid::new_v4(),
            clinic_id,
            billing_id: None,
            provider: "payphone".to_string(),
            provider_transaction_id: event.data.ticket_number.clone(),
            method: PaymentMethod::Card,
            status: payment_status,
            amount: event
                .data
                .amount
                .as_ref()
                .map(|a| a.total.clone())
                .unwrap_or_else(|| BigDecimal::from(0)),
            metadata: serde_json::to_value(event).unwrap_or_default(),
            created_at: Utc::now(),
        };

        match self.gateway.insert_payment(payment).await {
            Ok(()) => {}
            Err(GatewayError::Conflict(_)) => {
                info!(
                    clinic_id = %clinic_id,
                    ticket = %event.data.ticket_number,
                    "duplicate provider delivery, already processed"
                );
                return Ok(WebhookOutcome::AlreadyProcessed);
            }
            Err(e) => return Err(e.into()),
        }

        let next_billing_date = match new_status {
            SubscriptionStatus::Active => Some(Utc::now() + Duration::days(BILLING_PERIOD_DAYS)),
            _ => None,
        };
        self.gateway
            .update_clinic_subscription(clinic_id, new_status, next_billing_date)
            .await?;

        info!(
            clinic_id = %clinic_id,
            ticket = %event.data.ticket_number,
            status = ?new_status,
            "subscription transition applied"
        );
        Ok(WebhookOutcome::Applied)
    }
}

/// Verifies the provider's `t=<unix>,v1=<hex hmac>` header over
/// `"{timestamp}.{payload}"`. Must pass before any field of the payload is
/// trusted.
pub fn verify_signature(
    payload: &str,
    signature_header: &str,
    secret: &str,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut received = None;
    for part in signature_header.split(',') {
        match part.split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => received = Some(v),
            _ => {}
        }
    }
    let timestamp = timestamp
        .ok_or_else(|| SignatureError::Malformed("missing timestamp".to_string()))?;
    let received = received
        .ok_or_else(|| SignatureError::Malformed("missing signature".to_string()))?;

    let timestamp_secs: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::Malformed("invalid timestamp".to_string()))?;
    if (Utc::now().timestamp() - timestamp_secs).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::Malformed("invalid secret".to_string()))?;
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if expected != received {
        return Err(SignatureError::Mismatch);
    }
    Ok(())
}
