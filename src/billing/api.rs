use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::billing::invoice::FiscalIdentity;
use crate::billing::{
    BillingError, BillingStats, BillingView, CreateBillingRequest, PaymentProofReceipt,
};
use crate::shared::models::{Billing, Invoice};
use crate::shared::state::AppState;

fn map_error(operation: &str, err: BillingError) -> (StatusCode, String) {
    match err {
        BillingError::Validation { .. } => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        BillingError::BillingNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        BillingError::InvalidStatus(_) => (StatusCode::CONFLICT, err.to_string()),
        BillingError::Gateway(_) | BillingError::Storage(_) | BillingError::Fiscal(_) => {
            error!("{operation} failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "temporary failure, please retry".to_string(),
            )
        }
    }
}

pub async fn create_billing(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBillingRequest>,
) -> Result<Json<Billing>, (StatusCode, String)> {
    state
        .billing
        .create_billing(req)
        .await
        .map(Json)
        .map_err(|e| map_error("create_billing", e))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub clinic_id: Uuid,
}

pub async fn list_billings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BillingView>>, (StatusCode, String)> {
    state
        .billing
        .list_billings(query.clinic_id)
        .await
        .map(Json)
        .map_err(|e| map_error("list_billings", e))
}

pub async fn billing_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<BillingStats>, (StatusCode, String)> {
    state
        .billing
        .stats(query.clinic_id)
        .await
        .map(Json)
        .map_err(|e| map_error("billing_stats", e))
}

pub async fn get_billing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Billing>, (StatusCode, String)> {
    state
        .billing
        .get_billing(id)
        .await
        .map(Json)
        .map_err(|e| map_error("get_billing", e))
}

pub async fn issue_invoice(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(identity): Json<FiscalIdentity>,
) -> Result<Json<Invoice>, (StatusCode, String)> {
    state
        .billing
        .issue_invoice(id, identity)
        .await
        .map(Json)
        .map_err(|e| map_error("issue_invoice", e))
}

pub async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Billing>, (StatusCode, String)> {
    state
        .billing
        .confirm_payment(id)
        .await
        .map(Json)
        .map_err(|e| map_error("confirm_payment", e))
}

pub async fn cancel_billing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Billing>, (StatusCode, String)> {
    state
        .billing
        .cancel_billing(id)
        .await
        .map(Json)
        .map_err(|e| map_error("cancel_billing", e))
}

pub async fn upload_payment_proof(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<PaymentProofReceipt>, (StatusCode, String)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid upload: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "proof.bin".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid upload: {e}")))?;

        return state
            .billing
            .record_payment_proof(id, &file_name, &bytes, None)
            .await
            .map(Json)
            .map_err(|e| map_error("upload_payment_proof", e));
    }

    Err((
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid file: multipart field 'file' is required".to_string(),
    ))
}
