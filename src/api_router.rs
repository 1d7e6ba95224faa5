//! Combines the API endpoints from the specialized modules into a unified
//! router.

use axum::{routing::get, routing::post, Router};
use std::sync::Arc;

use crate::shared::state::AppState;

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // ===== Payment provider callbacks (subscription module) =====
        .route("/webhooks/payments", post(crate::subscription::api::payment_webhook))
        // ===== Family units (family module) =====
        .route("/patients/:id/family", get(crate::family::api::get_family))
        .route(
            "/patients/:id/representative",
            post(crate::family::api::assign_representative),
        )
        // ===== Billing & invoicing (billing module) =====
        .route("/billing/create", post(crate::billing::api::create_billing))
        .route("/billing/list", get(crate::billing::api::list_billings))
        .route("/billing/stats", get(crate::billing::api::billing_stats))
        .route("/billing/:id", get(crate::billing::api::get_billing))
        .route("/billing/:id/invoice", post(crate::billing::api::issue_invoice))
        .route(
            "/billing/:id/payment-proof",
            post(crate::billing::api::upload_payment_proof),
        )
        .route(
            "/billing/:id/confirm-payment",
            post(crate::billing::api::confirm_payment),
        )
        .route("/billing/:id/cancel", post(crate::billing::api::cancel_billing))
        // ===== Loyalty automation (loyalty module) =====
        .route("/loyalty/run", post(crate::loyalty::api::run_loyalty))
}
