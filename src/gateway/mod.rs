use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::shared::models::{
    Appointment, AutomationSettings, Billing, BillingStatus, CampaignType, Clinic, Invoice,
    LoyaltyCommunication, NotificationLevel, Patient, Payment, SubscriptionStatus,
};

pub mod memory;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("unique constraint violated on {0}")]
    Conflict(&'static str),
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Contract against the hosted persistence platform. Row-level tenant
/// isolation is enforced by the platform; callers still pass the clinic id
/// on every tenant-scoped read so a binding can never widen a query.
#[async_trait]
pub trait DataGateway: Send + Sync {
    // clinics
    async fn insert_clinic(&self, clinic: Clinic) -> Result<(), GatewayError>;
    async fn get_clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>, GatewayError>;
    async fn update_clinic_subscription(
        &self,
        clinic_id: Uuid,
        status: SubscriptionStatus,
        next_billing_date: Option<DateTime<Utc>>,
    ) -> Result<(), GatewayError>;
    async fn list_clinics_with_loyalty(&self) -> Result<Vec<Clinic>, GatewayError>;

    // patients
    async fn insert_patient(&self, patient: Patient) -> Result<(), GatewayError>;
    async fn get_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, GatewayError>;
    async fn update_patient(&self, patient: Patient) -> Result<(), GatewayError>;
    /// All patients whose billing representative is `representative_id`,
    /// plus the representative's own row.
    async fn list_family_members(
        &self,
        clinic_id: Uuid,
        representative_id: Uuid,
    ) -> Result<Vec<Patient>, GatewayError>;
    async fn list_patients_page(
        &self,
        clinic_id: Uuid,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Patient>, GatewayError>;
    /// Conditional write used by the loyalty engine: flips the level only if
    /// the stored value still matches `expected`. Returns whether the write
    /// was applied.
    async fn set_notification_level_if(
        &self,
        patient_id: Uuid,
        expected: NotificationLevel,
        new: NotificationLevel,
    ) -> Result<bool, GatewayError>;

    // appointments
    async fn insert_appointment(&self, appointment: Appointment) -> Result<(), GatewayError>;
    async fn count_appointments(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
    ) -> Result<i64, GatewayError>;

    // billings
    async fn insert_billing(&self, billing: Billing) -> Result<(), GatewayError>;
    async fn get_billing(&self, billing_id: Uuid) -> Result<Option<Billing>, GatewayError>;
    async fn list_billings(&self, clinic_id: Uuid) -> Result<Vec<Billing>, GatewayError>;
    async fn count_billings(&self, clinic_id: Uuid) -> Result<i64, GatewayError>;
    async fn update_billing_status(
        &self,
        billing_id: Uuid,
        status: BillingStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<(), GatewayError>;
    async fn total_billed(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
    ) -> Result<BigDecimal, GatewayError>;

    // invoices
    async fn get_invoice_by_billing(
        &self,
        billing_id: Uuid,
    ) -> Result<Option<Invoice>, GatewayError>;
    /// Fails with `Conflict` if the billing already has an invoice.
    async fn insert_invoice(&self, invoice: Invoice) -> Result<(), GatewayError>;

    // payments
    /// Fails with `Conflict` if a payment with the same
    /// `provider_transaction_id` exists. This is the idempotency enforcement
    /// point for webhook re-delivery.
    async fn insert_payment(&self, payment: Payment) -> Result<(), GatewayError>;
    async fn list_payments(&self, clinic_id: Uuid) -> Result<Vec<Payment>, GatewayError>;

    // automation settings
    async fn upsert_automation_settings(
        &self,
        settings: AutomationSettings,
    ) -> Result<(), GatewayError>;
    async fn get_automation_settings(
        &self,
        clinic_id: Uuid,
    ) -> Result<Option<AutomationSettings>, GatewayError>;

    // loyalty communications
    async fn insert_communication(
        &self,
        communication: LoyaltyCommunication,
    ) -> Result<(), GatewayError>;
    async fn find_communications_since(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
        campaign_type: CampaignType,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoyaltyCommunication>, GatewayError>;
}
