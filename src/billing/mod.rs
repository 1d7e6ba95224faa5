use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::billing::invoice::FiscalProvider;
use crate::gateway::{DataGateway, GatewayError};
use crate::shared::models::{
    Billing, BillingStatus, Payment, PaymentMethod, PaymentStatus,
};
use crate::storage::{BlobStore, StorageError};

pub mod api;
pub mod invoice;

#[derive(Debug)]
pub enum BillingError {
    Validation { field: &'static str, message: String },
    BillingNotFound(Uuid),
    InvalidStatus(String),
    Gateway(GatewayError),
    Storage(StorageError),
    Fiscal(String),
}

impl std::fmt::Display for BillingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation { field, message } => write!(f, "Invalid {field}: {message}"),
            Self::BillingNotFound(id) => write!(f, "Billing not found: {id}"),
            Self::InvalidStatus(msg) => write!(f, "Invalid billing status: {msg}"),
            Self::Gateway(e) => write!(f, "Gateway error: {e}"),
            Self::Storage(e) => write!(f, "Storage error: {e}"),
            Self::Fiscal(e) => write!(f, "Fiscal provider error: {e}"),
        }
    }
}

impl std::error::Error for BillingError {}

impl From<GatewayError> for BillingError {
    fn from(err: GatewayError) -> Self {
        Self::Gateway(err)
    }
}

impl From<StorageError> for BillingError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBillingRequest {
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub amount: BigDecimal,
    pub description: String,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingView {
    #[serde(flatten)]
    pub billing: Billing,
    pub effective_status: BillingStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingStats {
    pub total_revenue: BigDecimal,
    pub pending_amount: BigDecimal,
    pub overdue_amount: BigDecimal,
    pub billing_count: i64,
    pub overdue_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentProofReceipt {
    pub proof_url: String,
    pub payment: Payment,
}

pub struct BillingService {
    gateway: Arc<dyn DataGateway>,
    blob_store: Arc<dyn BlobStore>,
    fiscal: Arc<dyn FiscalProvider>,
}

impl BillingService {
    pub fn new(
        gateway: Arc<dyn DataGateway>,
        blob_store: Arc<dyn BlobStore>,
        fiscal: Arc<dyn FiscalProvider>,
    ) -> Self {
        Self {
            gateway,
            blob_store,
            fiscal,
        }
    }

    pub(crate) fn gateway(&self) -> &Arc<dyn DataGateway> {
        &self.gateway
    }

    pub(crate) fn fiscal(&self) -> &Arc<dyn FiscalProvider> {
        &self.fiscal
    }

    pub async fn create_billing(
        &self,
        request: CreateBillingRequest,
    ) -> Result<Billing, BillingError> {
        if request.amount <= BigDecimal::from(0) {
            return Err(BillingError::Validation {
                field: "amount",
                message: "amount must be greater than zero".to_string(),
            });
        }
        let patient = self
            .gateway
            .get_patient(request.patient_id)
            .await?
            .ok_or(BillingError::Validation {
                field: "patient_id",
                message: format!("unknown patient {}", request.patient_id),
            })?;
        if patient.clinic_id != request.clinic_id {
            return Err(BillingError::Validation {
                field: "patient_id",
                message: "patient does not belong to this clinic".to_string(),
            });
        }

        let now = Utc::now();
        let billing = Billing {
            id: Uuid::new_v4(),
            clinic_id: request.clinic_id,
            patient_id: request.patient_id,
            invoice_number: self.generate_invoice_number(request.clinic_id).await?,
            amount: request.amount,
            description: request.description,
            status: BillingStatus::Pending,
            due_date: request.due_date,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };

        self.gateway.insert_billing(billing.clone()).await?;
        info!(billing_id = %billing.id, clinic_id = %billing.clinic_id, "billing created");
        Ok(billing)
    }

    pub async fn get_billing(&self, billing_id: Uuid) -> Result<Billing, BillingError> {
        self.gateway
            .get_billing(billing_id)
            .await?
            .ok_or(BillingError::BillingNotFound(billing_id))
    }

    pub async fn list_billings(&self, clinic_id: Uuid) -> Result<Vec<BillingView>, BillingError> {
        self.list_billings_as_of(clinic_id, Utc::now().date_naive())
            .await
    }

    pub async fn list_billings_as_of(
        &self,
        clinic_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<BillingView>, BillingError> {
        let billings = self.gateway.list_billings(clinic_id).await?;
        Ok(billings
            .into_iter()
            .map(|billing| BillingView {
                effective_status: billing.effective_status(today),
                billing,
            })
            .collect())
    }

    pub async fn stats(&self, clinic_id: Uuid) -> Result<BillingStats, BillingError> {
        self.stats_as_of(clinic_id, Utc::now().date_naive()).await
    }

    pub async fn stats_as_of(
        &self,
        clinic_id: Uuid,
        today: NaiveDate,
    ) -> Result<BillingStats, BillingError> {
        let billings = self.gateway.list_billings(clinic_id).await?;
        let mut stats = BillingStats {
            total_revenue: BigDecimal::from(0),
            pending_amount: BigDecimal::from(0),
            overdue_amount: BigDecimal::from(0),
            billing_count: billings.len() as i64,
            overdue_count: 0,
        };
        for billing in &billings {
            match billing.effective_status(today) {
                BillingStatus::Paid => stats.total_revenue += &billing.amount,
                BillingStatus::Pending => stats.pending_amount += &billing.amount,
                BillingStatus::Overdue => {
                    stats.overdue_amount += &billing.amount;
                    stats.overdue_count += 1;
                }
                BillingStatus::Cancelled => {}
            }
        }
        Ok(stats)
    }

    /// Staff confirmation that money actually arrived. This is the only
    /// manual path from `pending` to `paid`; proof upload alone never
    /// settles a billing.
    pub async fn confirm_payment(&self, billing_id: Uuid) -> Result<Billing, BillingError> {
        let billing = self.get_billing(billing_id).await?;
        match billing.status {
            BillingStatus::Paid => Ok(billing),
            BillingStatus::Cancelled => Err(BillingError::InvalidStatus(
                "cancelled billings cannot be paid".to_string(),
            )),
            BillingStatus::Pending | BillingStatus::Overdue => {
                let now = Utc::now();
                self.gateway
                    .update_billing_status(billing_id, BillingStatus::Paid, Some(now))
                    .await?;
                info!(billing_id = %billing_id, "billing confirmed paid");
                self.get_billing(billing_id).await
            }
        }
    }

    pub async fn cancel_billing(&self, billing_id: Uuid) -> Result<Billing, BillingError> {
        let billing = self.get_billing(billing_id).await?;
        match billing.status {
            BillingStatus::Cancelled => Ok(billing),
            BillingStatus::Paid => Err(BillingError::InvalidStatus(
                "paid billings cannot be cancelled".to_string(),
            )),
            BillingStatus::Pending | BillingStatus::Overdue => {
                self.gateway
                    .update_billing_status(billing_id, BillingStatus::Cancelled, None)
                    .await?;
                info!(billing_id = %billing_id, "billing cancelled");
                self.get_billing(billing_id).await
            }
        }
    }

    /// Patient-facing transfer-proof upload. Stores the artifact and appends
    /// a pending TRANSFER payment; the billing itself stays `pending` until
    /// staff confirm.
    pub async fn record_payment_proof(
        &self,
        billing_id: Uuid,
        file_name: &str,
        bytes: &[u8],
        amount: Option<BigDecimal>,
    ) -> Result<PaymentProofReceipt, BillingError> {
        let billing = self.get_billing(billing_id).await?;
        match billing.status {
            BillingStatus::Paid => {
                return Err(BillingError::InvalidStatus(
                    "billing is already paid".to_string(),
                ))
            }
            BillingStatus::Cancelled => {
                return Err(BillingError::InvalidStatus(
                    "billing is cancelled".to_string(),
                ))
            }
            BillingStatus::Pending | BillingStatus::Overdue => {}
        }

        let proof_url = self
            .blob_store
            .put("payment-proofs", file_name, bytes)
            .await?;

        let payment = Payment {
            id: Uuid::new_v4(),
            clinic_id: billing.clinic_id,
            billing_id: Some(billing.id),
            provider: "manual".to_string(),
            provider_transaction_id: format!("manual-{}", Uuid::new_v4()),
            method: PaymentMethod::Transfer,
            status: PaymentStatus::Pending,
            amount: amount.unwrap_or_else(|| billing.amount.clone()),
            metadata: serde_json::json!({ "proof_url": proof_url }),
            created_at: Utc::now(),
        };
        self.gateway.insert_payment(payment.clone()).await?;
        info!(
            billing_id = %billing.id,
            payment_id = %payment.id,
            "payment proof recorded, awaiting confirmation"
        );

        Ok(PaymentProofReceipt { proof_url, payment })
    }

    async fn generate_invoice_number(&self, clinic_id: Uuid) -> Result<String, BillingError> {
        // Display-only sequence, not a fiscal identifier. A concurrent
        // insert can produce a duplicate; the access key from the fiscal
        // provider is the authoritative id.
        let count = self.gateway.count_billings(clinic_id).await?;
        Ok(format!("INV-{:06}", count + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::invoice::LocalFiscalProvider;
    use crate::gateway::memory::InMemoryGateway;
    use crate::shared::models::NotificationLevel;
    use crate::shared::models::Patient;
    use crate::storage::LocalBlobStore;
    use std::str::FromStr;

    async fn service_with_patient() -> (BillingService, Uuid, Uuid, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let clinic_id = Uuid::new_v4();
        let patient = Patient {
            id: Uuid::new_v4(),
            clinic_id,
            first_name: "Carlos".to_string(),
            last_name: "Vera".to_string(),
            email: Some("carlos@example.com".to_string()),
            phone: None,
            birth_date: None,
            family_representative_id: None,
            is_family_head: true,
            family_relationship: None,
            notification_level: NotificationLevel::Standard,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let patient_id = patient.id;
        gateway.insert_patient(patient).await.unwrap();

        let service = BillingService::new(
            gateway,
            Arc::new(LocalBlobStore::new(
                dir.path().to_path_buf(),
                "http://localhost:8080/files".to_string(),
            )),
            Arc::new(LocalFiscalProvider::new("1790012345001".to_string())),
        );
        (service, clinic_id, patient_id, dir)
    }

    fn request(clinic_id: Uuid, patient_id: Uuid, amount: &str) -> CreateBillingRequest {
        CreateBillingRequest {
            clinic_id,
            patient_id,
            amount: BigDecimal::from_str(amount).unwrap(),
            description: "Orthodontic control".to_string(),
            due_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn create_billing_starts_pending_with_sequential_number() {
        let (service, clinic_id, patient_id, _dir) = service_with_patient().await;

        let billing = service
            .create_billing(request(clinic_id, patient_id, "120.50"))
            .await
            .unwrap();

        assert_eq!(billing.status, BillingStatus::Pending);
        assert_eq!(billing.invoice_number, "INV-000001");
        assert_eq!(billing.amount, BigDecimal::from_str("120.50").unwrap());

        let second = service
            .create_billing(request(clinic_id, patient_id, "80"))
            .await
            .unwrap();
        assert_eq!(second.invoice_number, "INV-000002");
    }

    #[tokio::test]
    async fn create_billing_rejects_non_positive_amounts() {
        let (service, clinic_id, patient_id, _dir) = service_with_patient().await;

        for amount in ["0", "-10"] {
            let err = service
                .create_billing(request(clinic_id, patient_id, amount))
                .await
                .unwrap_err();
            assert!(matches!(err, BillingError::Validation { field: "amount", .. }));
        }
    }

    #[tokio::test]
    async fn create_billing_rejects_foreign_patient() {
        let (service, _clinic_id, patient_id, _dir) = service_with_patient().await;

        let err = service
            .create_billing(request(Uuid::new_v4(), patient_id, "50"))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation { field: "patient_id", .. }));
    }

    #[tokio::test]
    async fn pending_billing_past_due_reads_as_overdue() {
        let (service, clinic_id, patient_id, _dir) = service_with_patient().await;
        service
            .create_billing(request(clinic_id, patient_id, "90"))
            .await
            .unwrap();

        let later = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        let views = service.list_billings_as_of(clinic_id, later).await.unwrap();
        assert_eq!(views[0].effective_status, BillingStatus::Overdue);
        assert_eq!(views[0].billing.status, BillingStatus::Pending);
    }

    #[tokio::test]
    async fn payment_proof_leaves_billing_pending() {
        let (service, clinic_id, patient_id, _dir) = service_with_patient().await;
        let billing = service
            .create_billing(request(clinic_id, patient_id, "75.25"))
            .await
            .unwrap();

        let receipt = service
            .record_payment_proof(billing.id, "transfer.png", b"proof", None)
            .await
            .unwrap();

        assert_eq!(receipt.payment.status, PaymentStatus::Pending);
        assert_eq!(receipt.payment.method, PaymentMethod::Transfer);
        assert_eq!(receipt.payment.amount, billing.amount);

        let after = service.get_billing(billing.id).await.unwrap();
        assert_eq!(after.status, BillingStatus::Pending);
    }

    #[tokio::test]
    async fn payment_proof_rejected_for_settled_billings() {
        let (service, clinic_id, patient_id, _dir) = service_with_patient().await;
        let billing = service
            .create_billing(request(clinic_id, patient_id, "75"))
            .await
            .unwrap();
        service.confirm_payment(billing.id).await.unwrap();

        let err = service
            .record_payment_proof(billing.id, "late.png", b"proof", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidStatus(_)));
    }

    #[tokio::test]
    async fn confirm_payment_is_terminal_and_idempotent() {
        let (service, clinic_id, patient_id, _dir) = service_with_patient().await;
        let billing = service
            .create_billing(request(clinic_id, patient_id, "200"))
            .await
            .unwrap();

        let paid = service.confirm_payment(billing.id).await.unwrap();
        assert_eq!(paid.status, BillingStatus::Paid);
        assert!(paid.paid_at.is_some());

        let again = service.confirm_payment(billing.id).await.unwrap();
        assert_eq!(again.paid_at, paid.paid_at);

        let err = service.cancel_billing(billing.id).await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidStatus(_)));
    }

    #[tokio::test]
    async fn cancelled_billing_cannot_be_paid() {
        let (service, clinic_id, patient_id, _dir) = service_with_patient().await;
        let billing = service
            .create_billing(request(clinic_id, patient_id, "60"))
            .await
            .unwrap();
        service.cancel_billing(billing.id).await.unwrap();

        let err = service.confirm_payment(billing.id).await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidStatus(_)));
    }

    #[tokio::test]
    async fn stats_sum_exactly_to_the_cent() {
        let (service, clinic_id, patient_id, _dir) = service_with_patient().await;
        // 0.10 + 0.20 is a classic binary-float trap; BigDecimal must not
        // lose the cent.
        let a = service
            .create_billing(request(clinic_id, patient_id, "0.10"))
            .await
            .unwrap();
        let b = service
            .create_billing(request(clinic_id, patient_id, "0.20"))
            .await
            .unwrap();
        service.confirm_payment(a.id).await.unwrap();
        service.confirm_payment(b.id).await.unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let stats = service.stats_as_of(clinic_id, today).await.unwrap();
        assert_eq!(stats.total_revenue, BigDecimal::from_str("0.30").unwrap());
    }
}
