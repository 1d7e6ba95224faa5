use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::billing::{BillingError, BillingService};
use crate::gateway::GatewayError;
use crate::shared::models::{BillingStatus, Invoice, InvoiceStatus};

#[derive(Debug, Clone)]
pub enum FiscalError {
    ApiError(String),
    NetworkError(String),
    ParseError(String),
}

impl std::fmt::Display for FiscalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiError(e) => write!(f, "Fiscal API error: {e}"),
            Self::NetworkError(e) => write!(f, "Network error: {e}"),
            Self::ParseError(e) => write!(f, "Parse error: {e}"),
        }
    }
}

impl std::error::Error for FiscalError {}

/// Payer identity required on an electronic invoice. Every field must be
/// present before issuance; the provider is never called with blanks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalIdentity {
    pub payer_id: String,
    pub payer_id_type: String,
    pub payer_name: String,
    pub payer_email: String,
    pub payer_address: String,
}

impl FiscalIdentity {
    fn validate(&self) -> Result<(), &'static str> {
        let fields: [(&'static str, &str); 5] = [
            ("payer_id", &self.payer_id),
            ("payer_id_type", &self.payer_id_type),
            ("payer_name", &self.payer_name),
            ("payer_email", &self.payer_email),
            ("payer_address", &self.payer_address),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(name);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FiscalInvoiceRequest {
    pub billing_id: Uuid,
    pub clinic_id: Uuid,
    pub invoice_number: String,
    pub amount: BigDecimal,
    pub description: String,
    pub identity: FiscalIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalAuthorization {
    pub access_key: String,
    pub authorization_number: Option<String>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub xml_url: Option<String>,
    pub pdf_url: Option<String>,
    pub status: InvoiceStatus,
}

/// Contract with the electronic-invoicing authority. The reference provider
/// authorizes synchronously; a production binding may return GENERATED or
/// REJECTED and settle later through `check_status`.
#[async_trait]
pub trait FiscalProvider: Send + Sync {
    async fn generate_invoice(
        &self,
        request: &FiscalInvoiceRequest,
    ) -> Result<FiscalAuthorization, FiscalError>;
    async fn check_status(&self, access_key: &str) -> Result<InvoiceStatus, FiscalError>;
}

/// Synchronous always-authorizes provider used locally and in tests.
pub struct LocalFiscalProvider {
    ruc: String,
    sequence: AtomicU64,
}

impl LocalFiscalProvider {
    pub fn new(ruc: String) -> Self {
        Self {
            ruc,
            sequence: AtomicU64::new(1),
        }
    }

    // 49-digit numeric key: emission date, issuer RUC, then the local
    // sequence, zero-padded to the fiscal key width.
    fn access_key(&self, now: DateTime<Utc>, sequence: u64) -> String {
        let stem = format!(
            "{}{:0>13.13}{:09}",
            now.format("%d%m%Y"),
            self.ruc,
            sequence
        );
        format!("{:0<49}", stem)
    }
}

#[async_trait]
impl FiscalProvider for LocalFiscalProvider {
    async fn generate_invoice(
        &self,
        request: &FiscalInvoiceRequest,
    ) -> Result<FiscalAuthorization, FiscalError> {
        let now = Utc::now();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let access_key = self.access_key(now, sequence);
        info!(
            billing_id = %request.billing_id,
            access_key = %access_key,
            "invoice authorized by local fiscal provider"
        );
        Ok(FiscalAuthorization {
            authorization_number: Some(format!("{:010}", sequence)),
            authorized_at: Some(now),
            xml_url: Some(format!("https://sri.local/invoices/{access_key}.xml")),
            pdf_url: Some(format!("https://sri.local/invoices/{access_key}.pdf")),
            status: InvoiceStatus::Authorized,
            access_key,
        })
    }

    async fn check_status(&self, _access_key: &str) -> Result<InvoiceStatus, FiscalError> {
        Ok(InvoiceStatus::Authorized)
    }
}

/// REST binding for a hosted SRI bridge.
pub struct SriRestClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl SriRestClient {
    pub fn new(base_url: String, api_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_token,
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, FiscalError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FiscalError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            #[derive(Deserialize)]
            struct SriApiError {
                error: SriApiErrorDetail,
            }

            #[derive(Deserialize)]
            struct SriApiErrorDetail {
                message: String,
            }

            if let Ok(error) = serde_json::from_str::<SriApiError>(&body) {
                return Err(FiscalError::ApiError(error.error.message));
            }
            return Err(FiscalError::ApiError(format!("HTTP {status}: {body}")));
        }

        serde_json::from_str(&body).map_err(|e| FiscalError::ParseError(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct SriStatusResponse {
    status: InvoiceStatus,
}

#[async_trait]
impl FiscalProvider for SriRestClient {
    async fn generate_invoice(
        &self,
        request: &FiscalInvoiceRequest,
    ) -> Result<FiscalAuthorization, FiscalError> {
        let response = self
            .client
            .post(format!("{}/invoices", self.base_url))
            .bearer_auth(&self.api_token)
            .json(request)
            .send()
            .await
            .map_err(|e| FiscalError::NetworkError(e.to_string()))?;

        self.handle_response(response).await
    }

    async fn check_status(&self, access_key: &str) -> Result<InvoiceStatus, FiscalError> {
        let response = self
            .client
            .get(format!("{}/invoices/{}", self.base_url, access_key))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| FiscalError::NetworkError(e.to_string()))?;

        let parsed: SriStatusResponse = self.handle_response(response).await?;
        Ok(parsed.status)
    }
}

impl BillingService {
    /// Issues the electronic invoice for a billing. At most one invoice
    /// ever exists per billing: a repeat call returns the stored invoice
    /// unchanged, and a concurrent race is resolved by the gateway's
    /// uniqueness constraint.
    pub async fn issue_invoice(
        &self,
        billing_id: Uuid,
        identity: FiscalIdentity,
    ) -> Result<Invoice, BillingError> {
        identity
            .validate()
            .map_err(|field| BillingError::Validation {
                field,
                message: "required for invoice issuance".to_string(),
            })?;

        let billing = self.get_billing(billing_id).await?;
        if billing.status == BillingStatus::Cancelled {
            return Err(BillingError::InvalidStatus(
                "cancelled billings cannot be invoiced".to_string(),
            ));
        }

        if let Some(existing) = self.gateway().get_invoice_by_billing(billing_id).await? {
            return Ok(existing);
        }

        let request = FiscalInvoiceRequest {
            billing_id: billing.id,
            clinic_id: billing.clinic_id,
            invoice_number: billing.invoice_number.clone(),
            amount: billing.amount.clone(),
            description: billing.description.clone(),
            identity,
        };
        let authorization = self
            .fiscal()
            .generate_invoice(&request)
            .await
            .map_err(|e| BillingError::Fiscal(e.to_string()))?;

        let now = Utc::now();
        let invoice = Invoice {
            id: Uuid::new_v4(),
            billing_id: billing.id,
            clinic_id: billing.clinic_id,
            access_key: authorization.access_key,
            authorization_number: authorization.authorization_number,
            authorized_at: authorization.authorized_at,
            xml_url: authorization.xml_url,
            pdf_url: authorization.pdf_url,
            status: authorization.status,
            created_at: now,
            updated_at: now,
        };

        match self.gateway().insert_invoice(invoice.clone()).await {
            Ok(()) => Ok(invoice),
            Err(GatewayError::Conflict(_)) => self
                .gateway()
                .get_invoice_by_billing(billing_id)
                .await?
                .ok_or(BillingError::Gateway(GatewayError::NotFound("invoice"))),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::CreateBillingRequest;
    use crate::gateway::memory::InMemoryGateway;
    use crate::gateway::DataGateway;
    use crate::shared::models::{NotificationLevel, Patient};
    use crate::storage::LocalBlobStore;
    use chrono::NaiveDate;
    use std::str::FromStr;
    use std::sync::Arc;

    fn identity() -> FiscalIdentity {
        FiscalIdentity {
            payer_id: "0923456789".to_string(),
            payer_id_type: "cedula".to_string(),
            payer_name: "Carlos Vera".to_string(),
            payer_email: "carlos@example.com".to_string(),
            payer_address: "Av. Amazonas N34-451, Quito".to_string(),
        }
    }

    async fn service(
        fiscal: Arc<dyn FiscalProvider>,
    ) -> (BillingService, Arc<InMemoryGateway>, Uuid, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let clinic_id = Uuid::new_v4();
        let patient = Patient {
            id: Uuid::new_v4(),
            clinic_id,
            first_name: "Carlos".to_string(),
            last_name: "Vera".to_string(),
            email: None,
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
            gateway.clone(),
            Arc::new(LocalBlobStore::new(
                dir.path().to_path_buf(),
                "http://localhost:8080/files".to_string(),
            )),
            fiscal,
        );
        let billing = service
            .create_billing(CreateBillingRequest {
                clinic_id,
                patient_id,
                amount: BigDecimal::from_str("85.75").unwrap(),
                description: "Endodontic treatment".to_string(),
                due_date: NaiveDate::from_ymd_opt(2026, 9, 15).unwrap(),
            })
            .await
            .unwrap();
        (service, gateway, billing.id, dir)
    }

    #[tokio::test]
    async fn issuance_creates_an_authorized_invoice() {
        let fiscal = Arc::new(LocalFiscalProvider::new("1790012345001".to_string()));
        let (service, _gateway, billing_id, _dir) = service(fiscal).await;

        let invoice = service.issue_invoice(billing_id, identity()).await.unwrap();

        assert_eq!(invoice.status, InvoiceStatus::Authorized);
        assert_eq!(invoice.access_key.len(), 49);
        assert!(invoice.access_key.chars().all(|c| c.is_ascii_digit()));
        assert!(invoice.authorization_number.is_some());
        assert!(invoice.pdf_url.is_some());
    }

    #[tokio::test]
    async fn issuance_is_at_most_once() {
        let fiscal = Arc::new(LocalFiscalProvider::new("1790012345001".to_string()));
        let (service, gateway, billing_id, _dir) = service(fiscal).await;

        let first = service.issue_invoice(billing_id, identity()).await.unwrap();
        let second = service.issue_invoice(billing_id, identity()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.access_key, second.access_key);

        let stored = gateway
            .get_invoice_by_billing(billing_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, first.id);
    }

    #[tokio::test]
    async fn blank_fiscal_field_blocks_issuance() {
        let fiscal = Arc::new(LocalFiscalProvider::new("1790012345001".to_string()));
        let (service, gateway, billing_id, _dir) = service(fiscal).await;

        let mut incomplete = identity();
        incomplete.payer_address = "  ".to_string();

        let err = service
            .issue_invoice(billing_id, incomplete)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::Validation { field: "payer_address", .. }
        ));
        assert!(gateway
            .get_invoice_by_billing(billing_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn cancelled_billing_cannot_be_invoiced() {
        let fiscal = Arc::new(LocalFiscalProvider::new("1790012345001".to_string()));
        let (service, _gateway, billing_id, _dir) = service(fiscal).await;
        service.cancel_billing(billing_id).await.unwrap();

        let err = service
            .issue_invoice(billing_id, identity())
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidStatus(_)));
    }

    struct RejectingProvider;

    #[async_trait]
    impl FiscalProvider for RejectingProvider {
        async fn generate_invoice(
            &self,
            _request: &FiscalInvoiceRequest,
        ) -> Result<FiscalAuthorization, FiscalError> {
            Ok(FiscalAuthorization {
                access_key: "0".repeat(49),
                authorization_number: None,
                authorized_at: None,
                xml_url: None,
                pdf_url: None,
                status: InvoiceStatus::Rejected,
            })
        }

        async fn check_status(&self, _access_key: &str) -> Result<InvoiceStatus, FiscalError> {
            Ok(InvoiceStatus::Rejected)
        }
    }

    #[tokio::test]
    async fn rejected_authorization_is_stored_as_rejected() {
        let (service, _gateway, billing_id, _dir) = service(Arc::new(RejectingProvider)).await;

        let invoice = service.issue_invoice(billing_id, identity()).await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Rejected);
        assert!(invoice.authorized_at.is_none());
    }

    #[tokio::test]
    async fn rest_client_parses_authorization_response() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "access_key": "1".repeat(49),
            "authorization_number": "0000000042",
            "authorized_at": "2026-08-06T12:00:00Z",
            "xml_url": "https://sri.example/1.xml",
            "pdf_url": "https://sri.example/1.pdf",
            "status": "AUTHORIZED"
        });
        let mock = server
            .mock("POST", "/invoices")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = SriRestClient::new(server.url(), "test-token".to_string());
        let request = FiscalInvoiceRequest {
            billing_id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            invoice_number: "INV-000001".to_string(),
            amount: BigDecimal::from_str("85.75").unwrap(),
            description: "Endodontic treatment".to_string(),
            identity: identity(),
        };

        let authorization = client.generate_invoice(&request).await.unwrap();
        assert_eq!(authorization.status, InvoiceStatus::Authorized);
        assert_eq!(authorization.authorization_number.as_deref(), Some("0000000042"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rest_client_surfaces_api_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Regex("/invoices/.*".to_string()))
            .with_status(422)
            .with_body(r#"{"error":{"message":"invalid access key"}}"#)
            .create_async()
            .await;

        let client = SriRestClient::new(server.url(), "test-token".to_string());
        let err = client.check_status("not-a-key").await.unwrap_err();
        assert!(matches!(err, FiscalError::ApiError(ref m) if m == "invalid access key"));
    }
}
