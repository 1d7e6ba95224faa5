use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::gateway::{DataGateway, GatewayError};
use crate::shared::models::{
    Appointment, AutomationSettings, Billing, BillingStatus, CampaignType, Clinic, Invoice,
    LoyaltyCommunication, NotificationLevel, Patient, Payment, SubscriptionStatus,
};

#[derive(Default)]
struct Tables {
    clinics: HashMap<Uuid, Clinic>,
    patients: HashMap<Uuid, Patient>,
    appointments: HashMap<Uuid, Appointment>,
    billings: HashMap<Uuid, Billing>,
    invoices: HashMap<Uuid, Invoice>,
    invoice_by_billing: HashMap<Uuid, Uuid>,
    payments: Vec<Payment>,
    payment_txn_ids: HashSet<String>,
    automation: HashMap<Uuid, AutomationSettings>,
    communications: Vec<LoyaltyCommunication>,
}

/// Reference gateway used for local operation and by the test suite. All
/// tables live behind a single lock so conditional check-then-write
/// operations are atomic, matching the unique constraints a production
/// binding relies on.
pub struct InMemoryGateway {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataGateway for InMemoryGateway {
    async fn insert_clinic(&self, clinic: Clinic) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        tables.clinics.insert(clinic.id, clinic);
        Ok(())
    }

    async fn get_clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>, GatewayError> {
        let tables = self.tables.read().await;
        Ok(tables.clinics.get(&clinic_id).cloned())
    }

    async fn update_clinic_subscription(
        &self,
        clinic_id: Uuid,
        status: SubscriptionStatus,
        next_billing_date: Option<DateTime<Utc>>,
    ) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        let clinic = tables
            .clinics
            .get_mut(&clinic_id)
            .ok_or(GatewayError::NotFound("clinic"))?;
        clinic.subscription_status = status;
        if let Some(date) = next_billing_date {
            clinic.next_billing_date = Some(date);
        }
        clinic.updated_at = Utc::now();
        Ok(())
    }

    async fn list_clinics_with_loyalty(&self) -> Result<Vec<Clinic>, GatewayError> {
        let tables = self.tables.read().await;
        let mut clinics: Vec<Clinic> = tables
            .clinics
            .values()
            .filter(|c| {
                tables
                    .automation
                    .get(&c.id)
                    .map(|s| s.loyalty_enabled)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        clinics.sort_by_key(|c| c.id);
        Ok(clinics)
    }

    async fn insert_patient(&self, patient: Patient) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        tables.patients.insert(patient.id, patient);
        Ok(())
    }

    async fn get_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, GatewayError> {
        let tables = self.tables.read().await;
        Ok(tables.patients.get(&patient_id).cloned())
    }

    async fn update_patient(&self, patient: Patient) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        if !tables.patients.contains_key(&patient.id) {
            return Err(GatewayError::NotFound("patient"));
        }
        tables.patients.insert(patient.id, patient);
        Ok(())
    }

    async fn list_family_members(
        &self,
        clinic_id: Uuid,
        representative_id: Uuid,
    ) -> Result<Vec<Patient>, GatewayError> {
        let tables = self.tables.read().await;
        let mut members: Vec<Patient> = tables
            .patients
            .values()
            .filter(|p| p.clinic_id == clinic_id)
            .filter(|p| {
                p.id == representative_id || p.family_representative_id == Some(representative_id)
            })
            .cloned()
            .collect();
        members.sort_by_key(|p| p.id);
        Ok(members)
    }

    async fn list_patients_page(
        &self,
        clinic_id: Uuid,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Patient>, GatewayError> {
        let tables = self.tables.read().await;
        let mut patients: Vec<Patient> = tables
            .patients
            .values()
            .filter(|p| p.clinic_id == clinic_id)
            .cloned()
            .collect();
        patients.sort_by_key(|p| p.id);
        Ok(patients.into_iter().skip(offset).take(limit).collect())
    }

    async fn set_notification_level_if(
        &self,
        patient_id: Uuid,
        expected: NotificationLevel,
        new: NotificationLevel,
    ) -> Result<bool, GatewayError> {
        let mut tables = self.tables.write().await;
        let patient = tables
            .patients
            .get_mut(&patient_id)
            .ok_or(GatewayError::NotFound("patient"))?;
        if patient.notification_level != expected {
            return Ok(false);
        }
        patient.notification_level = new;
        patient.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_appointment(&self, appointment: Appointment) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        tables.appointments.insert(appointment.id, appointment);
        Ok(())
    }

    async fn count_appointments(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
    ) -> Result<i64, GatewayError> {
        let tables = self.tables.read().await;
        let count = tables
            .appointments
            .values()
            .filter(|a| a.clinic_id == clinic_id && a.patient_id == patient_id)
            .count();
        Ok(count as i64)
    }

    async fn insert_billing(&self, billing: Billing) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        tables.billings.insert(billing.id, billing);
        Ok(())
    }

    async fn get_billing(&self, billing_id: Uuid) -> Result<Option<Billing>, GatewayError> {
        let tables = self.tables.read().await;
        Ok(tables.billings.get(&billing_id).cloned())
    }

    async fn list_billings(&self, clinic_id: Uuid) -> Result<Vec<Billing>, GatewayError> {
        let tables = self.tables.read().await;
        let mut billings: Vec<Billing> = tables
            .billings
            .values()
            .filter(|b| b.clinic_id == clinic_id)
            .cloned()
            .collect();
        billings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(billings)
    }

    async fn count_billings(&self, clinic_id: Uuid) -> Result<i64, GatewayError> {
        let tables = self.tables.read().await;
        let count = tables
            .billings
            .values()
            .filter(|b| b.clinic_id == clinic_id)
            .count();
        Ok(count as i64)
    }

    async fn update_billing_status(
        &self,
        billing_id: Uuid,
        status: BillingStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        let billing = tables
            .billings
            .get_mut(&billing_id)
            .ok_or(GatewayError::NotFound("billing"))?;
        billing.status = status;
        if paid_at.is_some() {
            billing.paid_at = paid_at;
        }
        billing.updated_at = Utc::now();
        Ok(())
    }

    async fn total_billed(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
    ) -> Result<BigDecimal, GatewayError> {
        let tables = self.tables.read().await;
        let total = tables
            .billings
            .values()
            .filter(|b| b.clinic_id == clinic_id && b.patient_id == patient_id)
            .filter(|b| b.status != BillingStatus::Cancelled)
            .fold(BigDecimal::from(0), |acc, b| acc + &b.amount);
        Ok(total)
    }

    async fn get_invoice_by_billing(
        &self,
        billing_id: Uuid,
    ) -> Result<Option<Invoice>, GatewayError> {
        let tables = self.tables.read().await;
        let invoice = tables
            .invoice_by_billing
            .get(&billing_id)
            .and_then(|id| tables.invoices.get(id))
            .cloned();
        Ok(invoice)
    }

    async fn insert_invoice(&self, invoice: Invoice) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        if tables.invoice_by_billing.contains_key(&invoice.billing_id) {
            return Err(GatewayError::Conflict("invoices.billing_id"));
        }
        tables.invoice_by_billing.insert(invoice.billing_id, invoice.id);
        tables.invoices.insert(invoice.id, invoice);
        Ok(())
    }

    async fn insert_payment(&self, payment: Payment) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        if tables
            .payment_txn_ids
            .contains(&payment.provider_transaction_id)
        {
            return Err(GatewayError::Conflict("payments.provider_transaction_id"));
        }
        tables
            .payment_txn_ids
            .insert(payment.provider_transaction_id.clone());
        tables.payments.push(payment);
        Ok(())
    }

    async fn list_payments(&self, clinic_id: Uuid) -> Result<Vec<Payment>, GatewayError> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .iter()
            .filter(|p| p.clinic_id == clinic_id)
            .cloned()
            .collect())
    }

    async fn upsert_automation_settings(
        &self,
        settings: AutomationSettings,
    ) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        tables.automation.insert(settings.clinic_id, settings);
        Ok(())
    }

    async fn get_automation_settings(
        &self,
        clinic_id: Uuid,
    ) -> Result<Option<AutomationSettings>, GatewayError> {
        let tables = self.tables.read().await;
        Ok(tables.automation.get(&clinic_id).cloned())
    }

    async fn insert_communication(
        &self,
        communication: LoyaltyCommunication,
    ) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        tables.communications.push(communication);
        Ok(())
    }

    async fn find_communications_since(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
        campaign_type: CampaignType,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoyaltyCommunication>, GatewayError> {
        let tables = self.tables.read().await;
        Ok(tables
            .communications
            .iter()
            .filter(|c| {
                c.clinic_id == clinic_id
                    && c.patient_id == patient_id
                    && c.campaign_type == campaign_type
                    && c.created_at >= since
            })
            .cloned()
            .collect())
    }
}
