use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Trial,
    Start,
    Pro,
    Enterprise,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    PastDue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clinic {
    pub id: Uuid,
    pub name: String,
    pub subscription_tier: SubscriptionTier,
    pub subscription_status: SubscriptionStatus,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Standard,
    Vip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    /// Points at the family member who pays this patient's billings.
    /// `None` means the patient is their own billing representative.
    pub family_representative_id: Option<Uuid>,
    pub is_family_head: bool,
    pub family_relationship: Option<String>,
    pub notification_level: NotificationLevel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_billing_representative(&self) -> bool {
        self.is_family_head || self.family_representative_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Billing {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub invoice_number: String,
    pub amount: BigDecimal,
    pub description: String,
    pub status: BillingStatus,
    pub due_date: NaiveDate,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Billing {
    /// Overdue is a read-time view over pending billings past their due
    /// date; the persisted status only changes through explicit operations.
    pub fn effective_status(&self, today: NaiveDate) -> BillingStatus {
        if self.status == BillingStatus::Pending && self.due_date < today {
            BillingStatus::Overdue
        } else {
            self.status
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Generated,
    Signed,
    Authorized,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub billing_id: Uuid,
    pub clinic_id: Uuid,
    pub access_key: String,
    pub authorization_number: Option<String>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub xml_url: Option<String>,
    pub pdf_url: Option<String>,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Transfer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Append-only ledger row. Never updated after insertion; corrections are
/// new rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub billing_id: Option<Uuid>,
    pub provider: String,
    pub provider_transaction_id: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount: BigDecimal,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationSettings {
    pub clinic_id: Uuid,
    pub loyalty_enabled: bool,
    pub vip_welcome_enabled: bool,
    pub birthday_greet_enabled: bool,
    pub vip_threshold_appointments: i64,
    pub vip_threshold_amount: BigDecimal,
    pub vip_welcome_template: String,
    pub birthday_template: String,
}

impl AutomationSettings {
    pub fn disabled(clinic_id: Uuid) -> Self {
        Self {
            clinic_id,
            loyalty_enabled: false,
            vip_welcome_enabled: false,
            birthday_greet_enabled: false,
            vip_threshold_appointments: 10,
            vip_threshold_amount: BigDecimal::from(1000),
            vip_welcome_template: "Hi {first_name}, thank you for your loyalty to {clinic_name}! You are now a VIP patient.".to_string(),
            birthday_template: "Happy birthday, {first_name}! All of us at {clinic_name} wish you a great day.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignType {
    VipWelcome,
    Birthday,
}

/// Audit trail of every automated outreach; doubles as the de-duplication
/// oracle for the loyalty engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoyaltyCommunication {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub campaign_type: CampaignType,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
