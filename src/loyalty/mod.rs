use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use cron::Schedule;
use serde::Serialize;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gateway::{DataGateway, GatewayError};
use crate::shared::models::{
    AutomationSettings, CampaignType, Clinic, LoyaltyCommunication, NotificationLevel, Patient,
};

pub mod api;

const PATIENT_PAGE_SIZE: usize = 100;

#[derive(Debug)]
pub enum LoyaltyError {
    Gateway(GatewayError),
}

impl std::fmt::Display for LoyaltyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gateway(e) => write!(f, "Gateway error: {e}"),
        }
    }
}

impl std::error::Error for LoyaltyError {}

impl From<GatewayError> for LoyaltyError {
    fn from(err: GatewayError) -> Self {
        Self::Gateway(err)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmittedCommunication {
    pub patient: String,
    pub clinic: String,
    #[serde(rename = "type")]
    pub campaign: CampaignType,
    pub patient_id: Uuid,
    pub clinic_id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub emitted: Vec<EmittedCommunication>,
    pub clinics_scanned: usize,
    pub patients_scanned: usize,
    pub failures: usize,
}

pub struct LoyaltyEngine {
    gateway: Arc<dyn DataGateway>,
}

impl LoyaltyEngine {
    pub fn new(gateway: Arc<dyn DataGateway>) -> Self {
        Self { gateway }
    }

    pub async fn run(&self) -> Result<RunSummary, LoyaltyError> {
        self.run_on(Utc::now().date_naive()).await
    }

    /// One batch pass over every clinic with loyalty automation enabled.
    /// A failure on one clinic or one patient is logged and skipped; the
    /// run always completes and reports what it emitted.
    pub async fn run_on(&self, today: NaiveDate) -> Result<RunSummary, LoyaltyError> {
        let clinics = self.gateway.list_clinics_with_loyalty().await?;
        let mut summary = RunSummary::default();

        for clinic in clinics {
            summary.clinics_scanned += 1;
            if let Err(e) = self.run_clinic(&clinic, today, &mut summary).await {
                warn!(clinic_id = %clinic.id, "loyalty run failed for clinic: {e}");
                summary.failures += 1;
            }
        }

        info!(
            clinics = summary.clinics_scanned,
            patients = summary.patients_scanned,
            emitted = summary.emitted.len(),
            failures = summary.failures,
            "loyalty run completed"
        );
        Ok(summary)
    }

    async fn run_clinic(
        &self,
        clinic: &Clinic,
        today: NaiveDate,
        summary: &mut RunSummary,
    ) -> Result<(), LoyaltyError> {
        let settings = self
            .gateway
            .get_automation_settings(clinic.id)
            .await?
            .unwrap_or_else(|| AutomationSettings::disabled(clinic.id));
        if !settings.loyalty_enabled {
            return Ok(());
        }

        let mut offset = 0;
        loop {
            let page = self
                .gateway
                .list_patients_page(clinic.id, offset, PATIENT_PAGE_SIZE)
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len();

            for patient in &page {
                summary.patients_scanned += 1;
                match self.classify_patient(clinic, &settings, patient, today).await {
                    Ok(mut emitted) => summary.emitted.append(&mut emitted),
                    Err(e) => {
                        warn!(
                            clinic_id = %clinic.id,
                            patient_id = %patient.id,
                            "classification failed for patient: {e}"
                        );
                        summary.failures += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// VIP and birthday classification are independent; a patient can
    /// receive both in the same run.
    async fn classify_patient(
        &self,
        clinic: &Clinic,
        settings: &AutomationSettings,
        patient: &Patient,
        today: NaiveDate,
    ) -> Result<Vec<EmittedCommunication>, LoyaltyError> {
        let mut emitted = Vec::new();

        if settings.vip_welcome_enabled && patient.notification_level != NotificationLevel::Vip {
            let appointments = self
                .gateway
                .count_appointments(clinic.id, patient.id)
                .await?;
            let billed = self.gateway.total_billed(clinic.id, patient.id).await?;
            let is_vip = appointments >= settings.vip_threshold_appointments
                || billed >= settings.vip_threshold_amount;

            if is_vip {
                // The level flip is the de-duplication mark and must land
                // before the communication so a rerun sees it.
                let promoted = self
                    .gateway
                    .set_notification_level_if(
                        patient.id,
                        NotificationLevel::Standard,
                        NotificationLevel::Vip,
                    )
                    .await?;
                if promoted {
                    self.emit(
                        clinic,
                        patient,
                        CampaignType::VipWelcome,
                        &settings.vip_welcome_template,
                        &mut emitted,
                    )
                    .await?;
                }
            }
        }

        if settings.birthday_greet_enabled {
            if let Some(birth_date) = patient.birth_date {
                if birth_date.month() == today.month() && birth_date.day() == today.day() {
                    let year_start = start_of_year(today);
                    let prior = self
                        .gateway
                        .find_communications_since(
                            clinic.id,
                            patient.id,
                            CampaignType::Birthday,
                            year_start,
                        )
                        .await?;
                    if prior.is_empty() {
                        self.emit(
                            clinic,
                            patient,
                            CampaignType::Birthday,
                            &settings.birthday_template,
                            &mut emitted,
                        )
                        .await?;
                    }
                }
            }
        }

        Ok(emitted)
    }

    async fn emit(
        &self,
        clinic: &Clinic,
        patient: &Patient,
        campaign: CampaignType,
        template: &str,
        emitted: &mut Vec<EmittedCommunication>,
    ) -> Result<(), LoyaltyError> {
        let message = render_template(template, &patient.first_name, &clinic.name);
        self.gateway
            .insert_communication(LoyaltyCommunication {
                id: Uuid::new_v4(),
                clinic_id: clinic.id,
                patient_id: patient.id,
                campaign_type: campaign,
                message,
                created_at: Utc::now(),
            })
            .await?;
        info!(
            clinic_id = %clinic.id,
            patient_id = %patient.id,
            campaign = ?campaign,
            "loyalty communication emitted"
        );
        emitted.push(EmittedCommunication {
            patient: patient.full_name(),
            clinic: clinic.name.clone(),
            campaign,
            patient_id: patient.id,
            clinic_id: clinic.id,
        });
        Ok(())
    }
}

fn render_template(template: &str, first_name: &str, clinic_name: &str) -> String {
    template
        .replace("{first_name}", first_name)
        .replace("{clinic_name}", clinic_name)
}

fn start_of_year(today: NaiveDate) -> DateTime<Utc> {
    let date = NaiveDate::from_ymd_opt(today.year(), 1, 1)
        .unwrap_or(today)
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default();
    Utc.from_utc_datetime(&date)
}

/// Cron-driven loop around the engine. One-minute tick granularity with a
/// last-run watermark, so a slow batch never double-fires.
pub async fn run_scheduler(engine: Arc<LoyaltyEngine>, schedule: Schedule) {
    info!("loyalty scheduler started");
    let mut ticker = interval(Duration::from_secs(60));
    let mut last_run: Option<DateTime<Utc>> = None;

    loop {
        ticker.tick().await;
        let now = Utc::now();
        let Some(next) = schedule.upcoming(Utc).next() else {
            continue;
        };
        if (next - now).num_minutes() >= 1 {
            continue;
        }
        if let Some(last) = last_run {
            if (now - last).num_minutes() < 1 {
                continue;
            }
        }
        match engine.run().await {
            Ok(summary) => info!(emitted = summary.emitted.len(), "scheduled loyalty run done"),
            Err(e) => error!("scheduled loyalty run failed: {e}"),
        }
        last_run = Some(now);
    }
}
