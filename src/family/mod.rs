use std::collections::HashMap;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::gateway::{DataGateway, GatewayError};
use crate::shared::models::Patient;

pub mod api;

/// Fixed palette used to correlate family groups in the UI. The group index
/// must be stable across repeated resolutions of the same data.
pub const GROUP_PALETTE_SIZE: usize = 8;

/// Representative chains are single-level by contract, but nothing in the
/// platform schema prevents a representative from itself pointing at another
/// patient. The resolver walks such chains to the top-most node instead of
/// failing, bounded to avoid cycles in corrupt data.
const MAX_CHAIN_HOPS: usize = 8;

#[derive(Debug)]
pub enum FamilyError {
    Gateway(GatewayError),
    PatientNotFound(Uuid),
    RepresentativeNotFound(Uuid),
    SelfReference,
    CrossClinic,
    MultiLevelChain(Uuid),
    HasDependents(Uuid),
}

impl std::fmt::Display for FamilyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gateway(e) => write!(f, "Gateway error: {e}"),
            Self::PatientNotFound(id) => write!(f, "Patient not found: {id}"),
            Self::RepresentativeNotFound(id) => write!(f, "Representative not found: {id}"),
            Self::SelfReference => write!(f, "A patient cannot be their own representative"),
            Self::CrossClinic => write!(f, "Representative belongs to a different clinic"),
            Self::MultiLevelChain(id) => {
                write!(f, "Representative {id} is itself a dependent")
            }
            Self::HasDependents(id) => {
                write!(f, "Patient {id} has dependents and cannot become one")
            }
        }
    }
}

impl std::error::Error for FamilyError {}

impl From<GatewayError> for FamilyError {
    fn from(err: GatewayError) -> Self {
        Self::Gateway(err)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FamilyMember {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub is_family_head: bool,
    pub family_relationship: Option<String>,
    pub family_representative_id: Option<Uuid>,
    pub appointments_count: i64,
    pub total_billed: BigDecimal,
    pub group_index: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FamilyUnit {
    pub billers: Vec<FamilyMember>,
    pub dependents: Vec<FamilyMember>,
}

impl FamilyUnit {
    pub fn empty() -> Self {
        Self {
            billers: Vec::new(),
            dependents: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.billers.is_empty() && self.dependents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.billers.len() + self.dependents.len()
    }

    pub fn members(&self) -> impl Iterator<Item = &FamilyMember> {
        self.billers.iter().chain(self.dependents.iter())
    }
}

pub struct FamilyResolver {
    gateway: Arc<dyn DataGateway>,
}

impl FamilyResolver {
    pub fn new(gateway: Arc<dyn DataGateway>) -> Self {
        Self { gateway }
    }

    /// Resolves the full family unit of `patient_id`, annotated with
    /// computed statistics and partitioned into billers and dependents.
    ///
    /// An unknown patient id resolves to the empty unit; a gateway failure
    /// surfaces as an error. The two are semantically different and callers
    /// must not conflate them.
    pub async fn resolve(&self, patient_id: Uuid) -> Result<FamilyUnit, FamilyError> {
        let Some(patient) = self.gateway.get_patient(patient_id).await? else {
            return Ok(FamilyUnit::empty());
        };

        let top = self.walk_to_representative(&patient).await?;
        let mut members = self
            .gateway
            .list_family_members(patient.clinic_id, top.id)
            .await?;
        if !members.iter().any(|m| m.id == patient.id) {
            // A malformed chain can leave the seed outside the one-level
            // member query; the seed is still part of its own unit.
            members.push(patient.clone());
        }

        let mut biller_ids: Vec<Uuid> = members
            .iter()
            .filter(|m| m.is_billing_representative())
            .map(|m| m.id)
            .collect();
        biller_ids.sort();
        let group_of: HashMap<Uuid, usize> = biller_ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (*id, idx % GROUP_PALETTE_SIZE))
            .collect();

        let mut unit = FamilyUnit::empty();
        for member in members {
            let appointments_count = self
                .gateway
                .count_appointments(member.clinic_id, member.id)
                .await?;
            let total_billed = self
                .gateway
                .total_billed(member.clinic_id, member.id)
                .await?;

            let is_biller = member.is_billing_representative();
            let effective_representative = if is_biller {
                member.id
            } else {
                member.family_representative_id.unwrap_or(top.id)
            };
            let group_index = group_of
                .get(&effective_representative)
                .copied()
                .or_else(|| group_of.get(&top.id).copied())
                .unwrap_or(0);

            let annotated = FamilyMember {
                id: member.id,
                clinic_id: member.clinic_id,
                first_name: member.first_name,
                last_name: member.last_name,
                is_family_head: member.is_family_head,
                family_relationship: member.family_relationship,
                family_representative_id: member.family_representative_id,
                appointments_count,
                total_billed,
                group_index,
            };

            if is_biller {
                unit.billers.push(annotated);
            } else {
                unit.dependents.push(annotated);
            }
        }

        Ok(unit)
    }

    /// Links `patient_id` to a billing representative, or detaches it when
    /// `representative_id` is `None`. Multi-level chains are rejected here
    /// so the stored graph stays single-level.
    pub async fn assign_representative(
        &self,
        patient_id: Uuid,
        representative_id: Option<Uuid>,
        relationship: Option<String>,
    ) -> Result<Patient, FamilyError> {
        let mut patient = self
            .gateway
            .get_patient(patient_id)
            .await?
            .ok_or(FamilyError::PatientNotFound(patient_id))?;

        match representative_id {
            Some(rep_id) => {
                if rep_id == patient_id {
                    return Err(FamilyError::SelfReference);
                }
                let representative = self
                    .gateway
                    .get_patient(rep_id)
                    .await?
                    .ok_or(FamilyError::RepresentativeNotFound(rep_id))?;
                if representative.clinic_id != patient.clinic_id {
                    return Err(FamilyError::CrossClinic);
                }
                if representative.family_representative_id.is_some() {
                    return Err(FamilyError::MultiLevelChain(rep_id));
                }
                let own_unit = self
                    .gateway
                    .list_family_members(patient.clinic_id, patient_id)
                    .await?;
                if own_unit.iter().any(|m| m.id != patient_id) {
                    return Err(FamilyError::HasDependents(patient_id));
                }

                patient.family_representative_id = Some(rep_id);
                patient.family_relationship = relationship;
                patient.is_family_head = false;
            }
            None => {
                patient.family_representative_id = None;
                patient.family_relationship = None;
                patient.is_family_head = true;
            }
        }

        patient.updated_at = chrono::Utc::now();
        self.gateway.update_patient(patient.clone()).await?;
        Ok(patient)
    }

    async fn walk_to_representative(&self, patient: &Patient) -> Result<Patient, FamilyError> {
        let mut current = patient.clone();
        let mut hops = 0;
        while let Some(rep_id) = current.family_representative_id {
            if hops >= MAX_CHAIN_HOPS {
                warn!(
                    patient_id = %patient.id,
                    "representative chain exceeds {} hops, using {}",
                    MAX_CHAIN_HOPS,
                    current.id
                );
                break;
            }
            match self.gateway.get_patient(rep_id).await? {
                Some(rep) => {
                    if rep.family_representative_id.is_some() {
                        warn!(
                            patient_id = %patient.id,
                            representative_id = %rep.id,
                            "multi-level representative chain in stored data"
                        );
                    }
                    current = rep;
                }
                None => {
                    warn!(
                        patient_id = %current.id,
                        representative_id = %rep_id,
                        "dangling representative reference"
                    );
                    break;
                }
            }
            hops += 1;
        }
        Ok(current)
    }
}
