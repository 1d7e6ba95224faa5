use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::family::{FamilyError, FamilyUnit};
use crate::shared::models::Patient;
use crate::shared::state::AppState;

fn map_error(operation: &str, err: FamilyError) -> (StatusCode, String) {
    match err {
        FamilyError::Gateway(_) => {
            error!("{operation} failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "temporary failure, please retry".to_string(),
            )
        }
        FamilyError::PatientNotFound(_) | FamilyError::RepresentativeNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        FamilyError::SelfReference
        | FamilyError::CrossClinic
        | FamilyError::MultiLevelChain(_)
        | FamilyError::HasDependents(_) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
    }
}

pub async fn get_family(
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<FamilyUnit>, (StatusCode, String)> {
    state
        .family
        .resolve(patient_id)
        .await
        .map(Json)
        .map_err(|e| map_error("get_family", e))
}

#[derive(Debug, Deserialize)]
pub struct AssignRepresentativeRequest {
    pub representative_id: Option<Uuid>,
    pub relationship: Option<String>,
}

pub async fn assign_representative(
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<AssignRepresentativeRequest>,
) -> Result<Json<Patient>, (StatusCode, String)> {
    state
        .family
        .assign_representative(patient_id, req.representative_id, req.relationship)
        .await
        .map(Json)
        .map_err(|e| map_error("assign_representative", e))
}
