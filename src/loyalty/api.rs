use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use tracing::error;

use crate::loyalty::EmittedCommunication;
use crate::shared::state::AppState;

/// Parameterless batch trigger, also wired to the cron scheduler. Returns
/// the emitted-communication summary for observability.
pub async fn run_loyalty(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<EmittedCommunication>>, (StatusCode, String)> {
    match state.loyalty.run().await {
        Ok(summary) => Ok(Json(summary.emitted)),
        Err(e) => {
            error!("loyalty run failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "temporary failure, please retry".to_string(),
            ))
        }
    }
}
