use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

/// GET /api/health
pub async fn health(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<&'static str>>, ApiError> {
    sqlx::query("SELECT 1")
        .execute(&deployment.db().pool)
        .await?;
    Ok(ResponseJson(ApiResponse::success("ok")))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().route("/health", get(health))
}
