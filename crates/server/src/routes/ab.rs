use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::USER_AGENT},
    response::Json as ResponseJson,
    routing::{get, post, put},
};
use db::models::ab_testing::{AbConfig, AbEvent, AbExperiment, AbExperimentWithVariants};
use services::services::ab_testing::{
    AbTestingService, CreateExperiment, ExperimentList, ListExperimentsQuery, RecordEvent,
    UpdateAbConfig, UpdateExperimentStatus, VariantAssignment, VisitorContext,
};
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{
    DeploymentImpl,
    error::{ApiError, ApiJson, ApiQuery},
};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Client IP from `x-forwarded-for` (first hop), then `x-real-ip`.
///
/// Only the first hop is hashed, so a visitor keeps the same bucket when proxies append hops.
pub fn client_ip(headers: &HeaderMap) -> Option<&str> {
    header(headers, "x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header(headers, "x-real-ip"))
}

fn visitor(headers: &HeaderMap) -> VisitorContext {
    VisitorContext::new(
        headers.get(USER_AGENT).and_then(|v| v.to_str().ok()),
        client_ip(headers),
    )
}

/// GET /api/ab/variant
/// Public endpoint, the assignment is the top-level body without the `ApiResponse` envelope
pub async fn get_variant(
    State(deployment): State<DeploymentImpl>,
    headers: HeaderMap,
) -> Result<ResponseJson<VariantAssignment>, ApiError> {
    let assignment =
        AbTestingService::assign_variant(&deployment.db().pool, &visitor(&headers)).await?;
    Ok(ResponseJson(assignment))
}

/// POST /api/ab/event
/// Click and conversion tracking; views are logged by `GET /api/ab/variant`
pub async fn record_event(
    State(deployment): State<DeploymentImpl>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<RecordEvent>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<AbEvent>>), ApiError> {
    let event =
        AbTestingService::record_event(&deployment.db().pool, payload, &visitor(&headers)).await?;
    Ok((StatusCode::CREATED, ResponseJson(ApiResponse::success(event))))
}

/// GET /api/ab/experiments
pub async fn list_experiments(
    State(deployment): State<DeploymentImpl>,
    ApiQuery(query): ApiQuery<ListExperimentsQuery>,
) -> Result<ResponseJson<ApiResponse<ExperimentList>>, ApiError> {
    let list = AbTestingService::list_experiments(&deployment.db().pool, query).await?;
    Ok(ResponseJson(ApiResponse::success(list)))
}

/// POST /api/ab/experiments
pub async fn create_experiment(
    State(deployment): State<DeploymentImpl>,
    ApiJson(payload): ApiJson<CreateExperiment>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<AbExperimentWithVariants>>), ApiError> {
    let experiment = AbTestingService::create_experiment(&deployment.db().pool, payload).await?;
    Ok((
        StatusCode::CREATED,
        ResponseJson(ApiResponse::success_with_message(
            experiment,
            "Experiment erfolgreich erstellt",
        )),
    ))
}

/// PUT /api/ab/experiments/{id}/status
pub async fn set_experiment_status(
    State(deployment): State<DeploymentImpl>,
    Path(experiment_id): Path<Uuid>,
    ApiJson(payload): ApiJson<UpdateExperimentStatus>,
) -> Result<ResponseJson<ApiResponse<AbExperiment>>, ApiError> {
    let experiment =
        AbTestingService::set_experiment_status(&deployment.db().pool, experiment_id, payload.status)
            .await?;
    Ok(ResponseJson(ApiResponse::success(experiment)))
}

/// GET /api/ab/config
pub async fn get_config(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<AbConfig>>, ApiError> {
    let config = AbTestingService::get_config(&deployment.db().pool).await?;
    Ok(ResponseJson(ApiResponse::success(config)))
}

/// PUT /api/ab/config
pub async fn update_config(
    State(deployment): State<DeploymentImpl>,
    ApiJson(payload): ApiJson<UpdateAbConfig>,
) -> Result<ResponseJson<ApiResponse<AbConfig>>, ApiError> {
    let config = AbTestingService::update_config(&deployment.db().pool, payload).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        config,
        "A/B-Konfiguration gespeichert",
    )))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new()
        .route("/ab/variant", get(get_variant))
        .route("/ab/event", post(record_event))
        .route(
            "/ab/experiments",
            get(list_experiments).post(create_experiment),
        )
        .route("/ab/experiments/{id}/status", put(set_experiment_status))
        .route("/ab/config", get(get_config).put(update_config))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), None);

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(client_ip(&headers), Some("198.51.100.4"));

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), Some("203.0.113.7"));
    }
}
