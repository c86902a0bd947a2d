use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, put},
};
use db::models::invoice::InvoiceWithItems;
use services::services::invoice::{
    CreateInvoice, IntegrityReport, InvoicePage, InvoiceService, ListInvoicesQuery, StatusChange,
    UpdateInvoice, UpdateInvoiceStatus,
};
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{
    DeploymentImpl,
    error::{ApiError, ApiJson, ApiQuery},
};

/// GET /api/invoices
pub async fn list_invoices(
    State(deployment): State<DeploymentImpl>,
    ApiQuery(query): ApiQuery<ListInvoicesQuery>,
) -> Result<ResponseJson<ApiResponse<InvoicePage>>, ApiError> {
    let page = InvoiceService::list(&deployment.db().pool, &query).await?;
    Ok(ResponseJson(ApiResponse::success(page)))
}

/// POST /api/invoices
pub async fn create_invoice(
    State(deployment): State<DeploymentImpl>,
    ApiJson(payload): ApiJson<CreateInvoice>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<InvoiceWithItems>>), ApiError> {
    let invoice = InvoiceService::create(&deployment.db().pool, payload).await?;
    Ok((
        StatusCode::CREATED,
        ResponseJson(ApiResponse::success_with_message(
            invoice,
            "Rechnung erfolgreich erstellt",
        )),
    ))
}

/// GET /api/invoices/{id}
pub async fn get_invoice(
    State(deployment): State<DeploymentImpl>,
    Path(invoice_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<InvoiceWithItems>>, ApiError> {
    let invoice = InvoiceService::get(&deployment.db().pool, invoice_id).await?;
    Ok(ResponseJson(ApiResponse::success(invoice)))
}

/// PUT /api/invoices/{id}
/// Only drafts can be edited
pub async fn update_invoice(
    State(deployment): State<DeploymentImpl>,
    Path(invoice_id): Path<Uuid>,
    ApiJson(payload): ApiJson<UpdateInvoice>,
) -> Result<ResponseJson<ApiResponse<InvoiceWithItems>>, ApiError> {
    let invoice = InvoiceService::update(&deployment.db().pool, invoice_id, payload).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        invoice,
        "Rechnung erfolgreich aktualisiert",
    )))
}

/// DELETE /api/invoices/{id}
/// Soft cancel, the invoice stays in the ledger with status `cancelled`
pub async fn cancel_invoice(
    State(deployment): State<DeploymentImpl>,
    Path(invoice_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<StatusChange>>, ApiError> {
    let change = InvoiceService::cancel(&deployment.db().pool, invoice_id).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        change,
        "Rechnung erfolgreich storniert",
    )))
}

/// PUT /api/invoices/status
pub async fn change_invoice_status(
    State(deployment): State<DeploymentImpl>,
    ApiJson(payload): ApiJson<UpdateInvoiceStatus>,
) -> Result<ResponseJson<ApiResponse<StatusChange>>, ApiError> {
    let change =
        InvoiceService::change_status(&deployment.db().pool, payload.invoice_id, payload.status)
            .await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        change,
        "Status erfolgreich geändert",
    )))
}

/// GET /api/invoices/{id}/verify
pub async fn verify_invoice(
    State(deployment): State<DeploymentImpl>,
    Path(invoice_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<IntegrityReport>>, ApiError> {
    let report = InvoiceService::verify(&deployment.db().pool, invoice_id).await?;
    Ok(ResponseJson(ApiResponse::success(report)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new()
        .route("/invoices", get(list_invoices).post(create_invoice))
        .route("/invoices/status", put(change_invoice_status))
        .route(
            "/invoices/{id}",
            get(get_invoice).put(update_invoice).delete(cancel_invoice),
        )
        .route("/invoices/{id}/verify", get(verify_invoice))
}
