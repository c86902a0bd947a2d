//! Invoice workflow: drafting, editing, status transitions and integrity checks.
//!
//! Every write recomputes `hash_sha256` and appends to `lopez_audit_logs` inside
//! the same transaction. Invoices are never deleted; cancelling is a status change.

use chrono::{Datelike, NaiveDate, Utc};
use db::{
    models::{
        audit_log::{AuditAction, AuditLog},
        invoice::{
            Invoice, InvoiceContents, InvoiceFilter, InvoiceItem, InvoiceStatus, InvoiceWithItems,
            NewInvoice, NewInvoiceItem,
        },
    },
    types::TextDecimal,
};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;
use uuid::Uuid;

use super::invoice_hash::{InvoiceHashData, calculate_invoice_hash, verify_invoice_hash};

const INVOICE_TABLE: &str = "lopez_invoices";
const DEFAULT_PAYMENT_TERMS: &str = "Zahlbar innerhalb 14 Tage ohne Abzug";
const DEFAULT_CURRENCY: &str = "EUR";
const DEFAULT_UNIT: &str = "Stk";
const DEFAULT_CREATED_BY: &str = "system";
const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invoice {0} not found")]
    NotFound(Uuid),
    #[error("invoice is {0} and can no longer be edited")]
    NotEditable(InvoiceStatus),
    #[error("invoice number {0} already exists")]
    DuplicateNumber(String),
    #[error("validation failed: {0}")]
    Validation(String),
}

fn default_tax_rate() -> Decimal {
    Decimal::new(1900, 2)
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct InvoiceItemInput {
    #[serde(default)]
    pub item_text: String,
    #[ts(type = "string")]
    pub qty: Decimal,
    pub unit: Option<String>,
    #[ts(type = "string")]
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateInvoice {
    pub invoice_number: Option<String>,
    pub customer_id: i64,
    pub project_id: Option<i64>,
    pub order_id: Option<i64>,
    pub issue_date: Option<NaiveDate>,
    pub service_date: Option<NaiveDate>,
    pub payment_terms: Option<String>,
    pub currency: Option<String>,
    #[ts(type = "string | null")]
    pub tax_rate: Option<Decimal>,
    #[serde(default)]
    pub items: Vec<InvoiceItemInput>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UpdateInvoice {
    pub issue_date: NaiveDate,
    pub service_date: Option<NaiveDate>,
    pub payment_terms: Option<String>,
    #[ts(type = "string | null")]
    pub tax_rate: Option<Decimal>,
    #[serde(default)]
    pub items: Vec<InvoiceItemInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UpdateInvoiceStatus {
    pub invoice_id: Uuid,
    pub status: InvoiceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct StatusChange {
    pub invoice_id: Uuid,
    pub old_status: InvoiceStatus,
    pub new_status: InvoiceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct IntegrityReport {
    pub invoice_id: Uuid,
    pub valid: bool,
    pub stored_hash: String,
    pub computed_hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct ListInvoicesQuery {
    pub customer_id: Option<i64>,
    pub project_id: Option<i64>,
    pub status: Option<InvoiceStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct InvoicePage {
    pub invoices: Vec<Invoice>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceTotals {
    pub net: Decimal,
    pub tax: Decimal,
    pub gross: Decimal,
}

/// Half away from zero, always carrying exactly two decimals.
fn round_cents(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

fn amount_overflow(what: &str) -> InvoiceError {
    InvoiceError::Validation(format!("{what} exceeds the supported amount range"))
}

/// Number line items 1..n and compute `net_line = qty * unit_price`.
pub fn build_lines(items: &[InvoiceItemInput]) -> Result<Vec<NewInvoiceItem>, InvoiceError> {
    if items.is_empty() {
        return Ok(vec![NewInvoiceItem {
            pos: 1,
            item_text: "Position 1".to_string(),
            qty: TextDecimal(Decimal::ONE),
            unit: DEFAULT_UNIT.to_string(),
            unit_price: TextDecimal(round_cents(Decimal::ZERO)),
            net_line: TextDecimal(round_cents(Decimal::ZERO)),
        }]);
    }

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let pos = i as i64 + 1;
            let item_text = if item.item_text.trim().is_empty() {
                format!("Position {pos}")
            } else {
                item.item_text.trim().to_string()
            };
            let net_line = item
                .qty
                .checked_mul(item.unit_price)
                .ok_or_else(|| amount_overflow(&format!("line {pos}")))?;
            Ok(NewInvoiceItem {
                pos,
                item_text,
                qty: TextDecimal(item.qty),
                unit: item
                    .unit
                    .clone()
                    .filter(|u| !u.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_UNIT.to_string()),
                unit_price: TextDecimal(item.unit_price),
                net_line: TextDecimal(round_cents(net_line)),
            })
        })
        .collect()
}

pub fn compute_totals(
    lines: &[NewInvoiceItem],
    tax_rate: Decimal,
) -> Result<InvoiceTotals, InvoiceError> {
    let net = lines
        .iter()
        .try_fold(Decimal::ZERO, |acc, line| acc.checked_add(line.net_line.0))
        .map(round_cents)
        .ok_or_else(|| amount_overflow("net amount"))?;
    let tax = net
        .checked_mul(tax_rate)
        .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
        .map(round_cents)
        .ok_or_else(|| amount_overflow("tax amount"))?;
    let gross = net
        .checked_add(tax)
        .ok_or_else(|| amount_overflow("gross amount"))?;
    Ok(InvoiceTotals { net, tax, gross })
}

fn validate_tax_rate(tax_rate: Decimal) -> Result<Decimal, InvoiceError> {
    if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE_HUNDRED {
        return Err(InvoiceError::Validation(format!(
            "tax_rate must be between 0 and 100, got {tax_rate}"
        )));
    }
    Ok(tax_rate)
}

fn validate_items(items: &[InvoiceItemInput]) -> Result<(), InvoiceError> {
    if let Some((i, _)) = items.iter().enumerate().find(|(_, item)| item.qty < Decimal::ZERO) {
        return Err(InvoiceError::Validation(format!(
            "item {} has a negative quantity",
            i + 1
        )));
    }
    Ok(())
}

fn hash_for(
    issue_date: NaiveDate,
    gross: Decimal,
    customer_id: i64,
    status: InvoiceStatus,
) -> String {
    calculate_invoice_hash(&InvoiceHashData::new(issue_date, gross, customer_id, status))
}

fn map_unique_violation(err: sqlx::Error, invoice_number: &str) -> InvoiceError {
    let is_unique_violation = err
        .as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation());
    if is_unique_violation {
        InvoiceError::DuplicateNumber(invoice_number.to_string())
    } else {
        InvoiceError::Database(err)
    }
}

pub struct InvoiceService;

impl InvoiceService {
    /// Create a draft invoice with its items; assigns the next `YYYY-####` number if none is given.
    pub async fn create(
        pool: &SqlitePool,
        data: CreateInvoice,
    ) -> Result<InvoiceWithItems, InvoiceError> {
        let tax_rate = validate_tax_rate(data.tax_rate.unwrap_or_else(default_tax_rate))?;
        validate_items(&data.items)?;

        let issue_date = data.issue_date.unwrap_or_else(|| Utc::now().date_naive());
        let service_date = data.service_date.unwrap_or(issue_date);
        let lines = build_lines(&data.items)?;
        let totals = compute_totals(&lines, tax_rate)?;

        let mut tx = pool.begin().await?;

        let invoice_number = match data.invoice_number.filter(|n| !n.trim().is_empty()) {
            Some(number) => number.trim().to_string(),
            None => {
                let year = issue_date.year();
                let next = Invoice::max_number_in_year(&mut *tx, year).await? + 1;
                format!("{year}-{next:04}")
            }
        };
        let created_by = data
            .created_by
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CREATED_BY.to_string());

        let new_invoice = NewInvoice {
            invoice_number: invoice_number.clone(),
            customer_id: data.customer_id,
            project_id: data.project_id,
            order_id: data.order_id,
            issue_date,
            service_date,
            payment_terms: data
                .payment_terms
                .unwrap_or_else(|| DEFAULT_PAYMENT_TERMS.to_string()),
            currency: data.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            net_amount: TextDecimal(totals.net),
            tax_rate: TextDecimal(tax_rate),
            tax_amount: TextDecimal(totals.tax),
            gross_amount: TextDecimal(totals.gross),
            hash_sha256: hash_for(issue_date, totals.gross, data.customer_id, InvoiceStatus::Draft),
            created_by: created_by.clone(),
        };

        let invoice = Invoice::create(&mut *tx, Uuid::new_v4(), &new_invoice)
            .await
            .map_err(|e| map_unique_violation(e, &invoice_number))?;

        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            items.push(InvoiceItem::create(&mut *tx, invoice.id, line).await?);
        }

        AuditLog::create(
            &mut *tx,
            Some(created_by.as_str()),
            AuditAction::InvoiceCreate,
            INVOICE_TABLE,
            invoice.id,
            Some(format!(
                "Rechnung erstellt (draft): {} (Netto: {} {}, Brutto: {} {})",
                invoice.invoice_number,
                totals.net,
                invoice.currency,
                totals.gross,
                invoice.currency
            )),
        )
        .await?;

        tx.commit().await?;

        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            gross_amount = %invoice.gross_amount,
            "Invoice created"
        );

        Ok(InvoiceWithItems { invoice, items })
    }

    pub async fn get(pool: &SqlitePool, invoice_id: Uuid) -> Result<InvoiceWithItems, InvoiceError> {
        let invoice = Invoice::find_by_id(pool, invoice_id)
            .await?
            .ok_or(InvoiceError::NotFound(invoice_id))?;
        let items = InvoiceItem::find_by_invoice_id(pool, invoice_id).await?;
        Ok(InvoiceWithItems { invoice, items })
    }

    pub async fn list(
        pool: &SqlitePool,
        query: &ListInvoicesQuery,
    ) -> Result<InvoicePage, InvoiceError> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let filter = InvoiceFilter {
            customer_id: query.customer_id,
            project_id: query.project_id,
            status: query.status,
        };

        let offset = (page - 1)
            .checked_mul(limit)
            .ok_or_else(|| InvoiceError::Validation(format!("page {page} is out of range")))?;

        let invoices = Invoice::find_filtered(pool, &filter, limit, offset).await?;
        let total = Invoice::count_filtered(pool, &filter).await?;

        Ok(InvoicePage {
            invoices,
            pagination: Pagination {
                page,
                limit,
                total,
                pages: (total + limit - 1) / limit,
            },
        })
    }

    /// Replace dates, terms and items of a draft; totals and fingerprint are recomputed.
    pub async fn update(
        pool: &SqlitePool,
        invoice_id: Uuid,
        data: UpdateInvoice,
    ) -> Result<InvoiceWithItems, InvoiceError> {
        validate_items(&data.items)?;

        let mut tx = pool.begin().await?;

        let current = Invoice::find_by_id(&mut *tx, invoice_id)
            .await?
            .ok_or(InvoiceError::NotFound(invoice_id))?;
        if current.status != InvoiceStatus::Draft {
            return Err(InvoiceError::NotEditable(current.status));
        }

        let tax_rate = validate_tax_rate(data.tax_rate.unwrap_or(current.tax_rate.0))?;
        let lines = build_lines(&data.items)?;
        let totals = compute_totals(&lines, tax_rate)?;

        let contents = InvoiceContents {
            issue_date: data.issue_date,
            service_date: data.service_date.unwrap_or(data.issue_date),
            payment_terms: data.payment_terms.unwrap_or(current.payment_terms),
            net_amount: TextDecimal(totals.net),
            tax_rate: TextDecimal(tax_rate),
            tax_amount: TextDecimal(totals.tax),
            gross_amount: TextDecimal(totals.gross),
            hash_sha256: hash_for(data.issue_date, totals.gross, current.customer_id, current.status),
        };

        let invoice = Invoice::update_contents(&mut *tx, invoice_id, &contents).await?;

        InvoiceItem::delete_by_invoice_id(&mut *tx, invoice_id).await?;
        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            items.push(InvoiceItem::create(&mut *tx, invoice_id, line).await?);
        }

        AuditLog::create(
            &mut *tx,
            None,
            AuditAction::InvoiceUpdate,
            INVOICE_TABLE,
            invoice_id,
            Some(format!("Rechnung aktualisiert: {}", invoice.invoice_number)),
        )
        .await?;

        tx.commit().await?;

        info!(invoice_id = %invoice_id, gross_amount = %invoice.gross_amount, "Invoice updated");

        Ok(InvoiceWithItems { invoice, items })
    }

    /// Move an invoice to `status`, refresh its fingerprint and record the transition.
    pub async fn change_status(
        pool: &SqlitePool,
        invoice_id: Uuid,
        status: InvoiceStatus,
    ) -> Result<StatusChange, InvoiceError> {
        Self::transition(pool, invoice_id, status, AuditAction::InvoiceStatusChange).await
    }

    /// Soft cancel: the row stays, only its status flips to `cancelled`.
    pub async fn cancel(pool: &SqlitePool, invoice_id: Uuid) -> Result<StatusChange, InvoiceError> {
        Self::transition(
            pool,
            invoice_id,
            InvoiceStatus::Cancelled,
            AuditAction::InvoiceCancel,
        )
        .await
    }

    async fn transition(
        pool: &SqlitePool,
        invoice_id: Uuid,
        status: InvoiceStatus,
        action: AuditAction,
    ) -> Result<StatusChange, InvoiceError> {
        let mut tx = pool.begin().await?;

        let invoice = Invoice::find_by_id(&mut *tx, invoice_id)
            .await?
            .ok_or(InvoiceError::NotFound(invoice_id))?;
        let old_status = invoice.status;

        let hash = calculate_invoice_hash(&InvoiceHashData::with_status(&invoice, status));
        Invoice::update_status(&mut *tx, invoice_id, status, &hash).await?;

        let notes = match action {
            AuditAction::InvoiceCancel => format!("Rechnung storniert: {}", invoice.invoice_number),
            _ => format!(
                "Status geändert: {old_status} → {status} (Rechnung: {})",
                invoice.invoice_number
            ),
        };
        AuditLog::create(&mut *tx, None, action, INVOICE_TABLE, invoice_id, Some(notes)).await?;

        tx.commit().await?;

        info!(
            invoice_id = %invoice_id,
            old_status = %old_status,
            new_status = %status,
            "Invoice status changed"
        );

        Ok(StatusChange {
            invoice_id,
            old_status,
            new_status: status,
        })
    }

    /// Recompute the fingerprint from the stored fields and compare it with `hash_sha256`.
    pub async fn verify(pool: &SqlitePool, invoice_id: Uuid) -> Result<IntegrityReport, InvoiceError> {
        let invoice = Invoice::find_by_id(pool, invoice_id)
            .await?
            .ok_or(InvoiceError::NotFound(invoice_id))?;

        let data = InvoiceHashData::from_invoice(&invoice);
        let valid = verify_invoice_hash(&data, &invoice.hash_sha256);
        if !valid {
            warn!(
                invoice_id = %invoice_id,
                invoice_number = %invoice.invoice_number,
                "Invoice fingerprint mismatch"
            );
        }

        Ok(IntegrityReport {
            invoice_id,
            valid,
            stored_hash: invoice.hash_sha256,
            computed_hash: calculate_invoice_hash(&data),
        })
    }
}
