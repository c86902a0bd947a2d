use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, QueryBuilder, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use crate::types::TextDecimal;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "invoice_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InvoiceStatus {
    #[default]
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 5] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Sent,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
        InvoiceStatus::Cancelled,
    ];
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub customer_id: i64,
    pub project_id: Option<i64>,
    pub order_id: Option<i64>,
    pub issue_date: NaiveDate,
    pub service_date: NaiveDate,
    pub payment_terms: String,
    pub currency: String,
    #[ts(type = "string")]
    pub net_amount: TextDecimal,
    #[ts(type = "string")]
    pub tax_rate: TextDecimal,
    #[ts(type = "string")]
    pub tax_amount: TextDecimal,
    #[ts(type = "string")]
    pub gross_amount: TextDecimal,
    pub status: InvoiceStatus,
    pub hash_sha256: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub pos: i64,
    pub item_text: String,
    #[ts(type = "string")]
    pub qty: TextDecimal,
    pub unit: String,
    #[ts(type = "string")]
    pub unit_price: TextDecimal,
    #[ts(type = "string")]
    pub net_line: TextDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct InvoiceWithItems {
    #[serde(flatten)]
    #[ts(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

impl std::ops::Deref for InvoiceWithItems {
    type Target = Invoice;
    fn deref(&self) -> &Self::Target {
        &self.invoice
    }
}

/// Fully computed invoice header, ready to insert.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub invoice_number: String,
    pub customer_id: i64,
    pub project_id: Option<i64>,
    pub order_id: Option<i64>,
    pub issue_date: NaiveDate,
    pub service_date: NaiveDate,
    pub payment_terms: String,
    pub currency: String,
    pub net_amount: TextDecimal,
    pub tax_rate: TextDecimal,
    pub tax_amount: TextDecimal,
    pub gross_amount: TextDecimal,
    pub hash_sha256: String,
    pub created_by: String,
}

/// Editable part of a draft invoice, with totals already recomputed.
#[derive(Debug, Clone)]
pub struct InvoiceContents {
    pub issue_date: NaiveDate,
    pub service_date: NaiveDate,
    pub payment_terms: String,
    pub net_amount: TextDecimal,
    pub tax_rate: TextDecimal,
    pub tax_amount: TextDecimal,
    pub gross_amount: TextDecimal,
    pub hash_sha256: String,
}

#[derive(Debug, Clone)]
pub struct NewInvoiceItem {
    pub pos: i64,
    pub item_text: String,
    pub qty: TextDecimal,
    pub unit: String,
    pub unit_price: TextDecimal,
    pub net_line: TextDecimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct InvoiceFilter {
    pub customer_id: Option<i64>,
    pub project_id: Option<i64>,
    pub status: Option<InvoiceStatus>,
}

const INVOICE_COLUMNS: &str = "id, invoice_number, customer_id, project_id, order_id, issue_date, \
     service_date, payment_terms, currency, net_amount, tax_rate, tax_amount, gross_amount, \
     status, hash_sha256, created_by, created_at, updated_at";

impl InvoiceFilter {
    fn push_conditions<'a>(&'a self, builder: &mut QueryBuilder<'a, Sqlite>) {
        builder.push(" WHERE 1 = 1");
        if let Some(customer_id) = self.customer_id {
            builder.push(" AND customer_id = ").push_bind(customer_id);
        }
        if let Some(project_id) = self.project_id {
            builder.push(" AND project_id = ").push_bind(project_id);
        }
        if let Some(status) = self.status {
            builder.push(" AND status = ").push_bind(status);
        }
    }
}

impl Invoice {
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM lopez_invoices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_filtered(
        pool: &SqlitePool,
        filter: &InvoiceFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {INVOICE_COLUMNS} FROM lopez_invoices"
        ));
        filter.push_conditions(&mut builder);
        builder
            .push(" ORDER BY issue_date DESC, created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        builder.build_query_as::<Invoice>().fetch_all(pool).await
    }

    pub async fn count_filtered(
        pool: &SqlitePool,
        filter: &InvoiceFilter,
    ) -> Result<i64, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM lopez_invoices");
        filter.push_conditions(&mut builder);
        builder.build_query_scalar::<i64>().fetch_one(pool).await
    }

    /// Highest sequence number already issued in `year` (the `####` of `YYYY-####`).
    pub async fn max_number_in_year<'e, E>(executor: E, year: i32) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let max: Option<i64> = sqlx::query_scalar(
            r#"SELECT MAX(CAST(SUBSTR(invoice_number, 6) AS INTEGER))
               FROM lopez_invoices
               WHERE invoice_number LIKE $1"#,
        )
        .bind(format!("{year}-%"))
        .fetch_one(executor)
        .await?;
        Ok(max.unwrap_or(0))
    }

    pub async fn create<'e, E>(
        executor: E,
        id: Uuid,
        data: &NewInvoice,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Invoice>(&format!(
            r#"INSERT INTO lopez_invoices (id, invoice_number, customer_id, project_id, order_id,
                   issue_date, service_date, payment_terms, currency, net_amount, tax_rate,
                   tax_amount, gross_amount, status, hash_sha256, created_by)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
               RETURNING {INVOICE_COLUMNS}"#
        ))
        .bind(id)
        .bind(&data.invoice_number)
        .bind(data.customer_id)
        .bind(data.project_id)
        .bind(data.order_id)
        .bind(data.issue_date)
        .bind(data.service_date)
        .bind(&data.payment_terms)
        .bind(&data.currency)
        .bind(data.net_amount)
        .bind(data.tax_rate)
        .bind(data.tax_amount)
        .bind(data.gross_amount)
        .bind(InvoiceStatus::Draft)
        .bind(&data.hash_sha256)
        .bind(&data.created_by)
        .fetch_one(executor)
        .await
    }

    pub async fn update_contents<'e, E>(
        executor: E,
        id: Uuid,
        data: &InvoiceContents,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Invoice>(&format!(
            r#"UPDATE lopez_invoices
               SET issue_date = $2, service_date = $3, payment_terms = $4, tax_rate = $5,
                   net_amount = $6, tax_amount = $7, gross_amount = $8, hash_sha256 = $9,
                   updated_at = datetime('now', 'subsec')
               WHERE id = $1
               RETURNING {INVOICE_COLUMNS}"#
        ))
        .bind(id)
        .bind(data.issue_date)
        .bind(data.service_date)
        .bind(&data.payment_terms)
        .bind(data.tax_rate)
        .bind(data.net_amount)
        .bind(data.tax_amount)
        .bind(data.gross_amount)
        .bind(&data.hash_sha256)
        .fetch_one(executor)
        .await
    }

    /// Persist a new status together with the fingerprint computed for it.
    pub async fn update_status<'e, E>(
        executor: E,
        id: Uuid,
        status: InvoiceStatus,
        hash_sha256: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"UPDATE lopez_invoices
               SET status = $2, hash_sha256 = $3, updated_at = datetime('now', 'subsec')
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(status)
        .bind(hash_sha256)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}

impl InvoiceItem {
    pub async fn find_by_invoice_id<'e, E>(
        executor: E,
        invoice_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, InvoiceItem>(
            r#"SELECT id, invoice_id, pos, item_text, qty, unit, unit_price, net_line
               FROM lopez_invoice_items
               WHERE invoice_id = $1
               ORDER BY pos ASC"#,
        )
        .bind(invoice_id)
        .fetch_all(executor)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        invoice_id: Uuid,
        data: &NewInvoiceItem,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, InvoiceItem>(
            r#"INSERT INTO lopez_invoice_items (id, invoice_id, pos, item_text, qty, unit, unit_price, net_line)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING id, invoice_id, pos, item_text, qty, unit, unit_price, net_line"#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(data.pos)
        .bind(&data.item_text)
        .bind(data.qty)
        .bind(&data.unit)
        .bind(data.unit_price)
        .bind(data.net_line)
        .fetch_one(executor)
        .await
    }

    pub async fn delete_by_invoice_id<'e, E>(executor: E, invoice_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM lopez_invoice_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
