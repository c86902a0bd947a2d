use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// Bookkeeping action recorded in the audit trail
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "audit_action", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    InvoiceCreate,
    InvoiceUpdate,
    InvoiceStatusChange,
    InvoiceCancel,
}

/// Append-only audit trail entry (GoBD)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub action: AuditAction,
    pub ref_table: String,
    pub ref_id: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLog {
    pub async fn create<'e, E>(
        executor: E,
        user_id: Option<&str>,
        action: AuditAction,
        ref_table: &str,
        ref_id: Uuid,
        notes: Option<String>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AuditLog>(
            r#"INSERT INTO lopez_audit_logs (id, user_id, action, ref_table, ref_id, notes)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id, user_id, action, ref_table, ref_id, notes, created_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(action)
        .bind(ref_table)
        .bind(ref_id)
        .bind(notes)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_ref(
        pool: &SqlitePool,
        ref_table: &str,
        ref_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AuditLog>(
            r#"SELECT id, user_id, action, ref_table, ref_id, notes, created_at
               FROM lopez_audit_logs
               WHERE ref_table = $1 AND ref_id = $2
               ORDER BY created_at ASC, rowid ASC"#,
        )
        .bind(ref_table)
        .bind(ref_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    #[tokio::test]
    async fn test_audit_log_rejects_rewrites() {
        let db = DBService::new_in_memory().await.unwrap();
        let ref_id = Uuid::new_v4();
        let entry = AuditLog::create(
            &db.pool,
            Some("admin"),
            AuditAction::InvoiceCreate,
            "lopez_invoices",
            ref_id,
            Some("Rechnung erstellt".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(entry.action, AuditAction::InvoiceCreate);

        let update = sqlx::query("UPDATE lopez_audit_logs SET notes = 'x' WHERE id = $1")
            .bind(entry.id)
            .execute(&db.pool)
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM lopez_audit_logs WHERE id = $1")
            .bind(entry.id)
            .execute(&db.pool)
            .await;
        assert!(delete.is_err());

        let entries = AuditLog::find_by_ref(&db.pool, "lopez_invoices", ref_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].notes.as_deref(), Some("Rechnung erstellt"));
    }

    #[test]
    fn test_action_names_match_stored_values() {
        assert_eq!(AuditAction::InvoiceStatusChange.to_string(), "INVOICE_STATUS_CHANGE");
        assert_eq!(AuditAction::InvoiceCancel.to_string(), "INVOICE_CANCEL");
    }
}
