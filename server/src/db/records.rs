//! Database operations for the records table.

use offsync_engine::RemoteRecord;
use sqlx::{PgPool, Row};

/// A stored record row from the database.
#[derive(Debug)]
pub struct StoredRecord {
    pub id: String,
    pub owner_id: String,
    pub payload: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredRecord {
    /// Convert database row to the wire representation.
    pub fn into_remote(self) -> RemoteRecord {
        RemoteRecord {
            id: self.id,
            owner_id: self.owner_id,
            payload: self.payload,
            created_at: self.created_at.max(0) as u64,
            updated_at: self.updated_at.max(0) as u64,
        }
    }
}

/// Insert a new record. A duplicate id surfaces as a unique violation.
pub async fn insert_record(
    pool: &PgPool,
    id: &str,
    owner_id: &str,
    payload: &serde_json::Value,
    created_at: i64,
    updated_at: i64,
) -> Result<StoredRecord, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        INSERT INTO records (id, owner_id, payload, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, owner_id, payload, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(owner_id)
    .bind(payload)
    .bind(created_at)
    .bind(updated_at)
    .fetch_one(pool)
    .await
}

/// Get a record by ID.
pub async fn get_record(pool: &PgPool, id: &str) -> Result<Option<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT id, owner_id, payload, created_at, updated_at
        FROM records
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Get all records of one owner, newest first.
pub async fn list_records(pool: &PgPool, owner_id: &str) -> Result<Vec<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT id, owner_id, payload, created_at, updated_at
        FROM records
        WHERE owner_id = $1
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
}

/// Replace a record's payload. Returns `None` if no such record exists.
pub async fn update_record(
    pool: &PgPool,
    id: &str,
    payload: &serde_json::Value,
    updated_at: i64,
) -> Result<Option<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        UPDATE records
        SET payload = $2, updated_at = $3
        WHERE id = $1
        RETURNING id, owner_id, payload, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(payload)
    .bind(updated_at)
    .fetch_optional(pool)
    .await
}

/// Delete a record. Returns whether it existed.
pub async fn delete_record(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM records WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
