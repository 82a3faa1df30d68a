//! Record handlers - the remote side of client reconciliation.

use crate::db;
use crate::error::{AppError, Result};
use offsync_engine::remote::{RecordDraft, RecordPatch};
use offsync_engine::{RemoteRecord, Timestamp};
use sqlx::PgPool;
use uuid::Uuid;

/// Server time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn to_db_timestamp(ts: Timestamp) -> Result<i64> {
    i64::try_from(ts).map_err(|_| AppError::BadRequest(format!("timestamp out of range: {ts}")))
}

/// Payloads must be JSON objects.
pub fn validate_payload(payload: &serde_json::Value) -> Result<()> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(AppError::BadRequest("payload must be a JSON object".into()))
    }
}

/// Validate a create request against the owner in the path.
pub fn validate_draft(owner: &str, draft: &RecordDraft) -> Result<()> {
    if owner.is_empty() {
        return Err(AppError::BadRequest("owner must not be empty".into()));
    }
    if draft.owner_id != owner {
        return Err(AppError::BadRequest(format!(
            "owner mismatch: path {owner:?}, body {:?}",
            draft.owner_id
        )));
    }
    validate_payload(&draft.payload)
}

/// Create a record. The server assigns the id and `updated_at`; the client's
/// `created_at` is preserved.
pub async fn create_record(pool: &PgPool, owner: &str, draft: RecordDraft) -> Result<RemoteRecord> {
    validate_draft(owner, &draft)?;

    let id = Uuid::new_v4().to_string();
    let stored = db::insert_record(
        pool,
        &id,
        owner,
        &draft.payload,
        to_db_timestamp(draft.created_at)?,
        now_ms(),
    )
    .await?;

    tracing::info!(record_id = %stored.id, owner, "record created");
    Ok(stored.into_remote())
}

pub async fn get_record(pool: &PgPool, id: &str) -> Result<RemoteRecord> {
    db::get_record(pool, id)
        .await?
        .map(db::StoredRecord::into_remote)
        .ok_or_else(|| AppError::NotFound(format!("record {id}")))
}

pub async fn list_records(pool: &PgPool, owner: &str) -> Result<Vec<RemoteRecord>> {
    let records = db::list_records(pool, owner).await?;
    tracing::debug!(owner, count = records.len(), "records listed");
    Ok(records.into_iter().map(db::StoredRecord::into_remote).collect())
}

/// Replace a record's payload, stamping a fresh `updated_at`.
pub async fn update_record(pool: &PgPool, id: &str, patch: RecordPatch) -> Result<RemoteRecord> {
    validate_payload(&patch.payload)?;

    let stored = db::update_record(pool, id, &patch.payload, now_ms())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("record {id}")))?;

    tracing::info!(record_id = %id, owner = %stored.owner_id, "record updated");
    Ok(stored.into_remote())
}

pub async fn delete_record(pool: &PgPool, id: &str) -> Result<()> {
    if !db::delete_record(pool, id).await? {
        return Err(AppError::NotFound(format!("record {id}")));
    }
    tracing::info!(record_id = %id, "record deleted");
    Ok(())
}
