//! Record endpoint routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use offsync_engine::remote::{RecordDraft, RecordPatch};
use offsync_engine::RemoteRecord;

use crate::error::Result;
use crate::handlers;
use crate::AppState;

/// Create record routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/owners/{owner}/records",
            get(list_handler).post(create_handler),
        )
        .route(
            "/records/{id}",
            get(get_handler).put(update_handler).delete(delete_handler),
        )
}

/// GET /owners/{owner}/records - All records of an owner, newest first.
async fn list_handler(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> Result<Json<Vec<RemoteRecord>>> {
    let records = handlers::list_records(&state.pool, &owner).await?;
    Ok(Json(records))
}

/// POST /owners/{owner}/records - Create a record.
async fn create_handler(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Json(draft): Json<RecordDraft>,
) -> Result<(StatusCode, Json<RemoteRecord>)> {
    let record = handlers::create_record(&state.pool, &owner, draft).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /records/{id}
async fn get_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RemoteRecord>> {
    Ok(Json(handlers::get_record(&state.pool, &id).await?))
}

/// PUT /records/{id} - Replace the payload.
async fn update_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<RecordPatch>,
) -> Result<Json<RemoteRecord>> {
    Ok(Json(handlers::update_record(&state.pool, &id, patch).await?))
}

/// DELETE /records/{id}
async fn delete_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    handlers::delete_record(&state.pool, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
