//! HTTP handlers for the quarantine review surface

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use carte_common::model::SourceId;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "carte-review".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct BuildInfoResponse {
    pub version: String,
    pub git_hash: String,
    pub build_timestamp: String,
    pub build_profile: String,
}

/// GET /api/buildinfo
///
/// Build identification baked in at compile time, for matching a running
/// instance to a commit.
pub async fn build_info() -> Json<BuildInfoResponse> {
    Json(BuildInfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct QuarantineListResponse {
    pub count: usize,
    pub entries: Vec<db::QuarantineRow>,
}

/// GET /api/quarantine
pub async fn list_quarantine(
    State(state): State<AppState>,
) -> ApiResult<Json<QuarantineListResponse>> {
    let entries = db::list_quarantined(&state.db).await?;
    Ok(Json(QuarantineListResponse {
        count: entries.len(),
        entries,
    }))
}

#[derive(Debug, Serialize)]
pub struct QuarantineDetailResponse {
    pub brand_id: Uuid,
    pub records: Vec<db::QuarantinedRecord>,
}

/// GET /api/quarantine/:brand_id
///
/// Full quarantined records for one brand, menu contents included, so the
/// operator can eyeball what the gate held back before deciding.
pub async fn quarantine_detail(
    State(state): State<AppState>,
    Path(brand_id): Path<Uuid>,
) -> ApiResult<Json<QuarantineDetailResponse>> {
    let records = db::quarantined_records(&state.db, brand_id).await?;
    if records.is_empty() {
        return Err(ApiError::NotFound(format!(
            "no quarantined menus for brand {}",
            brand_id
        )));
    }
    Ok(Json(QuarantineDetailResponse { brand_id, records }))
}

fn parse_source(source: &str) -> Result<SourceId, ApiError> {
    SourceId::from_str(source).map_err(|_| {
        ApiError::BadRequest(format!(
            "unknown source '{}', expected one of grabfood, foodpanda, brand_site, vision",
            source
        ))
    })
}

/// POST /api/quarantine/:brand_id/:source/promote
pub async fn promote_record(
    State(state): State<AppState>,
    Path((brand_id, source)): Path<(Uuid, String)>,
) -> ApiResult<Json<Value>> {
    let source = parse_source(&source)?;
    if db::promote(&state.db, brand_id, source).await? {
        info!(brand_id = %brand_id, source = %source, "operator promoted quarantined menu");
        Ok(Json(json!({ "promoted": true })))
    } else {
        Err(ApiError::NotFound(format!(
            "no quarantined menu for {} / {}",
            brand_id, source
        )))
    }
}

/// DELETE /api/quarantine/:brand_id/:source
pub async fn delete_record(
    State(state): State<AppState>,
    Path((brand_id, source)): Path<(Uuid, String)>,
) -> ApiResult<Json<Value>> {
    let source = parse_source(&source)?;
    if db::delete_quarantined(&state.db, brand_id, source).await? {
        info!(brand_id = %brand_id, source = %source, "operator deleted quarantined menu");
        Ok(Json(json!({ "deleted": true })))
    } else {
        Err(ApiError::NotFound(format!(
            "no quarantined menu for {} / {}",
            brand_id, source
        )))
    }
}
