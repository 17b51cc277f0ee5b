//! Backup endpoints

use crate::db::backups as registry;
use crate::error::{ApiError, ApiResult};
use crate::models::stats::{self, BackupStats, LocalBackupStats};
use crate::services::DeleteReport;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use haven_common::backup_id::sort_newest_first;
use haven_common::BackupId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

fn parse_id(raw: &str) -> ApiResult<BackupId> {
    BackupId::new(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

#[derive(Debug, Serialize)]
pub struct BackupSummary {
    pub backup_id: BackupId,
    /// `None` when only fragments are known, not a registry record
    pub dir_path: Option<String>,
    pub running: bool,
    pub in_process: bool,
    pub blocks: u64,
    pub percent: f64,
}

/// GET /api/backups
///
/// Registered backups plus any id seen only in fragment listings, newest first.
pub async fn list_backups(State(state): State<AppState>) -> ApiResult<Json<Vec<BackupSummary>>> {
    let records: BTreeMap<BackupId, _> = registry::list_backups(&state.db)
        .await?
        .into_iter()
        .map(|record| (record.backup_id.clone(), record))
        .collect();

    let inventory = state.inventory.read().await;
    let mut ids: Vec<BackupId> = inventory
        .known_backup_ids()
        .into_iter()
        .chain(records.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    sort_newest_first(&mut ids);

    let summaries = ids
        .into_iter()
        .map(|backup_id| {
            let (blocks, percent) = stats::blocks_and_percent(&inventory.remote, &backup_id);
            let record = records.get(&backup_id);
            BackupSummary {
                dir_path: record.map(|r| r.dir_path.clone()),
                running: record.is_some_and(|r| r.running),
                in_process: inventory.in_process.contains(&backup_id),
                blocks,
                percent,
                backup_id,
            }
        })
        .collect();
    Ok(Json(summaries))
}

#[derive(Debug, Deserialize)]
pub struct RegisterBackupRequest {
    pub backup_id: BackupId,
    pub dir_path: String,
    #[serde(default)]
    pub running: bool,
}

/// POST /api/backups
pub async fn register_backup(
    State(state): State<AppState>,
    Json(request): Json<RegisterBackupRequest>,
) -> ApiResult<StatusCode> {
    if request.dir_path.trim().is_empty() {
        return Err(ApiError::BadRequest("dir_path is empty".to_string()));
    }
    registry::register_backup(&state.db, &request.backup_id, &request.dir_path, request.running).await?;
    Ok(StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
pub struct FinishBackupRequest {
    #[serde(default)]
    pub size_bytes: i64,
}

/// POST /api/backups/:id/finished
pub async fn finish_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<FinishBackupRequest>,
) -> ApiResult<StatusCode> {
    let backup_id = parse_id(&id)?;
    if !registry::finish_backup(&state.db, &backup_id, request.size_bytes).await? {
        return Err(ApiError::NotFound(format!("backup {}", backup_id)));
    }
    state.inventory.remove_in_process(&backup_id).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct BackupStatsResponse {
    pub backup_id: BackupId,
    pub blocks: u64,
    pub percent: f64,
    pub remote: BackupStats,
    pub local: LocalBackupStats,
}

/// GET /api/backups/:id/stats
pub async fn backup_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BackupStatsResponse>> {
    let backup_id = parse_id(&id)?;
    let registered = registry::get_backup(&state.db, &backup_id).await?.is_some();

    let inventory = state.inventory.read().await;
    let known = inventory.remote.contains(&backup_id) || inventory.local.contains(&backup_id);
    if !known && !registered {
        return Err(ApiError::NotFound(format!("backup {}", backup_id)));
    }

    let (blocks, percent) = stats::blocks_and_percent(&inventory.remote, &backup_id);
    Ok(Json(BackupStatsResponse {
        remote: stats::backup_stats(&inventory.remote, &backup_id),
        local: stats::local_backup_stats(&inventory.local, &backup_id),
        blocks,
        percent,
        backup_id,
    }))
}

/// DELETE /api/backups/:id
pub async fn delete_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteReport>> {
    let backup_id = parse_id(&id)?;
    let registered = registry::get_backup(&state.db, &backup_id).await?.is_some();
    let known = {
        let inventory = state.inventory.read().await;
        inventory.remote.contains(&backup_id) || inventory.local.contains(&backup_id)
    };
    if !registered && !known {
        return Err(ApiError::NotFound(format!("backup {}", backup_id)));
    }

    let report = state.janitor.delete_backup(&backup_id, true).await?;
    Ok(Json(report))
}

/// POST /api/backups/:id/in-process
pub async fn mark_in_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let backup_id = parse_id(&id)?;
    if state.inventory.add_in_process(backup_id).await {
        Ok(StatusCode::CREATED)
    } else {
        Ok(StatusCode::OK)
    }
}

/// DELETE /api/backups/:id/in-process
pub async fn unmark_in_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let backup_id = parse_id(&id)?;
    if state.inventory.remove_in_process(&backup_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("{} is not in process", backup_id)))
    }
}
