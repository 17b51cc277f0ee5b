//! Supplier roster and list-files replies

use crate::error::{ApiError, ApiResult};
use crate::models::suppliers::SupplierInfo;
use crate::models::SupplierChange;
use crate::services::orator::ListFilesSummary;
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

/// GET /api/suppliers
pub async fn list_suppliers(State(state): State<AppState>) -> Json<Vec<SupplierInfo>> {
    Json(state.inventory.read().await.suppliers.infos().to_vec())
}

#[derive(Debug, Serialize)]
pub struct RosterResponse {
    pub supplier_count: usize,
    /// `unchanged`, `count_changed` or `positions_changed`
    pub change: &'static str,
    pub changed_positions: Vec<usize>,
}

/// PUT /api/suppliers
pub async fn set_suppliers(
    State(state): State<AppState>,
    Json(identities): Json<Vec<String>>,
) -> ApiResult<Json<RosterResponse>> {
    let supplier_count = identities.len();
    let change = state.roster.set_supplier_list(identities).await?;

    let (change, changed_positions) = match change {
        SupplierChange::Unchanged => ("unchanged", Vec::new()),
        SupplierChange::CountChanged { .. } => ("count_changed", Vec::new()),
        SupplierChange::Positions(positions) => ("positions_changed", positions),
    };
    Ok(Json(RosterResponse {
        supplier_count,
        change,
        changed_positions,
    }))
}

/// POST /api/suppliers/:num/list-files
///
/// Body is the supplier's plain-text reply.
pub async fn incoming_list_files(
    State(state): State<AppState>,
    Path(num): Path<String>,
    body: String,
) -> ApiResult<Json<ListFilesSummary>> {
    let supplier_num = num
        .parse::<usize>()
        .map_err(|_| ApiError::BadRequest(format!("bad supplier number {:?}", num)))?;
    let summary = state.orator.incoming_list_files(supplier_num, &body).await?;
    Ok(Json(summary))
}
