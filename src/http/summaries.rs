//! List/get/delete handlers for summaries.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::response::{bad_request, internal_error, not_found};
use super::state::AppState;
use crate::store::{Store, StoreError, Summary};

#[derive(Debug, Serialize)]
pub struct SummaryDto {
    pub id: i64,
    pub group_id: i64,
    pub text: String,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub created_at: String,
}

impl From<Summary> for SummaryDto {
    fn from(s: Summary) -> Self {
        SummaryDto {
            id: s.id,
            group_id: s.group_id,
            text: s.text,
            window_start_ms: s.window_start_ms,
            window_end_ms: s.window_end_ms,
            created_at: s.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn resolve_group(store: &Store, external_group_id: &str) -> Result<Option<i64>, Response> {
    store
        .group_internal_id(external_group_id)
        .await
        .map_err(|e| internal_error(e))
}

pub async fn list_summaries(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);
    if !(1..=500).contains(&limit) {
        return bad_request("limit must be between 1 and 500");
    }
    if offset < 0 {
        return bad_request("offset must be non-negative");
    }

    let internal_id = match resolve_group(&state.store, &group_id).await {
        Ok(Some(id)) => id,
        Ok(None) => return Json::<Vec<SummaryDto>>(Vec::new()).into_response(),
        Err(resp) => return resp,
    };

    match state.store.list_summaries(Some(internal_id), limit, offset).await {
        Ok(summaries) => Json(summaries.into_iter().map(SummaryDto::from).collect::<Vec<_>>()).into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn get_summary(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_summary(id).await {
        Ok(Some(summary)) => Json(SummaryDto::from(summary)).into_response(),
        Ok(None) => not_found(format!("summary {id} not found")),
        Err(e) => internal_error(e),
    }
}

pub async fn delete_summary(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_summary(id).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(StoreError::NotFound) => not_found(format!("summary {id} not found")),
        Err(e) => internal_error(e),
    }
}
