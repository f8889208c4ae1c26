//! # HTTP Handlers
//!
//! Thin glue from requests to the board and item services. Handlers resolve
//! the caller's identity, call exactly one service operation and record its
//! outcome in the metrics registry.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use domains::{Board, BoardView, DomainError, Item, ItemPatch, ItemView, NewItem};
use serde::Deserialize;
use serde_json::json;
use services::BoardService;
use tracing::error;
use uuid::Uuid;

use super::error::ApiError;
use super::extract::Identity;
use super::AppState;

type ApiResult<T> = Result<T, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError(DomainError::ValidationError(rejection.body_text())))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render(state.hub.viewer_count()) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ── Boards ──────────────────────────────────────────────────────────────────

/// The creation response is the only place the facilitator token is shown.
pub async fn create_board(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Board>)> {
    let result = state.boards.create_board().await;
    state.metrics.record("create_board", &result);
    Ok((StatusCode::CREATED, Json(result?)))
}

pub async fn get_board(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
) -> ApiResult<Json<BoardView>> {
    Ok(Json(state.boards.get_board(board_id).await?.view()))
}

#[derive(Debug, Deserialize)]
pub struct RevealRequest {
    pub revealed: bool,
}

pub async fn toggle_reveal(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
    identity: Identity,
    payload: Result<Json<RevealRequest>, JsonRejection>,
) -> ApiResult<Json<BoardView>> {
    let result = async {
        let request = body(payload).map_err(|e| e.0)?;
        let token = identity.token.as_deref();
        state.boards.authorize_facilitator(board_id, token).await?;
        state
            .boards
            .toggle_reveal(board_id, request.revealed, token.unwrap_or_default())
            .await
    }
    .await;
    state.metrics.record("toggle_reveal", &result);
    Ok(Json(result?.view()))
}

// ── Items ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotQuery {
    pub since: Option<DateTime<Utc>>,
}

pub async fn list_items(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
    Query(query): Query<SnapshotQuery>,
    identity: Identity,
) -> ApiResult<Json<Vec<ItemView>>> {
    let board = state.boards.get_board(board_id).await?;
    let viewer = BoardService::viewer_for(&board, identity.client_id, identity.token.as_deref());
    let items = state.items.snapshot(board_id, query.since, &viewer).await?;
    Ok(Json(items))
}

pub async fn create_item(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
    identity: Identity,
    payload: Result<Json<NewItem>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ItemView>)> {
    let result = async {
        let client_id = identity.require_client().map_err(|e| e.0)?;
        let input = body(payload).map_err(|e| e.0)?;
        state.items.create_item(board_id, input, client_id).await
    }
    .await;
    state.metrics.record("create_item", &result);
    Ok((StatusCode::CREATED, Json(ItemView::full(&result?))))
}

pub async fn update_item(
    State(state): State<AppState>,
    Path((board_id, item_id)): Path<(Uuid, Uuid)>,
    identity: Identity,
    payload: Result<Json<ItemPatch>, JsonRejection>,
) -> ApiResult<Json<ItemView>> {
    let result = async {
        let client_id = identity.require_client().map_err(|e| e.0)?;
        let patch = body(payload).map_err(|e| e.0)?;
        item_on_board(&state, board_id, item_id).await?;
        state.items.update_item(item_id, patch, client_id).await
    }
    .await;
    state.metrics.record("update_item", &result);
    Ok(Json(ItemView::full(&result?)))
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path((board_id, item_id)): Path<(Uuid, Uuid)>,
    identity: Identity,
) -> ApiResult<StatusCode> {
    let result = async {
        state
            .boards
            .authorize_facilitator(board_id, identity.token.as_deref())
            .await?;
        item_on_board(&state, board_id, item_id).await?;
        state.items.delete_item(item_id).await
    }
    .await;
    state.metrics.record("delete_item", &result);
    result?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn approve(
    State(state): State<AppState>,
    Path((board_id, item_id)): Path<(Uuid, Uuid)>,
    identity: Identity,
) -> ApiResult<Json<ItemView>> {
    let result = async {
        let client_id = identity.require_client().map_err(|e| e.0)?;
        item_on_board(&state, board_id, item_id).await?;
        state.items.approve(item_id, client_id).await
    }
    .await;
    state.metrics.record("approve", &result);
    Ok(Json(ItemView::full(&result?)))
}

pub async fn unapprove(
    State(state): State<AppState>,
    Path((board_id, item_id)): Path<(Uuid, Uuid)>,
    identity: Identity,
) -> ApiResult<Json<ItemView>> {
    let result = async {
        let client_id = identity.require_client().map_err(|e| e.0)?;
        item_on_board(&state, board_id, item_id).await?;
        state.items.unapprove(item_id, client_id).await
    }
    .await;
    state.metrics.record("unapprove", &result);
    Ok(Json(ItemView::full(&result?)))
}

/// An item addressed through the wrong board is treated as missing.
async fn item_on_board(state: &AppState, board_id: Uuid, item_id: Uuid) -> domains::Result<Item> {
    let item = state.items.get_item(item_id).await?;
    if item.board_id != board_id {
        return Err(DomainError::not_found("Item", item_id));
    }
    Ok(item)
}
