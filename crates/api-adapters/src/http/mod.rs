//! Axum surface over the wishboard services.

pub mod error;
pub mod events;
pub mod extract;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, patch, post};
use axum::Router;
use services::{BoardService, BroadcastHub, ItemService};

use crate::metrics::Metrics;

pub use error::ApiError;

/// Shared by every handler; cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub boards: BoardService,
    pub items: ItemService,
    pub hub: BroadcastHub,
    pub metrics: Arc<Metrics>,
    /// Interval between keep-alive comments on idle event streams.
    pub keep_alive: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/api/boards", post(handlers::create_board))
        .route("/api/boards/{board_id}", get(handlers::get_board))
        .route("/api/boards/{board_id}/reveal", post(handlers::toggle_reveal))
        .route("/api/boards/{board_id}/events", get(events::board_events))
        .route(
            "/api/boards/{board_id}/items",
            get(handlers::list_items).post(handlers::create_item),
        )
        .route(
            "/api/boards/{board_id}/items/{item_id}",
            patch(handlers::update_item).delete(handlers::delete_item),
        )
        .route(
            "/api/boards/{board_id}/items/{item_id}/clap",
            post(handlers::approve).delete(handlers::unapprove),
        )
        .with_state(state)
}
