//! # Event Stream
//!
//! `GET /api/boards/{id}/events`: attaches a viewer channel to the broadcast
//! hub and drains it as text/event-stream. The channel detaches when the
//! client goes away and axum drops the stream.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use domains::SseFrame;
use futures_util::stream::{self, Stream};
use services::BoardService;
use tracing::debug;
use uuid::Uuid;

use super::error::ApiError;
use super::extract::{Identity, StreamQuery};
use super::AppState;

pub async fn board_events(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
    identity: Identity,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let identity = identity.or_query(query);
    let board = state.boards.get_board(board_id).await?;
    let viewer = BoardService::viewer_for(&board, identity.client_id, identity.token.as_deref());

    let subscription = state.hub.attach(board_id, viewer);
    debug!(%board_id, channel = subscription.id(), "event stream opened");

    let frames = stream::unfold(subscription, |mut subscription| async move {
        let frame = subscription.recv().await?;
        Some((Ok::<_, Infallible>(to_event(&frame)), subscription))
    });
    Ok(Sse::new(frames).keep_alive(KeepAlive::new().interval(state.keep_alive)))
}

/// Fields are written in call order, so the name goes before the data.
fn to_event(frame: &SseFrame) -> Event {
    let event = match frame.event {
        Some(name) => Event::default().event(name),
        None => Event::default(),
    };
    event.data(&frame.data)
}
