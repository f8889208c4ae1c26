use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use futures_util::StreamExt;
use integration_tests::http::{request, send};
use integration_tests::Harness;
use tower::ServiceExt;

type Frames = axum::body::BodyDataStream;

async fn open_stream(h: &Harness, uri: &str) -> Frames {
    let req = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = h.app().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    response.into_body().into_data_stream()
}

async fn next_frame(frames: &mut Frames) -> String {
    let chunk = tokio::time::timeout(Duration::from_secs(2), frames.next())
        .await
        .expect("frame within timeout")
        .expect("stream still open")
        .expect("body chunk");
    String::from_utf8(chunk.to_vec()).unwrap()
}

#[tokio::test]
async fn stream_greets_then_delivers_projected_events() {
    let h = Harness::new();
    let board = h.board().await;
    let mut frames = open_stream(&h, &format!("/api/boards/{}/events?clientId=B", board.id)).await;

    let greeting = next_frame(&mut frames).await;
    assert!(greeting.starts_with("data: "));
    assert!(greeting.contains(r#""type":"connected""#));
    assert!(greeting.contains(&board.id.to_string()));
    assert_eq!(h.hub.channel_count(board.id), 1);

    h.item(&board, "A", "secret until reveal").await;
    let added = next_frame(&mut frames).await;
    assert!(added.starts_with("event: item-added\n"));
    assert!(!added.contains("secret until reveal"));

    h.boards
        .toggle_reveal(board.id, true, &board.facilitator_token)
        .await
        .unwrap();
    let revealed = next_frame(&mut frames).await;
    assert_eq!(revealed, "event: reveal-changed\ndata: {\"revealed\":true}\n\n");

    drop(frames);
    assert_eq!(h.hub.channel_count(board.id), 0);
}

#[tokio::test]
async fn facilitator_token_in_query_unlocks_content() {
    let h = Harness::new();
    let board = h.board().await;
    let mut frames = open_stream(
        &h,
        &format!("/api/boards/{}/events?token={}", board.id, board.facilitator_token),
    )
    .await;
    next_frame(&mut frames).await;

    h.item(&board, "A", "visible to facilitator").await;
    assert!(next_frame(&mut frames).await.contains("visible to facilitator"));
}

#[tokio::test]
async fn stream_for_unknown_board_is_404() {
    let h = Harness::new();
    let (status, _) = send(
        &h.app(),
        request(
            Method::GET,
            &format!("/api/boards/{}/events", uuid::Uuid::now_v7()),
            None,
            None,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
