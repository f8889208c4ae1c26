use axum::http::{Method, StatusCode};
use integration_tests::http::{request, send};
use integration_tests::Harness;
use serde_json::json;

#[tokio::test]
async fn health_is_ok() {
    let app = Harness::new().app();
    let (status, body) = send(&app, request(Method::GET, "/health", None, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn create_board_returns_token_once() {
    let app = Harness::new().app();
    let (status, created) = send(&app, request(Method::POST, "/api/boards", None, None, None)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["revealed"], false);
    assert_eq!(created["gateEnabled"], true);
    let token = created["facilitatorToken"].as_str().unwrap();
    assert_eq!(token.len(), 32);

    let id = created["id"].as_str().unwrap();
    let (status, public) = send(
        &app,
        request(Method::GET, &format!("/api/boards/{id}"), None, None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(public["id"], created["id"]);
    assert!(public.get("facilitatorToken").is_none());
}

#[tokio::test]
async fn unknown_board_is_404_with_error_body() {
    let app = Harness::new().app();
    let (status, body) = send(
        &app,
        request(
            Method::GET,
            &format!("/api/boards/{}", uuid::Uuid::now_v7()),
            None,
            None,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("Board not found"));
}

#[tokio::test]
async fn reveal_checks_the_facilitator_token() {
    let h = Harness::new();
    let app = h.app();
    let board = h.board().await;
    let uri = format!("/api/boards/{}/reveal", board.id);
    let body = json!({ "revealed": true });

    let (status, _) = send(&app, request(Method::POST, &uri, None, None, Some(body.clone()))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        request(Method::POST, &uri, None, Some("wrong"), Some(body.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, view) = send(
        &app,
        request(
            Method::POST,
            &uri,
            None,
            Some(&board.facilitator_token),
            Some(body),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["revealed"], true);
    assert!(h.boards.get_board(board.id).await.unwrap().revealed);
}

#[tokio::test]
async fn reveal_rejects_malformed_body() {
    let h = Harness::new();
    let app = h.app();
    let board = h.board().await;
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            &format!("/api/boards/{}/reveal", board.id),
            None,
            Some(&board.facilitator_token),
            Some(json!({ "revealed": "yes" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn metrics_count_mutations() {
    let h = Harness::new();
    let app = h.app();
    send(&app, request(Method::POST, "/api/boards", None, None, None)).await;

    let (status, body) = send(&app, request(Method::GET, "/metrics", None, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains(r#"wishboard_mutations_total{op="create_board",outcome="ok"} 1"#));
    assert!(text.contains("wishboard_viewers_connected 0"));
}
