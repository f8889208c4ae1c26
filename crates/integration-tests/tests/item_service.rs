use std::collections::HashSet;

use domains::{Collection, DomainError, EntityStore, ItemPatch, Viewer};
use integration_tests::{new_item, Harness};
use uuid::Uuid;

#[tokio::test]
async fn approve_then_unapprove_walkthrough() {
    let h = Harness::new();
    let board = h.revealed_board().await;
    let item = h.item(&board, "author", "shorter standups").await;
    assert_eq!(item.claps, 0);

    let approved = h.items.approve(item.id, "C").await.unwrap();
    assert_eq!(approved.claps, 1);
    let records = h.items.ledger().approvals_for_item(item.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].client_id, "C");

    let again = h.items.approve(item.id, "C").await.unwrap_err();
    assert!(matches!(again, DomainError::Conflict(_)));
    assert_eq!(h.items.get_item(item.id).await.unwrap().claps, 1);

    let removed = h.items.unapprove(item.id, "C").await.unwrap();
    assert_eq!(removed.claps, 0);
    assert!(h.items.ledger().approvals_for_item(item.id).await.unwrap().is_empty());

    let gone = h.items.unapprove(item.id, "C").await.unwrap_err();
    assert!(matches!(gone, DomainError::NotFound(..)));
    assert_eq!(h.items.get_item(item.id).await.unwrap().claps, 0);
}

#[tokio::test]
async fn unapprove_without_approval_never_decrements() {
    let h = Harness::new();
    let board = h.revealed_board().await;
    let item = h.item(&board, "author", "pairing days").await;
    h.items.approve(item.id, "A").await.unwrap();

    let err = h.items.unapprove(item.id, "B").await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound(..)));
    assert_eq!(h.items.get_item(item.id).await.unwrap().claps, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_distinct_approvals_are_all_counted() {
    let h = Harness::new();
    let board = h.revealed_board().await;
    let item = h.item(&board, "author", "quiet fridays").await;

    let tasks: Vec<_> = (0..40)
        .map(|n| {
            let items = h.items.clone();
            tokio::spawn(async move { items.approve(item.id, &format!("client-{n}")).await })
        })
        .collect();
    let mut succeeded = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 40);
    assert_eq!(h.items.get_item(item.id).await.unwrap().claps, 40);
    let clients: HashSet<_> = h
        .items
        .ledger()
        .approvals_for_item(item.id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.client_id)
        .collect();
    assert_eq!(clients.len(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn racing_duplicate_approvals_count_once() {
    let h = Harness::new();
    let board = h.revealed_board().await;
    let item = h.item(&board, "author", "demo days").await;

    let mut tasks = Vec::new();
    for n in 0..10 {
        for _ in 0..2 {
            let items = h.items.clone();
            tasks.push(tokio::spawn(async move {
                items.approve(item.id, &format!("client-{n}")).await
            }));
        }
    }
    let mut ok = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(DomainError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(ok, 10);
    assert_eq!(conflicts, 10);
    assert_eq!(h.items.get_item(item.id).await.unwrap().claps, 10);
}

#[tokio::test]
async fn approvals_wait_for_reveal() {
    let h = Harness::new();
    let board = h.board().await;
    let item = h.item(&board, "author", "no meeting wednesdays").await;

    let err = h.items.approve(item.id, "C").await.unwrap_err();
    assert!(matches!(err, DomainError::Forbidden(_)));
    assert_eq!(h.items.get_item(item.id).await.unwrap().claps, 0);
}

#[tokio::test]
async fn create_item_rejects_invalid_fields() {
    let h = Harness::new();
    let board = h.board().await;

    let long = "x".repeat(201);
    let err = h
        .items
        .create_item(board.id, new_item("wish", &long, "Sam"), "c")
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ValidationError(_)));

    let err = h
        .items
        .create_item(board.id, new_item("maybe", "idea", "Sam"), "c")
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ValidationError(_)));

    let err = h
        .items
        .create_item(Uuid::now_v7(), new_item("like", "idea", "Sam"), "c")
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound(..)));

    assert_eq!(h.store.len(Collection::Items), 0);
}

#[tokio::test]
async fn only_the_author_can_edit() {
    let h = Harness::new();
    let board = h.board().await;
    let item = h.item(&board, "author", "async reviews").await;

    let patch = ItemPatch {
        idea: Some("async code reviews".into()),
        ..Default::default()
    };
    let err = h
        .items
        .update_item(item.id, patch.clone(), "someone-else")
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden(_)));

    let updated = h.items.update_item(item.id, patch, "author").await.unwrap();
    assert_eq!(updated.idea, "async code reviews");
    assert_eq!(updated.created_at, item.created_at);

    let empty = ItemPatch {
        who: Some(String::new()),
        ..Default::default()
    };
    let err = h.items.update_item(item.id, empty, "author").await.unwrap_err();
    assert!(matches!(err, DomainError::ValidationError(_)));
}

#[tokio::test]
async fn edit_keeps_concurrent_claps() {
    let h = Harness::new();
    let board = h.revealed_board().await;
    let item = h.item(&board, "author", "retro snacks").await;
    h.items.approve(item.id, "A").await.unwrap();

    let updated = h
        .items
        .update_item(
            item.id,
            ItemPatch {
                idea: Some("retro snacks, healthy ones".into()),
                ..Default::default()
            },
            "author",
        )
        .await
        .unwrap();
    assert_eq!(updated.claps, 1);
}

#[tokio::test]
async fn delete_removes_item_and_its_approvals() {
    let h = Harness::new();
    let board = h.revealed_board().await;
    let item = h.item(&board, "author", "hack week").await;
    h.items.approve(item.id, "A").await.unwrap();
    h.items.approve(item.id, "B").await.unwrap();

    h.items.delete_item(item.id).await.unwrap();
    assert!(matches!(
        h.items.get_item(item.id).await.unwrap_err(),
        DomainError::NotFound(..)
    ));
    let claps = h.store.query(Collection::Claps, &[], None).await.unwrap();
    assert!(claps.is_empty());

    let again = h.items.delete_item(item.id).await.unwrap_err();
    assert!(matches!(again, DomainError::NotFound(..)));
}

#[tokio::test]
async fn snapshot_orders_by_creation_and_honours_since() {
    let h = Harness::new();
    let board = h.board().await;
    let first = h.item(&board, "a", "one").await;
    let second = h.item(&board, "b", "two").await;
    let third = h.item(&board, "c", "three").await;

    let facilitator = Viewer::facilitator(None);
    let all = h.items.snapshot(board.id, None, &facilitator).await.unwrap();
    let ids: Vec<_> = all.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![first.id, second.id, third.id]);

    let later = h
        .items
        .snapshot(board.id, Some(first.created_at), &facilitator)
        .await
        .unwrap();
    assert!(later.iter().all(|v| v.id != first.id));
    assert!(later.iter().any(|v| v.id == third.id));
}

#[tokio::test]
async fn snapshot_redacts_other_peoples_items_before_reveal() {
    let h = Harness::new();
    let board = h.board().await;
    let mine = h.item(&board, "A", "mine").await;
    let theirs = h.item(&board, "B", "theirs").await;

    let view = h
        .items
        .snapshot(board.id, None, &Viewer::participant("A"))
        .await
        .unwrap();
    let own = view.iter().find(|v| v.id == mine.id).unwrap();
    let other = view.iter().find(|v| v.id == theirs.id).unwrap();
    assert_eq!(own.idea.as_deref(), Some("mine"));
    assert!(!own.hidden);
    assert_eq!(other.idea, None);
    assert!(other.hidden);

    h.boards
        .toggle_reveal(board.id, true, &board.facilitator_token)
        .await
        .unwrap();
    let view = h
        .items
        .snapshot(board.id, None, &Viewer::participant("A"))
        .await
        .unwrap();
    assert!(view.iter().all(|v| !v.hidden && v.idea.is_some()));
}
