//! Shared fixtures for the cross-crate tests: a fully wired set of services
//! over the in-memory store, plus HTTP helpers for driving the router.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;
use domains::{
    Board, Collection, Document, EntityStore, Filter, Item, NewItem, OrderBy, StoreResult, TxFn,
};
use services::{BoardService, BroadcastHub, ItemService, Subscription};
use storage_adapters::MemoryStore;
use tokio::sync::oneshot;

pub const TTL_DAYS: i64 = 7;

/// Services sharing one store and one hub, as the binary wires them. The
/// services reach the store through `checkpoints`, which can hold a
/// transaction in place to stage an interleaving.
#[derive(Clone)]
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub checkpoints: Arc<PausingStore>,
    pub hub: BroadcastHub,
    pub boards: BoardService,
    pub items: ItemService,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(channel_capacity: usize) -> Self {
        let store = Arc::new(MemoryStore::new());
        let checkpoints = Arc::new(PausingStore::new(store.clone()));
        let hub = BroadcastHub::new(channel_capacity);
        let boards = BoardService::new(checkpoints.clone(), hub.clone(), Duration::days(TTL_DAYS));
        let items = ItemService::new(checkpoints.clone(), hub.clone());
        Self {
            store,
            checkpoints,
            hub,
            boards,
            items,
        }
    }

    pub async fn board(&self) -> Board {
        self.boards.create_board().await.expect("create board")
    }

    pub async fn revealed_board(&self) -> Board {
        let board = self.board().await;
        self.boards
            .toggle_reveal(board.id, true, &board.facilitator_token)
            .await
            .expect("reveal board")
    }

    pub async fn item(&self, board: &Board, client_id: &str, idea: &str) -> Item {
        self.items
            .create_item(board.id, new_item("wish", idea, "Sam"), client_id)
            .await
            .expect("create item")
    }

    #[cfg(feature = "web-axum")]
    pub fn app(&self) -> axum::Router {
        api_adapters::router(api_adapters::AppState {
            boards: self.boards.clone(),
            items: self.items.clone(),
            hub: self.hub.clone(),
            metrics: Arc::new(api_adapters::Metrics::new()),
            keep_alive: std::time::Duration::from_secs(15),
        })
    }
}

/// Where an armed checkpoint holds the next transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Before the transaction body runs.
    Start,
    /// After the transaction has committed, before the caller sees the result.
    Committed,
}

struct Checkpoint {
    stage: Stage,
    reached: oneshot::Sender<()>,
    resume: oneshot::Receiver<()>,
}

/// Handle on an armed checkpoint.
pub struct Paused {
    reached: oneshot::Receiver<()>,
    resume: oneshot::Sender<()>,
}

impl Paused {
    /// Waits until a transaction is held at the checkpoint.
    pub async fn reached(&mut self) {
        (&mut self.reached).await.expect("transaction reached checkpoint");
    }

    pub fn resume(self) {
        let _ = self.resume.send(());
    }
}

/// `MemoryStore` wrapper that can hold one transaction at a checkpoint.
pub struct PausingStore {
    inner: Arc<MemoryStore>,
    armed: Mutex<Option<Checkpoint>>,
}

impl PausingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            armed: Mutex::new(None),
        }
    }

    /// Arms a checkpoint for the next transaction to start.
    pub fn pause_next(&self, stage: Stage) -> Paused {
        let (reached_tx, reached_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        *self.armed.lock().expect("checkpoint slot") = Some(Checkpoint {
            stage,
            reached: reached_tx,
            resume: resume_rx,
        });
        Paused {
            reached: reached_rx,
            resume: resume_tx,
        }
    }
}

async fn hold(checkpoint: Checkpoint) {
    let _ = checkpoint.reached.send(());
    let _ = checkpoint.resume.await;
}

#[async_trait]
impl EntityStore for PausingStore {
    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn set(&self, collection: Collection, id: &str, doc: Document) -> StoreResult<()> {
        self.inner.set(collection, id, doc).await
    }

    async fn insert(&self, collection: Collection, id: &str, doc: Document) -> StoreResult<bool> {
        self.inner.insert(collection, id, doc).await
    }

    async fn update(&self, collection: Collection, id: &str, partial: Document) -> StoreResult<()> {
        self.inner.update(collection, id, partial).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool> {
        self.inner.delete(collection, id).await
    }

    async fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
        order_by: Option<OrderBy>,
    ) -> StoreResult<Vec<(String, Document)>> {
        self.inner.query(collection, filters, order_by).await
    }

    async fn transaction(&self, f: TxFn) -> StoreResult<Document> {
        let checkpoint = self.armed.lock().expect("checkpoint slot").take();
        let (before, after) = match checkpoint {
            Some(cp) if cp.stage == Stage::Start => (Some(cp), None),
            other => (None, other),
        };
        if let Some(cp) = before {
            hold(cp).await;
        }
        let outcome = self.inner.transaction(f).await;
        if let Some(cp) = after {
            hold(cp).await;
        }
        outcome
    }
}

pub fn new_item(starter: &str, idea: &str, who: &str) -> NewItem {
    NewItem {
        starter: starter.into(),
        idea: idea.into(),
        who: who.into(),
    }
}

/// Every frame already queued on `sub`, in wire form.
pub fn drain(sub: &mut Subscription) -> Vec<String> {
    let mut frames = Vec::new();
    while let Some(frame) = sub.try_recv() {
        frames.push(frame.encode());
    }
    frames
}

#[cfg(feature = "web-axum")]
pub mod http {
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt;

    /// Builds a request with optional identity headers and JSON body.
    pub fn request(
        method: Method,
        uri: &str,
        client_id: Option<&str>,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(client_id) = client_id {
            builder = builder.header("x-client-id", client_id);
        }
        if let Some(token) = token {
            builder = builder.header("x-facilitator-token", token);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        builder.body(body).expect("valid request")
    }

    /// Sends `req` through a clone of `app` and decodes the JSON response.
    /// Empty bodies decode to `Value::Null`.
    pub async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.expect("infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, json)
    }
}
