//! # PgStore
//!
//! Postgres-backed [`EntityStore`]. Documents live as JSONB rows in a single
//! `documents` table keyed by `(collection, id)`. Transactions take row locks
//! with `SELECT ... FOR UPDATE` and bound lock waits with `lock_timeout`.

use std::time::Duration;

use async_trait::async_trait;
use domains::{
    Collection, Document, EntityStore, FieldValue, Filter, FilterOp, OrderBy, StoreError,
    StoreResult, TxFn, TxHandle,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{PgExecutor, Postgres, QueryBuilder, Row, Transaction};
use tracing::{info, warn};

/// SQLSTATE raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";

pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub async fn connect(
        url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(backend)?;
        info!(max_connections, "connected to postgres");
        Ok(Self { pool, lock_timeout })
    }

    pub fn from_pool(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Like [`backend`], but recognizes lock timeouts on a specific document.
fn classify(err: sqlx::Error, collection: Collection, id: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(LOCK_NOT_AVAILABLE) {
            warn!(%collection, id, "row lock timed out");
            return StoreError::Contention {
                collection,
                id: id.to_string(),
            };
        }
    }
    backend(err)
}

async fn fetch<'e>(
    exec: impl PgExecutor<'e>,
    collection: Collection,
    id: &str,
    for_update: bool,
) -> StoreResult<Option<Document>> {
    let sql = if for_update {
        "SELECT body FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE"
    } else {
        "SELECT body FROM documents WHERE collection = $1 AND id = $2"
    };
    let row = sqlx::query(sql)
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(exec)
        .await
        .map_err(|e| classify(e, collection, id))?;
    row.map(|row| row.try_get::<Json<Document>, _>("body").map(|json| json.0))
        .transpose()
        .map_err(backend)
}

async fn upsert<'e>(
    exec: impl PgExecutor<'e>,
    collection: Collection,
    id: &str,
    doc: Document,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3) \
         ON CONFLICT (collection, id) DO UPDATE SET body = EXCLUDED.body, updated_at = now()",
    )
    .bind(collection.as_str())
    .bind(id)
    .bind(Json(doc))
    .execute(exec)
    .await
    .map_err(|e| classify(e, collection, id))?;
    Ok(())
}

async fn insert_new<'e>(
    exec: impl PgExecutor<'e>,
    collection: Collection,
    id: &str,
    doc: Document,
) -> StoreResult<bool> {
    let done = sqlx::query(
        "INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3) \
         ON CONFLICT (collection, id) DO NOTHING",
    )
    .bind(collection.as_str())
    .bind(id)
    .bind(Json(doc))
    .execute(exec)
    .await
    .map_err(|e| classify(e, collection, id))?;
    Ok(done.rows_affected() == 1)
}

async fn merge<'e>(
    exec: impl PgExecutor<'e>,
    collection: Collection,
    id: &str,
    partial: Document,
) -> StoreResult<()> {
    if !partial.is_object() {
        return Err(StoreError::Codec("partial update requires JSON objects".into()));
    }
    let done = sqlx::query(
        "UPDATE documents SET body = body || $3, updated_at = now() \
         WHERE collection = $1 AND id = $2",
    )
    .bind(collection.as_str())
    .bind(id)
    .bind(Json(partial))
    .execute(exec)
    .await
    .map_err(|e| classify(e, collection, id))?;
    if done.rows_affected() == 0 {
        return Err(StoreError::not_found(collection, id));
    }
    Ok(())
}

async fn remove<'e>(exec: impl PgExecutor<'e>, collection: Collection, id: &str) -> StoreResult<bool> {
    let done = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
        .bind(collection.as_str())
        .bind(id)
        .execute(exec)
        .await
        .map_err(|e| classify(e, collection, id))?;
    Ok(done.rows_affected() > 0)
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    qb.push(" AND (body->>");
    qb.push_bind(filter.field);
    qb.push(")");
    match filter.value {
        FieldValue::Str(_) => {}
        FieldValue::Bool(_) => {
            qb.push("::boolean");
        }
        FieldValue::Int(_) => {
            qb.push("::bigint");
        }
        FieldValue::Time(_) => {
            qb.push("::timestamptz");
        }
    }
    qb.push(match filter.op {
        FilterOp::Eq => " = ",
        FilterOp::Gt => " > ",
        FilterOp::Lt => " < ",
    });
    match &filter.value {
        FieldValue::Str(v) => qb.push_bind(v.clone()),
        FieldValue::Bool(v) => qb.push_bind(*v),
        FieldValue::Int(v) => qb.push_bind(*v),
        FieldValue::Time(v) => qb.push_bind(*v),
    };
}

#[async_trait]
impl EntityStore for PgStore {
    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Document>> {
        fetch(&self.pool, collection, id, false).await
    }

    async fn set(&self, collection: Collection, id: &str, doc: Document) -> StoreResult<()> {
        upsert(&self.pool, collection, id, doc).await
    }

    async fn insert(&self, collection: Collection, id: &str, doc: Document) -> StoreResult<bool> {
        insert_new(&self.pool, collection, id, doc).await
    }

    async fn update(&self, collection: Collection, id: &str, partial: Document) -> StoreResult<()> {
        merge(&self.pool, collection, id, partial).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool> {
        remove(&self.pool, collection, id).await
    }

    async fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
        order_by: Option<OrderBy>,
    ) -> StoreResult<Vec<(String, Document)>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT id, body FROM documents WHERE collection = ");
        qb.push_bind(collection.as_str());
        for filter in filters {
            push_filter(&mut qb, filter);
        }
        let rows = qb.build().fetch_all(&self.pool).await.map_err(backend)?;

        let mut hits = rows
            .into_iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let Json(body): Json<Document> = row.try_get("body")?;
                Ok((id, body))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(backend)?;
        // Ordered here so timestamps compare as instants the same way the
        // in-memory store does.
        if let Some(order) = order_by {
            hits.sort_by(|(a_id, a), (b_id, b)| order.compare(a, b).then_with(|| a_id.cmp(b_id)));
        }
        Ok(hits)
    }

    async fn transaction(&self, f: TxFn) -> StoreResult<Document> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let millis = self.lock_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = '{millis}ms'"))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let mut handle = PgTx { tx };
        match f(&mut handle).await {
            Ok(doc) => {
                handle.tx.commit().await.map_err(backend)?;
                Ok(doc)
            }
            Err(err) => {
                if let Err(rollback) = handle.tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TxHandle for PgTx {
    async fn get(&mut self, collection: Collection, id: &str) -> StoreResult<Option<Document>> {
        fetch(&mut *self.tx, collection, id, true).await
    }

    async fn set(&mut self, collection: Collection, id: &str, doc: Document) -> StoreResult<()> {
        upsert(&mut *self.tx, collection, id, doc).await
    }

    async fn insert(&mut self, collection: Collection, id: &str, doc: Document) -> StoreResult<bool> {
        insert_new(&mut *self.tx, collection, id, doc).await
    }

    async fn update(&mut self, collection: Collection, id: &str, partial: Document) -> StoreResult<()> {
        merge(&mut *self.tx, collection, id, partial).await
    }

    async fn delete(&mut self, collection: Collection, id: &str) -> StoreResult<bool> {
        remove(&mut *self.tx, collection, id).await
    }
}
